//! Cloud store adapter.
//!
//! `CloudApi` is the seam over the HTTP API; `HttpCloudClient` talks to the
//! real server and tests substitute their own implementation. `CloudStore`
//! puts the TTL cache in front of it and assembles `CloudData`.

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::errors::CloudError;
use crate::history::CheckInHistory;
use crate::models::{
    date_key, ApiResponse, AppData, CheckIn, CheckInQuery, CloudData, DeleteResponse,
    StatsQuery, StatsReport, TaskGroupWithStatus, ToggleRequest, ToggleResponse, UserProfile,
    UserUpdate,
};
use crate::streak;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use reqwest::{Client, Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_HISTORY_DAYS: u32 = 30;
const ANONYMOUS_SCOPE: &str = "anonymous";

#[async_trait]
pub trait CloudApi: Send + Sync {
    fn set_token(&mut self, token: Option<String>);
    fn has_token(&self) -> bool;

    async fn fetch_tasks(&self, date: NaiveDate) -> Result<Vec<TaskGroupWithStatus>, CloudError>;
    async fn fetch_check_ins(&self, query: &CheckInQuery) -> Result<Vec<CheckIn>, CloudError>;
    async fn toggle_check_in(&self, request: &ToggleRequest) -> Result<ToggleResponse, CloudError>;
    async fn delete_check_in(&self, task_id: &str, date: NaiveDate) -> Result<bool, CloudError>;
    async fn fetch_stats(&self, query: &StatsQuery) -> Result<StatsReport, CloudError>;
    async fn fetch_user(&self) -> Result<UserProfile, CloudError>;
    async fn update_user(&self, update: &UserUpdate) -> Result<UserProfile, CloudError>;
    async fn delete_user(&self) -> Result<(), CloudError>;
}

#[derive(Debug, Clone)]
pub struct HttpCloudClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCloudClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, CloudError> {
        let raw = format!("{}{}", self.base_url, path);
        let url = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        url.map_err(|err| CloudError::InvalidUrl(format!("{raw}: {err}")))
    }

    async fn call<T, B>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T, CloudError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized + Sync,
    {
        let url = self.url(path, params)?;
        debug!(%method, %url, "cloud request");

        let mut request = self.http.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(CloudError::Unauthorized);
        }

        let text = response.text().await?;
        let envelope: ApiResponse<T> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(CloudError::Api {
                    status: status.as_u16(),
                    message: text,
                });
            }
            Err(err) => return Err(CloudError::Decode(err.to_string())),
        };

        if !status.is_success() {
            return Err(CloudError::Api {
                status: status.as_u16(),
                message: envelope.error.unwrap_or_default(),
            });
        }
        if !envelope.success {
            return Err(CloudError::Rejected(
                envelope.error.unwrap_or_else(|| "request rejected".to_string()),
            ));
        }
        envelope
            .data
            .ok_or_else(|| CloudError::Decode("response carried no data".to_string()))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, CloudError> {
        self.call::<T, ()>(Method::GET, path, params, None).await
    }
}

#[async_trait]
impl CloudApi for HttpCloudClient {
    fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    fn has_token(&self) -> bool {
        self.token.is_some()
    }

    async fn fetch_tasks(&self, date: NaiveDate) -> Result<Vec<TaskGroupWithStatus>, CloudError> {
        let params = [
            ("includeCheckIns", "true".to_string()),
            ("date", date_key(date)),
        ];
        self.get("/api/tasks", &params).await
    }

    async fn fetch_check_ins(&self, query: &CheckInQuery) -> Result<Vec<CheckIn>, CloudError> {
        let mut params = Vec::new();
        if let Some(start) = query.start_date {
            params.push(("startDate", date_key(start)));
        }
        if let Some(end) = query.end_date {
            params.push(("endDate", date_key(end)));
        }
        if let Some(task_id) = &query.task_id {
            params.push(("taskId", task_id.clone()));
        }
        self.get("/api/checkins", &params).await
    }

    async fn toggle_check_in(&self, request: &ToggleRequest) -> Result<ToggleResponse, CloudError> {
        self.call(Method::POST, "/api/checkins", &[], Some(request))
            .await
    }

    async fn delete_check_in(&self, task_id: &str, date: NaiveDate) -> Result<bool, CloudError> {
        let params = [("taskId", task_id.to_string()), ("date", date_key(date))];
        let response: DeleteResponse = self
            .call::<_, ()>(Method::DELETE, "/api/checkins", &params, None)
            .await?;
        Ok(response.deleted)
    }

    async fn fetch_stats(&self, query: &StatsQuery) -> Result<StatsReport, CloudError> {
        let mut params = vec![("type", query.kind.as_str().to_string())];
        if let Some(start) = query.start_date {
            params.push(("startDate", date_key(start)));
        }
        if let Some(end) = query.end_date {
            params.push(("endDate", date_key(end)));
        }
        self.get("/api/stats", &params).await
    }

    async fn fetch_user(&self) -> Result<UserProfile, CloudError> {
        self.get("/api/user", &[]).await
    }

    async fn update_user(&self, update: &UserUpdate) -> Result<UserProfile, CloudError> {
        self.call(Method::PUT, "/api/user", &[], Some(update)).await
    }

    async fn delete_user(&self) -> Result<(), CloudError> {
        let _: DeleteResponse = self
            .call::<_, ()>(Method::DELETE, "/api/user", &[], None)
            .await?;
        Ok(())
    }
}

/// Cache-aware view of the cloud account. Cache keys carry the signed-in
/// user so a persisted cache never answers for another account.
pub struct CloudStore<A> {
    api: A,
    cache: TtlCache,
    clock: Arc<dyn Clock>,
    history_days: u32,
    scope: String,
}

impl<A: CloudApi> CloudStore<A> {
    pub fn new(api: A, cache: TtlCache, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            cache,
            clock,
            history_days: DEFAULT_HISTORY_DAYS,
            scope: ANONYMOUS_SCOPE.to_string(),
        }
    }

    pub fn set_user_scope(&mut self, user_id: Option<&str>) {
        self.scope = user_id.unwrap_or(ANONYMOUS_SCOPE).to_string();
    }

    pub fn user_scope(&self) -> &str {
        &self.scope
    }

    pub fn with_history_days(mut self, days: u32) -> Self {
        self.history_days = days.max(1);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TtlCache {
        &mut self.cache
    }

    /// Builds a complete `CloudData` for `date` or fails without side effects
    /// on the caller's state.
    pub async fn load(&mut self, date: NaiveDate) -> Result<CloudData, CloudError> {
        let groups = self.tasks_for(date).await?;
        let start = date - Duration::days(i64::from(self.history_days) - 1);
        let check_ins = self.check_ins_between(start, date).await?;

        let mut history = CheckInHistory::from_check_ins(&check_ins);
        for group in &groups {
            for status in &group.tasks {
                if let Some(completed) = status.completed {
                    history.set(date, &status.task.id, completed);
                }
            }
        }

        let now = self.clock.now();
        let streak = streak::summarize(&history, self.clock.today());
        info!(
            %date,
            groups = groups.len(),
            check_ins = check_ins.len(),
            "loaded cloud data"
        );

        Ok(CloudData {
            data: AppData {
                task_groups: groups.into_iter().map(TaskGroupWithStatus::into_group).collect(),
                check_in_history: history,
                streak,
                last_updated: Some(now),
            },
            last_synced: now,
        })
    }

    /// Drops cached task and check-in reads, then loads fresh.
    pub async fn refresh(&mut self, date: NaiveDate) -> Result<CloudData, CloudError> {
        self.invalidate_reads();
        self.load(date).await
    }

    pub async fn toggle(&mut self, request: &ToggleRequest) -> Result<ToggleResponse, CloudError> {
        let response = self.api.toggle_check_in(request).await?;
        self.invalidate_reads();
        Ok(response)
    }

    pub async fn delete_check_in(&mut self, task_id: &str, date: NaiveDate) -> Result<bool, CloudError> {
        let deleted = self.api.delete_check_in(task_id, date).await?;
        self.invalidate_reads();
        Ok(deleted)
    }

    pub async fn stats(&mut self, query: &StatsQuery) -> Result<StatsReport, CloudError> {
        let key = format!(
            "stats:{}:{}:{}:{}",
            self.scope,
            query.kind.as_str(),
            query.start_date.map(date_key).unwrap_or_default(),
            query.end_date.map(date_key).unwrap_or_default()
        );
        if let Some(report) = self.cache.get::<StatsReport>(&key) {
            debug!(%key, "stats served from cache");
            return Ok(report);
        }
        let report = self.api.fetch_stats(query).await?;
        self.cache.set(&key, &report, None);
        Ok(report)
    }

    pub async fn user(&self) -> Result<UserProfile, CloudError> {
        self.api.fetch_user().await
    }

    pub async fn update_user(&self, update: &UserUpdate) -> Result<UserProfile, CloudError> {
        self.api.update_user(update).await
    }

    pub async fn delete_user(&mut self) -> Result<(), CloudError> {
        self.api.delete_user().await?;
        self.clear();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.cache.invalidate(None);
    }

    fn invalidate_reads(&mut self) {
        for pattern in ["tasks:*", "checkins:*", "stats:*"] {
            self.cache.invalidate(Some(pattern));
        }
    }

    async fn tasks_for(&mut self, date: NaiveDate) -> Result<Vec<TaskGroupWithStatus>, CloudError> {
        let key = format!("tasks:{}:{}", self.scope, date_key(date));
        if let Some(groups) = self.cache.get(&key) {
            debug!(%key, "tasks served from cache");
            return Ok(groups);
        }
        let groups = self.api.fetch_tasks(date).await?;
        self.cache.set(&key, &groups, None);
        Ok(groups)
    }

    async fn check_ins_between(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CheckIn>, CloudError> {
        let key = format!("checkins:{}:{}:{}", self.scope, date_key(start), date_key(end));
        if let Some(check_ins) = self.cache.get(&key) {
            debug!(%key, "check-ins served from cache");
            return Ok(check_ins);
        }
        let query = CheckInQuery {
            start_date: Some(start),
            end_date: Some(end),
            task_id: None,
        };
        let check_ins = match self.api.fetch_check_ins(&query).await {
            Ok(check_ins) => check_ins,
            Err(err) => {
                warn!(%key, "check-in fetch failed: {err}");
                return Err(err);
            }
        };
        self.cache.set(&key, &check_ins, None);
        Ok(check_ins)
    }
}
