//! Data-source coordinator.
//!
//! Owns the local and cloud views of the user's data and decides which one
//! reads and writes go to. All mutation goes through its methods; when shared
//! between tasks it lives behind `SharedCoordinator`.

use crate::cloud::{CloudApi, CloudStore};
use crate::clock::Clock;
use crate::errors::{CloudError, SyncError};
use crate::history::CheckInHistory;
use crate::local::LocalStore;
use crate::models::{AppData, CloudData, StreakInfo, Task, ToggleAction, ToggleRequest};
use crate::streak;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type SharedCoordinator<A> = Arc<Mutex<Coordinator<A>>>;

pub fn default_refresh_delay() -> Duration {
    Duration::seconds(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Local,
    Cloud,
}

/// A signed-in user as handed over by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Local history exists; the caller must accept or decline migration.
    MigrationPrompt { pending_entries: usize },
    CloudReady,
    LoggedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    pub date: NaiveDate,
    pub task_id: String,
    pub error: CloudError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated_count: usize,
    pub failures: Vec<MigrationFailure>,
    pub migrated: CheckInHistory,
    /// Set when the uploads ran but loading the account afterwards failed;
    /// the coordinator is then still on local data.
    pub switch_error: Option<CloudError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub task: Task,
    pub group_title: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub task_id: String,
    pub date: NaiveDate,
    pub completed: bool,
    pub source: DataSource,
}

pub struct Coordinator<A> {
    data_source: DataSource,
    local_store: LocalStore,
    local_data: AppData,
    cloud: CloudStore<A>,
    cloud_data: Option<CloudData>,
    session: Option<Session>,
    current_date: NaiveDate,
    migration_pending: bool,
    refresh_due: Option<DateTime<Utc>>,
    refresh_delay: Duration,
    clock: Arc<dyn Clock>,
}

impl<A: CloudApi> Coordinator<A> {
    pub fn new(local_store: LocalStore, cloud: CloudStore<A>, clock: Arc<dyn Clock>) -> Self {
        let today = clock.today();
        let mut local_data = local_store.load();
        local_data.streak = streak::summarize(&local_data.check_in_history, today);

        Self {
            data_source: DataSource::Local,
            local_store,
            local_data,
            cloud,
            cloud_data: None,
            session: None,
            current_date: today,
            migration_pending: false,
            refresh_due: None,
            refresh_delay: default_refresh_delay(),
            clock,
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn into_shared(self) -> SharedCoordinator<A> {
        Arc::new(Mutex::new(self))
    }

    pub fn data_source(&self) -> DataSource {
        self.data_source
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn migration_pending(&self) -> bool {
        self.migration_pending
    }

    pub fn local_data(&self) -> &AppData {
        &self.local_data
    }

    pub fn cloud_data(&self) -> Option<&CloudData> {
        self.cloud_data.as_ref()
    }

    /// The data of the active source. Cloud mode is only entered once a
    /// complete load has landed, so this never exposes a partial cloud view.
    pub fn current_data(&self) -> &AppData {
        match (self.data_source, &self.cloud_data) {
            (DataSource::Cloud, Some(cloud)) => &cloud.data,
            _ => &self.local_data,
        }
    }

    pub fn streak(&self) -> &StreakInfo {
        &self.current_data().streak
    }

    pub fn current_date(&self) -> NaiveDate {
        self.current_date
    }

    pub fn set_current_date(&mut self, date: NaiveDate) {
        self.current_date = date;
    }

    pub fn refresh_due(&self) -> Option<DateTime<Utc>> {
        self.refresh_due
    }

    pub fn cloud(&self) -> &CloudStore<A> {
        &self.cloud
    }

    pub fn cloud_mut(&mut self) -> &mut CloudStore<A> {
        &mut self.cloud
    }

    pub async fn set_user(&mut self, session: Option<Session>) -> Result<LoginOutcome, SyncError> {
        let Some(session) = session else {
            info!("signed out, returning to local data");
            self.reset_cloud_state();
            self.reload_local();
            return Ok(LoginOutcome::LoggedOut);
        };

        let switching_user = self
            .session
            .as_ref()
            .is_some_and(|previous| previous.user_id != session.user_id);
        if switching_user {
            info!("different user signed in, dropping previous account state");
            self.reset_cloud_state();
        }

        info!(user_id = %session.user_id, "signed in");
        self.cloud.api_mut().set_token(Some(session.token.clone()));
        self.cloud.set_user_scope(Some(&session.user_id));
        self.session = Some(session);

        let pending_entries = self.local_data.check_in_history.count_completed();
        if pending_entries > 0 {
            self.migration_pending = true;
            self.switch_to_local_mode();
            return Ok(LoginOutcome::MigrationPrompt { pending_entries });
        }

        self.switch_to_cloud_mode().await?;
        Ok(LoginOutcome::CloudReady)
    }

    /// Copies local check-ins into the account, then switches to cloud mode.
    /// The report is returned even when the switch fails, with the failure
    /// in `switch_error`, since the uploads have already happened.
    pub async fn accept_migration(&mut self) -> Result<MigrationReport, SyncError> {
        if !self.migration_pending {
            return Err(SyncError::NoMigrationPending);
        }
        self.migration_pending = false;

        let mut report = self.migrate_local_to_cloud().await?;
        match self.switch_to_cloud_mode().await {
            Ok(()) => {
                let today = self.clock.today();
                if let Some(cloud) = self.cloud_data.as_mut() {
                    cloud.data.check_in_history.merge(&report.migrated);
                    cloud.data.streak = streak::summarize(&cloud.data.check_in_history, today);
                }
            }
            Err(SyncError::Cloud(err)) => report.switch_error = Some(err),
            Err(err) => return Err(err),
        }
        Ok(report)
    }

    pub async fn decline_migration(&mut self) -> Result<(), SyncError> {
        if !self.migration_pending {
            return Err(SyncError::NoMigrationPending);
        }
        self.migration_pending = false;
        self.switch_to_cloud_mode().await
    }

    pub fn switch_to_local_mode(&mut self) {
        debug!("switching to local mode");
        self.data_source = DataSource::Local;
    }

    /// Loads cloud data (cache-aware) and makes it current. On failure the
    /// coordinator stays on local data and the error is returned.
    pub async fn switch_to_cloud_mode(&mut self) -> Result<(), SyncError> {
        if self.session.is_none() {
            return Err(SyncError::NotAuthenticated);
        }

        match self.cloud.load(self.current_date).await {
            Ok(data) => {
                self.cloud_data = Some(data);
                self.data_source = DataSource::Cloud;
                info!("cloud mode active");
                Ok(())
            }
            Err(err) => {
                warn!("cloud load failed, staying local: {err}");
                self.switch_to_local_mode();
                Err(err.into())
            }
        }
    }

    pub async fn toggle_task(&mut self, task_id: &str) -> Result<ToggleOutcome, SyncError> {
        if self.current_data().find_task(task_id).is_none() {
            return Err(SyncError::UnknownTask(task_id.to_string()));
        }

        match self.data_source {
            DataSource::Local => self.toggle_local(task_id),
            DataSource::Cloud => self.toggle_cloud(task_id).await,
        }
    }

    fn toggle_local(&mut self, task_id: &str) -> Result<ToggleOutcome, SyncError> {
        let date = self.current_date;
        let previous_updated = self.local_data.last_updated;
        let completed = self.local_data.check_in_history.toggle(date, task_id);
        self.local_data.last_updated = Some(self.clock.now());

        if let Err(err) = self.local_store.save(&self.local_data) {
            warn!("failed to save local data, reverting toggle: {err}");
            self.local_data.check_in_history.set(date, task_id, !completed);
            self.local_data.last_updated = previous_updated;
            return Err(err.into());
        }

        self.local_data.streak =
            streak::summarize(&self.local_data.check_in_history, self.clock.today());

        Ok(ToggleOutcome {
            task_id: task_id.to_string(),
            date,
            completed,
            source: DataSource::Local,
        })
    }

    /// Flips the bit immediately, confirms with the server, and reverts the
    /// flip if the server call fails.
    async fn toggle_cloud(&mut self, task_id: &str) -> Result<ToggleOutcome, SyncError> {
        let date = self.current_date;
        let previous = {
            let cloud = self.cloud_data.as_mut().ok_or(SyncError::NotAuthenticated)?;
            let previous = cloud.data.check_in_history.is_checked(date, task_id);
            cloud.data.check_in_history.set(date, task_id, !previous);
            previous
        };

        let request = ToggleRequest {
            task_id: task_id.to_string(),
            date,
            note: None,
        };
        let result = self.cloud.toggle(&request).await;

        let now = self.clock.now();
        let today = self.clock.today();
        let Some(cloud) = self.cloud_data.as_mut() else {
            return Err(SyncError::NotAuthenticated);
        };

        match result {
            Ok(response) => {
                let completed = response.action == ToggleAction::Checked;
                cloud.data.check_in_history.set(date, task_id, completed);
                cloud.data.streak = streak::summarize(&cloud.data.check_in_history, today);
                cloud.data.last_updated = Some(now);
                self.refresh_due = Some(now + self.refresh_delay);

                Ok(ToggleOutcome {
                    task_id: task_id.to_string(),
                    date,
                    completed,
                    source: DataSource::Cloud,
                })
            }
            Err(err) => {
                warn!(task_id, %date, "cloud toggle failed, reverting: {err}");
                cloud.data.check_in_history.set(date, task_id, previous);
                Err(err.into())
            }
        }
    }

    /// Time left until the scheduled post-toggle refresh, if one is pending.
    pub fn refresh_wait(&self) -> Option<std::time::Duration> {
        let due = self.refresh_due?;
        Some((due - self.clock.now()).to_std().unwrap_or_default())
    }

    /// Runs the scheduled refresh once its deadline has passed. Returns
    /// whether a refresh was attempted.
    pub async fn refresh_if_due(&mut self) -> Result<bool, SyncError> {
        match self.refresh_due {
            Some(due) if self.clock.now() >= due => {
                self.refresh_due = None;
                self.refresh().await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Reloads cloud data bypassing the cache. A failure drops back to local.
    pub async fn refresh(&mut self) -> Result<(), SyncError> {
        if self.data_source != DataSource::Cloud {
            return Ok(());
        }

        match self.cloud.refresh(self.current_date).await {
            Ok(data) => {
                self.cloud_data = Some(data);
                Ok(())
            }
            Err(err) => {
                warn!("cloud refresh failed, falling back to local: {err}");
                self.switch_to_local_mode();
                Err(err.into())
            }
        }
    }

    /// Replays every completed local entry as a cloud toggle. Failures are
    /// logged and collected; nothing is rolled back or retried. An entry the
    /// account already had comes back unchecked and is toggled once more so
    /// migration never removes a cloud check-in.
    pub async fn migrate_local_to_cloud(&mut self) -> Result<MigrationReport, SyncError> {
        if self.session.is_none() {
            return Err(SyncError::NotAuthenticated);
        }

        let pairs = self.local_data.check_in_history.completed_pairs();
        info!(entries = pairs.len(), "migrating local check-ins to cloud");

        let mut report = MigrationReport::default();
        for (date, task_id) in pairs {
            let request = ToggleRequest {
                task_id: task_id.clone(),
                date,
                note: None,
            };

            let outcome = match self.cloud.toggle(&request).await {
                Ok(response) if response.action == ToggleAction::Checked => Ok(()),
                Ok(_) => match self.cloud.toggle(&request).await {
                    Ok(response) if response.action == ToggleAction::Checked => Ok(()),
                    Ok(_) => Err(CloudError::Rejected(
                        "check-in could not be restored".to_string(),
                    )),
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            };

            match outcome {
                Ok(()) => {
                    report.migrated_count += 1;
                    report.migrated.set(date, &task_id, true);
                }
                Err(err) => {
                    warn!(%task_id, %date, "migration entry failed: {err}");
                    report.failures.push(MigrationFailure {
                        date,
                        task_id,
                        error: err,
                    });
                }
            }
        }

        info!(
            migrated = report.migrated_count,
            failed = report.failures.len(),
            "migration finished"
        );
        Ok(report)
    }

    pub fn current_date_tasks(&self) -> Vec<TaskView> {
        let data = self.current_data();
        data.active_tasks()
            .into_iter()
            .map(|(group, task)| TaskView {
                task: task.clone(),
                group_title: group.title.clone(),
                completed: data.check_in_history.is_checked(self.current_date, &task.id),
            })
            .collect()
    }

    /// Percentage of active tasks completed on the current date, rounded.
    pub fn today_progress(&self) -> u8 {
        let tasks = self.current_date_tasks();
        if tasks.is_empty() {
            return 0;
        }
        let completed = tasks.iter().filter(|view| view.completed).count();
        ((completed as f64 / tasks.len() as f64) * 100.0).round() as u8
    }

    fn reset_cloud_state(&mut self) {
        self.session = None;
        self.cloud.api_mut().set_token(None);
        self.cloud.set_user_scope(None);
        self.cloud.clear();
        self.cloud_data = None;
        self.migration_pending = false;
        self.refresh_due = None;
        self.data_source = DataSource::Local;
    }

    fn reload_local(&mut self) {
        let mut data = self.local_store.load();
        data.streak = streak::summarize(&data.check_in_history, self.clock.today());
        self.local_data = data;
    }
}

/// Waits out the pending refresh delay, then refreshes. Does nothing when no
/// refresh is scheduled.
pub fn spawn_scheduled_refresh<A>(shared: SharedCoordinator<A>) -> JoinHandle<()>
where
    A: CloudApi + 'static,
{
    tokio::spawn(async move {
        let wait = shared.lock().await.refresh_wait();
        let Some(wait) = wait else {
            return;
        };
        tokio::time::sleep(wait).await;

        let mut coordinator = shared.lock().await;
        if let Err(err) = coordinator.refresh_if_due().await {
            warn!("scheduled refresh failed: {err}");
        }
    })
}
