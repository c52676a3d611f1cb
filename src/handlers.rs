use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{
    parse_date_key, ApiResponse, CheckIn, DeleteResponse, StatsKind, StatsReport,
    TaskGroupWithStatus, ToggleRequest, ToggleResponse, UserProfile, UserUpdate,
};
use crate::state::AppState;
use crate::stats::{
    build_stats, months_spanned, MAX_DAILY_RANGE_DAYS, MAX_MONTHLY_RANGE_MONTHS,
};
use crate::storage::persist_data;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Json,
};
use chrono::{Local, NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksParams {
    include_check_ins: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInParams {
    start_date: Option<String>,
    end_date: Option<String>,
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteParams {
    task_id: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsParams {
    #[serde(rename = "type")]
    kind: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

pub async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("ok"))
}

pub async fn get_tasks(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    params: Result<Query<TasksParams>, QueryRejection>,
) -> ApiResult<Vec<TaskGroupWithStatus>> {
    let Query(params) = params?;
    let include = params
        .include_check_ins
        .as_deref()
        .is_some_and(|value| value != "false" && value != "0");
    let date = if include {
        Some(optional_date("date", params.date.as_deref())?.unwrap_or_else(today))
    } else {
        None
    };

    let mut data = state.data.lock().await;
    if data.ensure_user(&user_id, Utc::now()) {
        persist_data(&state.data_path, &data).await?;
    }

    Ok(Json(ApiResponse::success(data.groups_with_status(&user_id, date))))
}

pub async fn list_check_ins(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    params: Result<Query<CheckInParams>, QueryRejection>,
) -> ApiResult<Vec<CheckIn>> {
    let Query(params) = params?;
    let start = optional_date("startDate", params.start_date.as_deref())?;
    let end = optional_date("endDate", params.end_date.as_deref())?;
    check_range(start, end)?;

    let data = state.data.lock().await;
    let rows = data.check_ins_for(&user_id, start, end, params.task_id.as_deref());
    Ok(Json(ApiResponse::success(rows)))
}

pub async fn toggle_check_in(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<ToggleRequest>, JsonRejection>,
) -> ApiResult<ToggleResponse> {
    let Json(payload) = payload?;
    let task_id = payload.task_id.trim();
    if task_id.is_empty() {
        return Err(AppError::bad_request("taskId is required"));
    }

    let now = Utc::now();
    let mut data = state.data.lock().await;
    if data.find_task(task_id).is_none() {
        return Err(AppError::not_found(format!("unknown task '{task_id}'")));
    }
    data.ensure_user(&user_id, now);

    let note = payload
        .note
        .map(|note| note.trim().to_string())
        .filter(|note| !note.is_empty());
    let response = data.toggle_check_in(&user_id, task_id, payload.date, note, now);
    persist_data(&state.data_path, &data).await?;

    info!(user_id = %user_id, task_id, date = %payload.date, action = ?response.action, "check-in toggled");
    Ok(Json(ApiResponse::success(response)))
}

pub async fn delete_check_in(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> ApiResult<DeleteResponse> {
    let Query(params) = params?;
    let task_id = params
        .task_id
        .as_deref()
        .map(str::trim)
        .filter(|task_id| !task_id.is_empty())
        .ok_or_else(|| AppError::bad_request("taskId is required"))?;
    let date = optional_date("date", params.date.as_deref())?
        .ok_or_else(|| AppError::bad_request("date is required"))?;

    let mut data = state.data.lock().await;
    let deleted = data.remove_check_in(&user_id, task_id, date);
    if deleted {
        persist_data(&state.data_path, &data).await?;
    }

    Ok(Json(ApiResponse::success(DeleteResponse { deleted })))
}

pub async fn get_stats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    params: Result<Query<StatsParams>, QueryRejection>,
) -> ApiResult<StatsReport> {
    let Query(params) = params?;
    let kind = match params.kind.as_deref() {
        None => StatsKind::Overview,
        Some(value) => StatsKind::parse(value).ok_or_else(|| {
            AppError::bad_request("type must be one of overview, streak, daily, monthly")
        })?,
    };
    let start = optional_date("startDate", params.start_date.as_deref())?;
    let end = optional_date("endDate", params.end_date.as_deref())?;
    check_range(start, end)?;
    check_stats_window(kind, start, end.unwrap_or_else(today))?;

    let data = state.data.lock().await;
    Ok(Json(ApiResponse::success(build_stats(&data, &user_id, kind, start, end))))
}

pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<UserProfile> {
    let mut data = state.data.lock().await;
    if data.ensure_user(&user_id, Utc::now()) {
        persist_data(&state.data_path, &data).await?;
    }
    let profile = data
        .user(&user_id)
        .cloned()
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(ApiResponse::success(profile)))
}

pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    update: Result<Json<UserUpdate>, JsonRejection>,
) -> ApiResult<UserProfile> {
    let Json(update) = update?;
    if let Some(settings) = &update.settings {
        if settings.timezone.trim().is_empty() {
            return Err(AppError::bad_request("timezone must not be empty"));
        }
    }

    let mut data = state.data.lock().await;
    data.ensure_user(&user_id, Utc::now());
    let profile = data
        .update_user(&user_id, update)
        .ok_or_else(|| AppError::not_found("user not found"))?;
    persist_data(&state.data_path, &data).await?;
    Ok(Json(ApiResponse::success(profile)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<DeleteResponse> {
    let mut data = state.data.lock().await;
    let deleted = data.delete_user(&user_id);
    persist_data(&state.data_path, &data).await?;

    info!(user_id = %user_id, deleted, "user deleted");
    Ok(Json(ApiResponse::success(DeleteResponse { deleted })))
}

fn optional_date(name: &str, value: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => parse_date_key(value)
            .map(Some)
            .ok_or_else(|| AppError::bad_request(format!("{name} must be YYYY-MM-DD"))),
    }
}

fn check_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), AppError> {
    match (start, end) {
        (Some(start), Some(end)) if start > end => {
            Err(AppError::bad_request("startDate must not be after endDate"))
        }
        _ => Ok(()),
    }
}

/// Rejects explicit windows that would produce oversized reports.
fn check_stats_window(
    kind: StatsKind,
    start: Option<NaiveDate>,
    end: NaiveDate,
) -> Result<(), AppError> {
    let Some(start) = start else {
        return Ok(());
    };
    match kind {
        StatsKind::Daily if (end - start).num_days() >= MAX_DAILY_RANGE_DAYS => Err(
            AppError::bad_request(format!("daily stats cover at most {MAX_DAILY_RANGE_DAYS} days")),
        ),
        StatsKind::Monthly if months_spanned(start, end) > MAX_MONTHLY_RANGE_MONTHS => {
            Err(AppError::bad_request(format!(
                "monthly stats cover at most {MAX_MONTHLY_RANGE_MONTHS} months"
            )))
        }
        _ => Ok(()),
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_date_accepts_blank_and_rejects_garbage() {
        assert_eq!(optional_date("date", None).unwrap(), None);
        assert_eq!(optional_date("date", Some("  ")).unwrap(), None);
        assert_eq!(
            optional_date("date", Some("2025-01-03")).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 3)
        );
        let err = optional_date("date", Some("yesterday")).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn oversized_stats_windows_are_rejected() {
        let start = NaiveDate::from_ymd_opt(1, 1, 1);
        let end = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        let err = check_stats_window(StatsKind::Monthly, start, end).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
        assert!(check_stats_window(StatsKind::Daily, start, end).is_err());

        let recent = NaiveDate::from_ymd_opt(2024, 1, 1);
        let now = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        assert!(check_stats_window(StatsKind::Monthly, recent, now).is_ok());
        assert!(check_stats_window(StatsKind::Overview, start, end).is_ok());
        assert!(check_stats_window(StatsKind::Monthly, None, end).is_ok());
    }

    #[test]
    fn reversed_range_is_rejected() {
        let a = NaiveDate::from_ymd_opt(2025, 1, 1);
        let b = NaiveDate::from_ymd_opt(2025, 1, 2);
        assert!(check_range(a, b).is_ok());
        assert!(check_range(b, a).is_err());
        assert!(check_range(None, a).is_ok());
    }
}
