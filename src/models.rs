use crate::history::CheckInHistory;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parses a canonical `YYYY-MM-DD` key. Unpadded or padded-with-space forms
/// are rejected so every accepted key round-trips through `date_key`.
pub fn parse_date_key(value: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(value, DATE_FORMAT).ok()?;
    (date_key(date) == value).then_some(date)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub order: u32,
    pub is_active: bool,
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroup {
    pub id: String,
    pub title: String,
    pub theme: String,
    pub order: u32,
    pub is_default: bool,
    pub is_active: bool,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TaskGroup {
    /// Active tasks in display order.
    pub fn active_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.iter().filter(|task| task.is_active).collect();
        tasks.sort_by_key(|task| task.order);
        tasks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub user_id: String,
    pub task_id: String,
    pub date: NaiveDate,
    pub checked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakInfo {
    pub current: u32,
    pub longest: u32,
    pub total_days: u32,
    #[serde(default)]
    pub last_active: Option<NaiveDate>,
}

/// Everything the coordinator tracks for one data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    #[serde(default)]
    pub task_groups: Vec<TaskGroup>,
    #[serde(default)]
    pub check_in_history: CheckInHistory,
    #[serde(default)]
    pub streak: StreakInfo,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl AppData {
    pub fn seeded() -> Self {
        Self {
            task_groups: default_task_groups(),
            ..Self::default()
        }
    }

    pub fn find_task(&self, task_id: &str) -> Option<&Task> {
        self.task_groups
            .iter()
            .flat_map(|group| group.tasks.iter())
            .find(|task| task.id == task_id)
    }

    /// Active tasks of active groups, groups and tasks both in display order.
    pub fn active_tasks(&self) -> Vec<(&TaskGroup, &Task)> {
        let mut groups: Vec<&TaskGroup> =
            self.task_groups.iter().filter(|group| group.is_active).collect();
        groups.sort_by_key(|group| group.order);
        groups
            .into_iter()
            .flat_map(|group| group.active_tasks().into_iter().map(move |task| (group, task)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudData {
    #[serde(flatten)]
    pub data: AppData,
    pub last_synced: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWithStatus {
    #[serde(flatten)]
    pub task: Task,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

/// Task group as returned by `GET /api/tasks`, optionally carrying per-task completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroupWithStatus {
    pub id: String,
    pub title: String,
    pub theme: String,
    pub order: u32,
    pub is_default: bool,
    pub is_active: bool,
    pub tasks: Vec<TaskWithStatus>,
}

impl TaskGroupWithStatus {
    pub fn from_group(group: &TaskGroup, completed: impl Fn(&Task) -> Option<bool>) -> Self {
        Self {
            id: group.id.clone(),
            title: group.title.clone(),
            theme: group.theme.clone(),
            order: group.order,
            is_default: group.is_default,
            is_active: group.is_active,
            tasks: group
                .tasks
                .iter()
                .map(|task| TaskWithStatus {
                    task: task.clone(),
                    completed: completed(task),
                })
                .collect(),
        }
    }

    pub fn into_group(self) -> TaskGroup {
        TaskGroup {
            id: self.id,
            title: self.title,
            theme: self.theme,
            order: self.order,
            is_default: self.is_default,
            is_active: self.is_active,
            tasks: self.tasks.into_iter().map(|status| status.task).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    pub task_id: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleAction {
    Checked,
    Unchecked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    pub action: ToggleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<CheckIn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckInQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsKind {
    Overview,
    Streak,
    Daily,
    Monthly,
}

impl StatsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overview => "overview",
            Self::Streak => "streak",
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "overview" => Some(Self::Overview),
            "streak" => Some(Self::Streak),
            "daily" => Some(Self::Daily),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsQuery {
    pub kind: StatsKind,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewStats {
    pub total_check_ins: u64,
    pub active_days: u32,
    pub total_tasks: u32,
    pub completion_rate: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStreak {
    pub task_id: String,
    pub task_name: String,
    pub current: u32,
    pub longest: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakStats {
    pub overall: StreakInfo,
    pub tasks: Vec<TaskStreak>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub completed: u32,
    pub total: u32,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPoint {
    pub month: String,
    pub check_ins: u64,
    pub active_days: u32,
    pub days_counted: u32,
    pub average_per_day: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StatsReport {
    Overview(OverviewStats),
    Streak(StreakStats),
    Daily { days: Vec<DailyPoint> },
    Monthly { months: Vec<MonthlyPoint> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub timezone: String,
    #[serde(default)]
    pub reminder_time: Option<String>,
    #[serde(default)]
    pub week_starts_on_monday: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            reminder_time: None,
            week_starts_on_monday: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub settings: UserSettings,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<UserSettings>,
}

/// Envelope shared by every API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub fn default_task_groups() -> Vec<TaskGroup> {
    let seed: [(&str, &str, &str, &[(&str, &str)]); 3] = [
        (
            "morning",
            "Morning Routine",
            "sunrise",
            &[
                ("morning-water", "Drink a glass of water"),
                ("morning-stretch", "Stretch for 5 minutes"),
                ("morning-plan", "Plan the day"),
            ],
        ),
        (
            "health",
            "Health",
            "forest",
            &[
                ("health-exercise", "Exercise 30 minutes"),
                ("health-vegetables", "Eat vegetables"),
                ("health-sleep", "In bed by 11pm"),
            ],
        ),
        (
            "growth",
            "Growth",
            "ocean",
            &[
                ("growth-read", "Read 20 pages"),
                ("growth-practice", "Practice a skill"),
                ("growth-journal", "Write a journal entry"),
            ],
        ),
    ];

    seed.iter()
        .enumerate()
        .map(|(group_index, (id, title, theme, tasks))| TaskGroup {
            id: id.to_string(),
            title: title.to_string(),
            theme: theme.to_string(),
            order: group_index as u32,
            is_default: group_index == 0,
            is_active: true,
            tasks: tasks
                .iter()
                .enumerate()
                .map(|(task_index, (task_id, name))| Task {
                    id: task_id.to_string(),
                    name: name.to_string(),
                    order: task_index as u32,
                    is_active: true,
                    group_id: id.to_string(),
                })
                .collect(),
        })
        .collect()
}
