use crate::history::CheckInHistory;
use crate::models::{
    default_task_groups, CheckIn, Task, TaskGroup, TaskGroupWithStatus, ToggleAction,
    ToggleResponse, UserProfile, UserSettings, UserUpdate,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything the server persists. Check-ins are unique per
/// (user, task, date); toggling is the only way to create or remove one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(default)]
    pub users: BTreeMap<String, UserProfile>,
    #[serde(default)]
    pub task_groups: Vec<TaskGroup>,
    #[serde(default)]
    pub check_ins: Vec<CheckIn>,
}

impl Database {
    pub fn seeded() -> Self {
        Self {
            task_groups: default_task_groups(),
            ..Self::default()
        }
    }

    /// Provisions the user on first sight. Returns true when a row was created.
    pub fn ensure_user(&mut self, user_id: &str, now: DateTime<Utc>) -> bool {
        if self.users.contains_key(user_id) {
            return false;
        }
        self.users.insert(
            user_id.to_string(),
            UserProfile {
                id: user_id.to_string(),
                name: None,
                email: None,
                settings: UserSettings::default(),
                created_at: now,
            },
        );
        true
    }

    pub fn user(&self, user_id: &str) -> Option<&UserProfile> {
        self.users.get(user_id)
    }

    pub fn update_user(&mut self, user_id: &str, update: UserUpdate) -> Option<UserProfile> {
        let user = self.users.get_mut(user_id)?;
        if let Some(name) = update.name {
            user.name = Some(name);
        }
        if let Some(email) = update.email {
            user.email = Some(email);
        }
        if let Some(settings) = update.settings {
            user.settings = settings;
        }
        Some(user.clone())
    }

    /// Removes the user and every check-in they own.
    pub fn delete_user(&mut self, user_id: &str) -> bool {
        self.check_ins.retain(|check_in| check_in.user_id != user_id);
        self.users.remove(user_id).is_some()
    }

    pub fn find_task(&self, task_id: &str) -> Option<&Task> {
        self.task_groups
            .iter()
            .flat_map(|group| group.tasks.iter())
            .find(|task| task.id == task_id)
    }

    pub fn active_tasks(&self) -> Vec<&Task> {
        let mut groups: Vec<&TaskGroup> =
            self.task_groups.iter().filter(|group| group.is_active).collect();
        groups.sort_by_key(|group| group.order);
        groups.into_iter().flat_map(|group| group.active_tasks()).collect()
    }

    pub fn toggle_check_in(
        &mut self,
        user_id: &str,
        task_id: &str,
        date: NaiveDate,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> ToggleResponse {
        if self.remove_check_in(user_id, task_id, date) {
            return ToggleResponse {
                action: ToggleAction::Unchecked,
                check_in: None,
            };
        }

        let check_in = CheckIn {
            user_id: user_id.to_string(),
            task_id: task_id.to_string(),
            date,
            checked_at: now,
            note,
        };
        self.check_ins.push(check_in.clone());
        ToggleResponse {
            action: ToggleAction::Checked,
            check_in: Some(check_in),
        }
    }

    pub fn remove_check_in(&mut self, user_id: &str, task_id: &str, date: NaiveDate) -> bool {
        let before = self.check_ins.len();
        self.check_ins.retain(|check_in| {
            !(check_in.user_id == user_id && check_in.task_id == task_id && check_in.date == date)
        });
        self.check_ins.len() != before
    }

    /// A user's check-ins within an inclusive range, ordered by date then task.
    pub fn check_ins_for(
        &self,
        user_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        task_id: Option<&str>,
    ) -> Vec<CheckIn> {
        let mut rows: Vec<CheckIn> = self
            .check_ins
            .iter()
            .filter(|check_in| check_in.user_id == user_id)
            .filter(|check_in| start.is_none_or(|start| check_in.date >= start))
            .filter(|check_in| end.is_none_or(|end| check_in.date <= end))
            .filter(|check_in| task_id.is_none_or(|task_id| check_in.task_id == task_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.task_id.cmp(&b.task_id)));
        rows
    }

    pub fn history_for(&self, user_id: &str) -> CheckInHistory {
        CheckInHistory::from_check_ins(&self.check_ins_for(user_id, None, None, None))
    }

    /// Groups in display order, with per-task completion for `date` when given.
    pub fn groups_with_status(&self, user_id: &str, date: Option<NaiveDate>) -> Vec<TaskGroupWithStatus> {
        let history = date.map(|_| self.history_for(user_id));
        let mut groups: Vec<&TaskGroup> = self.task_groups.iter().collect();
        groups.sort_by_key(|group| group.order);
        groups
            .into_iter()
            .map(|group| {
                TaskGroupWithStatus::from_group(group, |task| {
                    match (&history, date) {
                        (Some(history), Some(date)) => Some(history.is_checked(date, &task.id)),
                        _ => None,
                    }
                })
            })
            .collect()
    }
}
