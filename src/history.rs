use crate::models::{date_key, parse_date_key, CheckIn};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-day completion map: `YYYY-MM-DD -> task id -> completed`.
///
/// Keys are kept as strings so a blob written by an older client with an
/// unparseable or non-canonical key (`2025-1-3`) still loads; such keys are
/// ignored by every date-based view and count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckInHistory {
    days: BTreeMap<String, BTreeMap<String, bool>>,
}

impl CheckInHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_check_ins(check_ins: &[CheckIn]) -> Self {
        let mut history = Self::new();
        for check_in in check_ins {
            history.set(check_in.date, &check_in.task_id, true);
        }
        history
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn day(&self, date: NaiveDate) -> Option<&BTreeMap<String, bool>> {
        self.days.get(&date_key(date))
    }

    pub fn is_checked(&self, date: NaiveDate, task_id: &str) -> bool {
        self.day(date)
            .and_then(|tasks| tasks.get(task_id))
            .copied()
            .unwrap_or(false)
    }

    pub fn set(&mut self, date: NaiveDate, task_id: &str, checked: bool) {
        self.days
            .entry(date_key(date))
            .or_default()
            .insert(task_id.to_string(), checked);
    }

    /// Flips one entry and returns the new state.
    pub fn toggle(&mut self, date: NaiveDate, task_id: &str) -> bool {
        let checked = !self.is_checked(date, task_id);
        self.set(date, task_id, checked);
        checked
    }

    pub fn day_has_completion(&self, date: NaiveDate) -> bool {
        self.day(date)
            .is_some_and(|tasks| tasks.values().any(|checked| *checked))
    }

    /// Dates with at least one completion, ascending.
    pub fn completed_dates(&self) -> Vec<NaiveDate> {
        self.parsed_days()
            .filter(|(_, tasks)| tasks.values().any(|checked| *checked))
            .map(|(date, _)| date)
            .collect()
    }

    pub fn completed_dates_for_task(&self, task_id: &str) -> Vec<NaiveDate> {
        self.parsed_days()
            .filter(|(_, tasks)| tasks.get(task_id).copied().unwrap_or(false))
            .map(|(date, _)| date)
            .collect()
    }

    /// Every `(date, task)` marked complete, date-ascending.
    pub fn completed_pairs(&self) -> Vec<(NaiveDate, String)> {
        self.parsed_days()
            .flat_map(|(date, tasks)| {
                tasks
                    .iter()
                    .filter(|(_, checked)| **checked)
                    .map(move |(task_id, _)| (date, task_id.clone()))
            })
            .collect()
    }

    pub fn count_completed(&self) -> usize {
        self.parsed_days()
            .map(|(_, tasks)| tasks.values().filter(|checked| **checked).count())
            .sum()
    }

    pub fn completed_on(&self, date: NaiveDate, task_ids: &[&str]) -> usize {
        task_ids
            .iter()
            .filter(|task_id| self.is_checked(date, task_id))
            .count()
    }

    /// Union of both histories. A date or task present on either side is kept,
    /// and `true` wins over `false` when both sides carry the same entry.
    pub fn merge(&mut self, other: &CheckInHistory) {
        for (date, tasks) in &other.days {
            let day = self.days.entry(date.clone()).or_default();
            for (task_id, checked) in tasks {
                let entry = day.entry(task_id.clone()).or_insert(false);
                *entry = *entry || *checked;
            }
        }
    }

    pub fn date_keys(&self) -> impl Iterator<Item = &str> {
        self.days.keys().map(String::as_str)
    }

    fn parsed_days(&self) -> impl Iterator<Item = (NaiveDate, &BTreeMap<String, bool>)> {
        self.days
            .iter()
            .filter_map(|(key, tasks)| parse_date_key(key).map(|date| (date, tasks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn toggle_twice_restores_original_state() {
        let mut history = CheckInHistory::new();
        history.set(day(1), "t1", true);
        let before = history.is_checked(day(1), "t1");

        history.toggle(day(1), "t1");
        assert_ne!(history.is_checked(day(1), "t1"), before);
        history.toggle(day(1), "t1");
        assert_eq!(history.is_checked(day(1), "t1"), before);

        assert!(history.toggle(day(2), "t2"));
        assert!(!history.toggle(day(2), "t2"));
        assert!(!history.is_checked(day(2), "t2"));
    }

    #[test]
    fn all_false_day_has_no_completion() {
        let mut history = CheckInHistory::new();
        history.set(day(1), "t1", false);
        history.set(day(1), "t2", false);
        assert!(!history.day_has_completion(day(1)));
        assert!(history.completed_dates().is_empty());
        assert_eq!(history.count_completed(), 0);
    }

    #[test]
    fn completed_pairs_are_date_ordered() {
        let mut history = CheckInHistory::new();
        history.set(day(3), "b", true);
        history.set(day(1), "a", true);
        history.set(day(1), "c", false);
        history.set(day(2), "a", true);

        assert_eq!(
            history.completed_pairs(),
            vec![
                (day(1), "a".to_string()),
                (day(2), "a".to_string()),
                (day(3), "b".to_string()),
            ]
        );
        assert_eq!(history.count_completed(), 3);
    }

    #[test]
    fn merge_keeps_local_only_dates_and_true_wins() {
        let mut local = CheckInHistory::new();
        local.set(day(1), "t1", true);
        local.set(day(2), "t1", false);

        let mut cloud = CheckInHistory::new();
        cloud.set(day(2), "t1", true);
        cloud.set(day(2), "t2", false);
        cloud.set(day(3), "t1", true);

        local.merge(&cloud);

        assert!(local.is_checked(day(1), "t1"));
        assert!(local.is_checked(day(2), "t1"));
        assert!(!local.is_checked(day(2), "t2"));
        assert!(local.is_checked(day(3), "t1"));
        assert_eq!(local.date_keys().count(), 3);

        let mut stale = CheckInHistory::new();
        stale.set(day(1), "t1", false);
        local.merge(&stale);
        assert!(local.is_checked(day(1), "t1"));
    }

    #[test]
    fn builds_from_check_in_rows() {
        let rows = vec![
            CheckIn {
                user_id: "u".to_string(),
                task_id: "t1".to_string(),
                date: day(4),
                checked_at: Utc::now(),
                note: None,
            },
            CheckIn {
                user_id: "u".to_string(),
                task_id: "t2".to_string(),
                date: day(4),
                checked_at: Utc::now(),
                note: Some("late".to_string()),
            },
        ];

        let history = CheckInHistory::from_check_ins(&rows);
        assert!(history.is_checked(day(4), "t1"));
        assert!(history.is_checked(day(4), "t2"));
        assert_eq!(history.completed_dates(), vec![day(4)]);
    }

    #[test]
    fn serializes_as_plain_date_map() {
        let mut history = CheckInHistory::new();
        history.set(day(1), "t1", true);
        let value = serde_json::to_value(&history).unwrap();
        assert_eq!(value, serde_json::json!({ "2025-01-01": { "t1": true } }));

        let parsed: CheckInHistory =
            serde_json::from_value(serde_json::json!({ "garbage": { "t1": true } })).unwrap();
        assert!(parsed.completed_dates().is_empty());
        assert_eq!(parsed.count_completed(), 0);
    }

    #[test]
    fn unpadded_date_keys_are_ignored_consistently() {
        let history: CheckInHistory = serde_json::from_value(serde_json::json!({
            "2025-1-3": { "t1": true },
            "2025-01-02": { "t1": true }
        }))
        .unwrap();

        assert!(!history.is_checked(day(3), "t1"));
        assert_eq!(history.completed_dates(), vec![day(2)]);
        assert_eq!(history.completed_pairs(), vec![(day(2), "t1".to_string())]);
        assert_eq!(history.count_completed(), 1);
    }
}
