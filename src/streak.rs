use crate::history::CheckInHistory;
use crate::models::StreakInfo;
use chrono::{Duration, NaiveDate};

/// Consecutive active days ending today, or ending yesterday when today has
/// no completion yet. A day counts when at least one task is checked.
pub fn current_streak(history: &CheckInHistory, today: NaiveDate) -> u32 {
    count_back(today, |date| history.day_has_completion(date))
}

pub fn current_streak_for_task(history: &CheckInHistory, task_id: &str, today: NaiveDate) -> u32 {
    count_back(today, |date| history.is_checked(date, task_id))
}

pub fn longest_streak(history: &CheckInHistory) -> u32 {
    longest_run(&history.completed_dates())
}

pub fn longest_streak_for_task(history: &CheckInHistory, task_id: &str) -> u32 {
    longest_run(&history.completed_dates_for_task(task_id))
}

pub fn summarize(history: &CheckInHistory, today: NaiveDate) -> StreakInfo {
    let dates = history.completed_dates();
    StreakInfo {
        current: current_streak(history, today),
        longest: longest_run(&dates),
        total_days: dates.len() as u32,
        last_active: dates.last().copied(),
    }
}

fn count_back(today: NaiveDate, is_active: impl Fn(NaiveDate) -> bool) -> u32 {
    let mut day = if is_active(today) {
        today
    } else {
        today - Duration::days(1)
    };

    let mut streak = 0;
    while is_active(day) {
        streak += 1;
        match day.pred_opt() {
            Some(previous) => day = previous,
            None => break,
        }
    }
    streak
}

/// Longest run of dates exactly one day apart. Input must be ascending.
fn longest_run(dates: &[NaiveDate]) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;

    for date in dates {
        run = match previous {
            Some(prev) if *date - prev == Duration::days(1) => run + 1,
            Some(prev) if *date == prev => run,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(*date);
    }

    longest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn history_with(days: &[u32], task_id: &str) -> CheckInHistory {
        let mut history = CheckInHistory::new();
        for d in days {
            history.set(day(*d), task_id, true);
        }
        history
    }

    #[test]
    fn streak_continues_from_yesterday_until_today_is_checked() {
        let mut history = history_with(&[1, 2], "t1");
        assert_eq!(current_streak(&history, day(3)), 2);

        history.toggle(day(3), "t1");
        assert_eq!(current_streak(&history, day(3)), 3);
    }

    #[test]
    fn streak_counts_consecutive_days_ending_today() {
        let history = history_with(&[2, 3, 4, 5, 6, 8, 9, 10], "t1");
        assert_eq!(current_streak(&history, day(10)), 3);
        assert_eq!(longest_streak(&history), 5);
    }

    #[test]
    fn gap_of_two_days_resets_current_streak() {
        let history = history_with(&[1, 2, 3], "t1");
        assert_eq!(current_streak(&history, day(5)), 0);
        assert_eq!(longest_streak(&history), 3);
    }

    #[test]
    fn all_false_day_breaks_the_chain() {
        let mut history = history_with(&[1, 3], "t1");
        history.set(day(2), "t1", false);
        assert_eq!(current_streak(&history, day(3)), 1);
        assert_eq!(longest_streak(&history), 1);
    }

    #[test]
    fn per_task_streaks_ignore_other_tasks() {
        let mut history = history_with(&[1, 2, 3], "t1");
        history.set(day(2), "t2", true);
        history.set(day(3), "t2", true);

        assert_eq!(current_streak_for_task(&history, "t2", day(3)), 2);
        assert_eq!(longest_streak_for_task(&history, "t1"), 3);
        assert_eq!(longest_streak_for_task(&history, "missing"), 0);
    }

    #[test]
    fn streaks_cross_month_boundaries() {
        let mut history = CheckInHistory::new();
        history.set(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(), "t1", true);
        history.set(day(1), "t1", true);
        assert_eq!(current_streak(&history, day(1)), 2);
    }

    #[test]
    fn summary_reports_totals() {
        let history = history_with(&[1, 2, 5], "t1");
        let summary = summarize(&history, day(5));
        assert_eq!(summary.current, 1);
        assert_eq!(summary.longest, 2);
        assert_eq!(summary.total_days, 3);
        assert_eq!(summary.last_active, Some(day(5)));

        let empty = summarize(&CheckInHistory::new(), day(5));
        assert_eq!(empty, StreakInfo::default());
    }
}
