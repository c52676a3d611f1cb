use crate::database::Database;
use crate::history::CheckInHistory;
use crate::models::{
    DailyPoint, MonthlyPoint, OverviewStats, StatsKind, StatsReport, StreakStats, TaskStreak,
};
use crate::streak;
use chrono::{Datelike, Duration, Local, NaiveDate};

pub const MAX_DAILY_RANGE_DAYS: i64 = 366;
pub const MAX_MONTHLY_RANGE_MONTHS: i64 = 120;

/// Calendar months touched by `start..=end`, counting both ends.
pub fn months_spanned(start: NaiveDate, end: NaiveDate) -> i64 {
    let index = |date: NaiveDate| i64::from(date.year()) * 12 + i64::from(date.month0());
    index(end) - index(start) + 1
}

pub fn build_stats(
    data: &Database,
    user_id: &str,
    kind: StatsKind,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> StatsReport {
    build_stats_at(Local::now().date_naive(), data, user_id, kind, start, end)
}

pub fn build_stats_at(
    today: NaiveDate,
    data: &Database,
    user_id: &str,
    kind: StatsKind,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> StatsReport {
    let history = data.history_for(user_id);
    let task_ids: Vec<&str> = data.active_tasks().iter().map(|task| task.id.as_str()).collect();

    match kind {
        StatsKind::Overview => {
            StatsReport::Overview(overview(today, &history, &task_ids, start, end))
        }
        StatsKind::Streak => StatsReport::Streak(streaks(today, &history, data)),
        StatsKind::Daily => StatsReport::Daily {
            days: daily(today, &history, &task_ids, start, end),
        },
        StatsKind::Monthly => StatsReport::Monthly {
            months: monthly(today, &history, start, end),
        },
    }
}

fn overview(
    today: NaiveDate,
    history: &CheckInHistory,
    task_ids: &[&str],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> OverviewStats {
    let end = end.unwrap_or(today);
    let in_range: Vec<(NaiveDate, String)> = history
        .completed_pairs()
        .into_iter()
        .filter(|(date, _)| start.is_none_or(|start| *date >= start) && *date <= end)
        .collect();

    let first = start
        .or_else(|| in_range.first().map(|(date, _)| *date))
        .unwrap_or(end);
    let days = if first > end { 0 } else { (end - first).num_days() + 1 };

    let mut active_days: Vec<NaiveDate> = in_range.iter().map(|(date, _)| *date).collect();
    active_days.dedup();

    let tracked = in_range
        .iter()
        .filter(|(_, task_id)| task_ids.contains(&task_id.as_str()))
        .count() as u64;
    let possible = task_ids.len() as u64 * days as u64;
    let completion_rate = percentage(tracked, possible).min(100);

    let summary = streak::summarize(history, today);
    OverviewStats {
        total_check_ins: in_range.len() as u64,
        active_days: active_days.len() as u32,
        total_tasks: task_ids.len() as u32,
        completion_rate,
        current_streak: summary.current,
        longest_streak: summary.longest,
    }
}

fn streaks(today: NaiveDate, history: &CheckInHistory, data: &Database) -> StreakStats {
    let tasks = data
        .active_tasks()
        .into_iter()
        .map(|task| TaskStreak {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            current: streak::current_streak_for_task(history, &task.id, today),
            longest: streak::longest_streak_for_task(history, &task.id),
        })
        .collect();

    StreakStats {
        overall: streak::summarize(history, today),
        tasks,
    }
}

fn daily(
    today: NaiveDate,
    history: &CheckInHistory,
    task_ids: &[&str],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Vec<DailyPoint> {
    let end = end.unwrap_or(today);
    let start = start.unwrap_or(end - Duration::days(6));
    let span = (end - start).num_days().clamp(-1, MAX_DAILY_RANGE_DAYS - 1);

    let total = task_ids.len() as u32;
    (0..=span)
        .map(|offset| {
            let date = start + Duration::days(offset);
            let completed = history.completed_on(date, task_ids) as u32;
            DailyPoint {
                date,
                completed,
                total,
                percentage: percentage(u64::from(completed), u64::from(total)),
            }
        })
        .collect()
}

fn monthly(
    today: NaiveDate,
    history: &CheckInHistory,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Vec<MonthlyPoint> {
    const DEFAULT_MONTHS: u32 = 6;

    let end = end.unwrap_or(today);
    let start = start.unwrap_or_else(|| months_before(month_start(end), DEFAULT_MONTHS - 1));
    let pairs = history.completed_pairs();

    let mut months = Vec::new();
    let mut month = month_start(start);
    while month <= end && (months.len() as i64) < MAX_MONTHLY_RANGE_MONTHS {
        let next = next_month(month);
        let from = month.max(start);
        let to = (next - Duration::days(1)).min(end);

        let in_month: Vec<NaiveDate> = pairs
            .iter()
            .map(|(date, _)| *date)
            .filter(|date| *date >= from && *date <= to)
            .collect();
        let mut active = in_month.clone();
        active.dedup();

        let counted_until = to.min(today);
        let days_counted = if counted_until < from {
            0
        } else {
            (counted_until - from).num_days() as u32 + 1
        };
        let denom = if days_counted == 0 { 1.0 } else { f64::from(days_counted) };

        months.push(MonthlyPoint {
            month: month_label(month),
            check_ins: in_month.len() as u64,
            active_days: active.len() as u32,
            days_counted,
            average_per_day: in_month.len() as f64 / denom,
        });
        month = next;
    }
    months
}

fn percentage(part: u64, whole: u64) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as u32
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

fn next_month(first: NaiveDate) -> NaiveDate {
    let (year, month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(first + Duration::days(31))
}

fn months_before(first: NaiveDate, count: u32) -> NaiveDate {
    let index = first.year() * 12 + first.month0() as i32 - count as i32;
    NaiveDate::from_ymd_opt(index.div_euclid(12), index.rem_euclid(12) as u32 + 1, 1).unwrap_or(first)
}

fn month_label(date: NaiveDate) -> String {
    format!("{}-{:02}", date.year(), date.month())
}
