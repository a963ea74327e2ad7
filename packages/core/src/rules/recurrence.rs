//! Recurrence scheduling.
//!
//! Two anchoring strategies:
//!
//! - `Schedule`: calendar-based. Math runs on UTC date components and the
//!   result is UTC midnight, so a "due Monday" task stays a Monday task
//!   regardless of when it was finished.
//! - `Completion`: instant-based. The next occurrence preserves the
//!   completion's time of day.
//!
//! In either mode the result advances by whole intervals until it is
//! strictly after the completion instant, so finishing a long-overdue task
//! never spawns a successor that is itself already overdue.

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Utc};

use crate::models::{Recurrence, RecurrenceAnchor, RecurrenceEnd, RecurrenceFrequency, Task};

/// Does completing this task spawn a successor?
/// Requires a rule whose end-by-date (if any) has not passed.
pub fn should_recur(task: &Task) -> bool {
    let Some(rule) = &task.recurrence else {
        return false;
    };
    match rule.end_condition {
        Some(RecurrenceEnd::Date { value }) => {
            value == 0 || Utc::now().timestamp_millis() <= value
        }
        None => true,
    }
}

/// Due date (epoch millis) of the successor spawned at `completed_at`.
///
/// Schedule-anchored rules advance from `previous_due` when present,
/// falling back to the completion instant; either way the base is floored
/// to UTC midnight first. Completion-anchored rules advance from the
/// completion instant itself.
pub fn next_due_date(rule: &Recurrence, previous_due: Option<i64>, completed_at: i64) -> i64 {
    let interval = rule.interval.max(1);

    let start = match rule.anchor {
        RecurrenceAnchor::Schedule => {
            utc_midnight(previous_due.filter(|ms| *ms != 0).unwrap_or(completed_at))
        }
        RecurrenceAnchor::Completion => utc_moment(completed_at),
    };

    let mut next = advance(start, rule, interval);
    while next.timestamp_millis() <= completed_at {
        let advanced = advance(next, rule, interval);
        if advanced <= next {
            // Stalled arithmetic at the calendar's bounds.
            break;
        }
        next = advanced;
    }
    next.timestamp_millis()
}

/// One interval forward. Month/year addition clamps the day-of-month at the
/// end of the target month (Jan 31 + 1 month = Feb 28/29).
fn advance(moment: DateTime<Utc>, rule: &Recurrence, interval: u32) -> DateTime<Utc> {
    match rule.frequency {
        RecurrenceFrequency::Daily => moment + Duration::days(i64::from(interval)),
        RecurrenceFrequency::Weekly => advance_weekly(moment, rule, interval),
        RecurrenceFrequency::Monthly => moment
            .checked_add_months(Months::new(interval))
            .unwrap_or(moment),
        RecurrenceFrequency::Yearly => moment
            .checked_add_months(Months::new(interval.saturating_mul(12)))
            .unwrap_or(moment),
    }
}

/// Weekly stepping. With selected weekdays, jump to the next selected day
/// strictly after the current one; once the week is exhausted, wrap to the
/// first selected day of the next period (`interval - 1` whole weeks in
/// between). Without a selection, step whole weeks.
fn advance_weekly(moment: DateTime<Utc>, rule: &Recurrence, interval: u32) -> DateTime<Utc> {
    let mut days: Vec<u8> = rule
        .days_of_week
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .copied()
        .filter(|day| *day < 7)
        .collect();

    if days.is_empty() {
        return moment + Duration::weeks(i64::from(interval));
    }
    days.sort_unstable();
    days.dedup();

    // 0 = Sunday .. 6 = Saturday.
    let current = moment.weekday().num_days_from_sunday();
    let step = match days.iter().find(|day| u32::from(**day) > current) {
        Some(next_day) => u32::from(*next_day) - current,
        None => (7 - current) + u32::from(days[0]) + (interval - 1) * 7,
    };
    moment + Duration::days(i64::from(step))
}

fn utc_moment(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn utc_midnight(millis: i64) -> DateTime<Utc> {
    let moment = utc_moment(millis);
    moment
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(moment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskDraft, Visibility};

    fn ms(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .unwrap()
            .timestamp_millis()
    }

    fn daily() -> Recurrence {
        Recurrence::new(RecurrenceFrequency::Daily)
    }

    #[test]
    fn test_overdue_completion_never_yields_past_due_date() {
        // Due June 1, finished June 11 at 09:30. A plain +1 day from the
        // old due date would still be two weeks stale.
        let due = ms(2025, 6, 1, 0, 0);
        let completed = ms(2025, 6, 11, 9, 30);

        let next = next_due_date(&daily(), Some(due), completed);

        assert!(next > completed);
        assert_eq!(next, ms(2025, 6, 12, 0, 0));
    }

    #[test]
    fn test_on_time_completion_advances_one_interval() {
        let due = ms(2025, 6, 1, 0, 0);
        let completed = ms(2025, 6, 1, 8, 0);

        assert_eq!(
            next_due_date(&daily(), Some(due), completed),
            ms(2025, 6, 2, 0, 0)
        );
    }

    #[test]
    fn test_schedule_mode_without_prior_due_floors_to_midnight() {
        let completed = ms(2025, 6, 3, 14, 45);
        assert_eq!(next_due_date(&daily(), None, completed), ms(2025, 6, 4, 0, 0));
    }

    #[test]
    fn test_weekly_picks_next_selected_day() {
        // 2025-06-02 is a Monday (day 1). Selected Monday + Wednesday.
        let rule = Recurrence::new(RecurrenceFrequency::Weekly).with_days_of_week(vec![1, 3]);
        let due = ms(2025, 6, 2, 0, 0);
        let completed = ms(2025, 6, 2, 10, 0);

        assert_eq!(
            next_due_date(&rule, Some(due), completed),
            ms(2025, 6, 4, 0, 0)
        );
    }

    #[test]
    fn test_weekly_wraps_with_interval_gap() {
        // Only Mondays, every 2 weeks: from a Monday the next hit is the
        // Monday after skipping one full week.
        let rule = Recurrence::new(RecurrenceFrequency::Weekly)
            .with_interval(2)
            .with_days_of_week(vec![1]);
        let due = ms(2025, 6, 2, 0, 0);
        let completed = ms(2025, 6, 2, 10, 0);

        assert_eq!(
            next_due_date(&rule, Some(due), completed),
            ms(2025, 6, 16, 0, 0)
        );
    }

    #[test]
    fn test_monthly_clamps_day_of_month() {
        let rule = Recurrence::new(RecurrenceFrequency::Monthly);
        let due = ms(2025, 1, 31, 0, 0);
        let completed = ms(2025, 1, 31, 18, 0);

        assert_eq!(
            next_due_date(&rule, Some(due), completed),
            ms(2025, 2, 28, 0, 0)
        );
    }

    #[test]
    fn test_yearly_clamps_leap_day() {
        let rule = Recurrence::new(RecurrenceFrequency::Yearly);
        let due = ms(2024, 2, 29, 0, 0);
        let completed = ms(2024, 2, 29, 12, 0);

        assert_eq!(
            next_due_date(&rule, Some(due), completed),
            ms(2025, 2, 28, 0, 0)
        );
    }

    #[test]
    fn test_completion_anchor_preserves_time_of_day() {
        let rule = Recurrence::new(RecurrenceFrequency::Daily)
            .with_interval(2)
            .with_anchor(RecurrenceAnchor::Completion);
        let completed = ms(2025, 6, 1, 15, 30);

        assert_eq!(next_due_date(&rule, None, completed), ms(2025, 6, 3, 15, 30));
    }

    #[test]
    fn test_should_recur_respects_end_date() {
        let owner = "u1".to_string();
        let future_end = Utc::now().timestamp_millis() + 86_400_000;
        let past_end = 1_000;

        let open = Task::from_draft(
            TaskDraft::new("water plants")
                .with_recurrence(daily().with_end_date(future_end)),
            owner.clone(),
            Visibility::Private,
        );
        assert!(should_recur(&open));

        let ended = Task::from_draft(
            TaskDraft::new("water plants").with_recurrence(daily().with_end_date(past_end)),
            owner.clone(),
            Visibility::Private,
        );
        assert!(!should_recur(&ended));

        let plain = Task::from_draft(TaskDraft::new("one-off"), owner, Visibility::Private);
        assert!(!should_recur(&plain));
    }
}
