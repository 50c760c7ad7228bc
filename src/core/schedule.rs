//! Due-time evaluation for scheduled tasks.

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::core::models::{BackupTask, Frequency};

/// Whether a task should run now. A task is due once its most recent
/// scheduled instant has passed and the previous run predates that instant
/// (daily), or lies at least a week before it (weekly). Paused tasks and
/// unparseable schedule times are never due.
pub fn is_due(task: &BackupTask, now: DateTime<Utc>) -> bool {
    if task.paused {
        return false;
    }
    let Some(scheduled) = last_scheduled_instant(&task.time_to_run, now) else {
        return false;
    };

    match task.last_run_at {
        None => true,
        Some(last) => match task.frequency {
            Frequency::Daily => last < scheduled,
            // Runs start a little after their slot (the poll loop ticks once
            // a minute), so the week is measured from the slot the previous
            // run belonged to, not from its wall-clock start.
            Frequency::Weekly => match last_scheduled_instant(&task.time_to_run, last) {
                Some(last_slot) => scheduled - last_slot >= Duration::days(7),
                None => false,
            },
        },
    }
}

/// The most recent instant at or before `now` matching the "HH:MM" time.
fn last_scheduled_instant(time_to_run: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(time_to_run, "%H:%M").ok()?;
    let today = now.date_naive().and_time(time).and_utc();
    Some(if today <= now {
        today
    } else {
        today - Duration::days(1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::TaskKind;
    use chrono::TimeZone;

    fn task(time_to_run: &str, frequency: Frequency) -> BackupTask {
        BackupTask {
            id: "task".into(),
            owner: "o@example.com".into(),
            label: "nightly".into(),
            remote_server_id: "srv".into(),
            destination_id: "dest".into(),
            kind: TaskKind::File,
            source_paths: vec!["/srv".into()],
            exclude_patterns: vec![],
            database_name: None,
            time_to_run: time_to_run.into(),
            frequency,
            paused: false,
            last_run_at: None,
            last_finished_at: None,
            last_status: None,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn never_run_task_is_due_after_its_time() {
        let t = task("02:30", Frequency::Daily);
        assert!(is_due(&t, at(3, 0)));
        // Before today's slot the previous day's slot applies, so still due.
        assert!(is_due(&t, at(1, 0)));
    }

    #[test]
    fn daily_task_runs_once_per_slot() {
        let mut t = task("02:30", Frequency::Daily);
        t.last_run_at = Some(at(2, 30));
        assert!(!is_due(&t, at(3, 0)));

        // Yesterday's run does not cover today's slot.
        t.last_run_at = Some(at(2, 30) - Duration::days(1));
        assert!(is_due(&t, at(3, 0)));
    }

    #[test]
    fn weekly_task_waits_a_full_week() {
        let mut t = task("02:30", Frequency::Weekly);
        t.last_run_at = Some(at(2, 30) - Duration::days(3));
        assert!(!is_due(&t, at(3, 0)));

        t.last_run_at = Some(at(2, 30) - Duration::days(7));
        assert!(is_due(&t, at(3, 0)));
    }

    #[test]
    fn weekly_cadence_is_anchored_to_the_slot_not_the_run_start() {
        let mut t = task("02:30", Frequency::Weekly);
        // The previous run started 40 seconds after its slot, as runs do.
        t.last_run_at = Some(at(2, 30) - Duration::days(7) + Duration::seconds(40));

        // Due from day 7's slot onwards, so the cadence stays weekly.
        assert!(is_due(&t, at(2, 30)));
        assert!(is_due(&t, at(2, 31)));
        assert!(is_due(&t, at(23, 59)));

        t.last_run_at = Some(at(2, 30) - Duration::days(6) + Duration::seconds(40));
        assert!(!is_due(&t, at(23, 59)));
    }

    #[test]
    fn paused_and_malformed_schedules_never_fire() {
        let mut t = task("02:30", Frequency::Daily);
        t.paused = true;
        assert!(!is_due(&t, at(3, 0)));

        let t = task("2:30am", Frequency::Daily);
        assert!(!is_due(&t, at(3, 0)));
    }
}
