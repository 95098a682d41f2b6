// Next-run-time computation
//
// Scheduled jobs tolerate drift: a missed slot fires once at the next poll
// and the following next_run_time is computed from now, not from the missed
// slot.

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;

use ambit_core::types::TriggerConfig;

/// Compute the next run time after `last_run`. Returns None for one-off
/// triggers (they never reschedule mechanically).
pub fn next_run_time(
    trigger: &TriggerConfig,
    last_run: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match trigger {
        TriggerConfig::OneOff { .. } => None,
        TriggerConfig::Scheduled {
            cron,
            interval_seconds,
        } => {
            if let Some(expr) = cron {
                next_cron_time(expr, last_run)
            } else {
                interval_seconds.map(|secs| last_run + Duration::seconds(secs))
            }
        }
        TriggerConfig::Ongoing {
            interval_seconds, ..
        } => Some(last_run + Duration::seconds(*interval_seconds)),
    }
}

/// Initial next_run_time at job creation. One-off jobs with dependencies get
/// None (the dependency resolver sets it later).
pub fn initial_run_time(
    trigger: &TriggerConfig,
    has_dependencies: bool,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match trigger {
        TriggerConfig::OneOff { run_at } => {
            if has_dependencies {
                None
            } else if *run_at <= now {
                Some(now)
            } else {
                Some(*run_at)
            }
        }
        TriggerConfig::Scheduled { .. } => next_run_time(trigger, now),
        // First probe immediately
        TriggerConfig::Ongoing { .. } => Some(now),
    }
}

fn next_cron_time(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    // Accept both 5-field crontab syntax and the 6/7-field form with seconds
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    match Schedule::from_str(&normalized) {
        Ok(schedule) => schedule.after(&after).next(),
        Err(e) => {
            tracing::warn!(cron = %expr, error = %e, "Invalid cron expression");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn interval_schedules_from_last_run() {
        let trigger = TriggerConfig::Scheduled {
            cron: None,
            interval_seconds: Some(3600),
        };
        assert_eq!(next_run_time(&trigger, at(9, 0)), Some(at(10, 0)));
    }

    #[test]
    fn cron_five_field_form_is_accepted() {
        let trigger = TriggerConfig::Scheduled {
            cron: Some("0 9 * * *".into()),
            interval_seconds: None,
        };
        let next = next_run_time(&trigger, at(10, 30)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn invalid_cron_yields_none() {
        let trigger = TriggerConfig::Scheduled {
            cron: Some("not a cron".into()),
            interval_seconds: None,
        };
        assert_eq!(next_run_time(&trigger, at(9, 0)), None);
    }

    #[test]
    fn one_off_never_reschedules() {
        let trigger = TriggerConfig::OneOff { run_at: at(9, 0) };
        assert_eq!(next_run_time(&trigger, at(9, 0)), None);
    }

    #[test]
    fn initial_time_rules() {
        let now = at(12, 0);

        // Future one-off runs at its slot
        let future = TriggerConfig::OneOff { run_at: at(15, 0) };
        assert_eq!(initial_run_time(&future, false, now), Some(at(15, 0)));

        // Past one-off (missed slot) fires now
        let past = TriggerConfig::OneOff { run_at: at(9, 0) };
        assert_eq!(initial_run_time(&past, false, now), Some(now));

        // One-off behind dependencies waits for the resolver
        assert_eq!(initial_run_time(&future, true, now), None);

        // Ongoing probes immediately
        let ongoing = TriggerConfig::Ongoing {
            interval_seconds: 86400,
            end_condition: Some("done".into()),
            max_iterations: None,
        };
        assert_eq!(initial_run_time(&ongoing, false, now), Some(now));

        // Scheduled computes from now
        let scheduled = TriggerConfig::Scheduled {
            cron: None,
            interval_seconds: Some(600),
        };
        assert_eq!(initial_run_time(&scheduled, false, now), Some(at(12, 10)));
    }
}
