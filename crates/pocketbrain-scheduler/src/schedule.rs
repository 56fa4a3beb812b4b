//! Schedule validation and next-run computation.
//!
//! All cron arithmetic happens under the configured timezone — the host
//! timezone is never consulted. Expressions arrive in 5-field form and
//! are normalized by prepending a seconds field before parsing.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use pocketbrain_core::types::Schedule;

use crate::error::{Result, SchedulerError};

/// Parse the configured IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    Tz::from_str(name).map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

/// Normalize a 5-field cron expression and parse it.
fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    if expr.split_whitespace().count() != 5 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "cron expression must have 5 fields: {expr}"
        )));
    }
    format!("0 {expr}")
        .parse::<cron::Schedule>()
        .map_err(|e| SchedulerError::InvalidSchedule(format!("cron parse failed: {e}")))
}

/// Validate a schedule at the boundary where tasks are born.
///
/// `cron` must parse, `interval` must be positive, `once` must point
/// strictly into the future. Invalid specifications never reach the
/// store.
pub fn validate(schedule: &Schedule, now: DateTime<Utc>) -> Result<()> {
    match schedule {
        Schedule::Cron { expr } => parse_cron(expr).map(|_| ()),
        Schedule::Interval { every_ms } => {
            if *every_ms == 0 {
                Err(SchedulerError::InvalidSchedule(
                    "interval must be a positive number of milliseconds".to_string(),
                ))
            } else {
                Ok(())
            }
        }
        Schedule::Once { at } => {
            if *at <= now {
                Err(SchedulerError::InvalidSchedule(format!(
                    "one-shot time must be in the future: {at}"
                )))
            } else {
                Ok(())
            }
        }
    }
}

/// First firing for a newly created (or from-now recomputed) task.
pub fn initial_next_run(schedule: &Schedule, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Cron { expr } => next_cron_occurrence(expr, now, tz),
        Schedule::Interval { every_ms } => Some(now + Duration::milliseconds(*every_ms as i64)),
        Schedule::Once { at } => Some(*at),
    }
}

/// Recompute after a firing.
///
/// `anchor` is the *previous planned* next_run, not the actual
/// execution time: a lagging run still fires its successor on the
/// original cadence, so intervals never accumulate drift. One-shot
/// schedules are exhausted after their single firing.
pub fn next_run_after_fire(
    schedule: &Schedule,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { .. } => None,
        Schedule::Cron { expr } => next_cron_occurrence(expr, now, tz),
        Schedule::Interval { every_ms } => Some(anchor + Duration::milliseconds(*every_ms as i64)),
    }
}

fn next_cron_occurrence(expr: &str, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let schedule = parse_cron(expr).ok()?;
    let zoned = now.with_timezone(&tz);
    schedule.after(&zoned).next().map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn five_field_cron_validates() {
        let now = utc("2026-01-01T00:00:00Z");
        assert!(validate(
            &Schedule::Cron {
                expr: "*/5 * * * *".to_string()
            },
            now
        )
        .is_ok());
    }

    #[test]
    fn six_field_cron_is_rejected() {
        let now = utc("2026-01-01T00:00:00Z");
        assert!(validate(
            &Schedule::Cron {
                expr: "0 */5 * * * *".to_string()
            },
            now
        )
        .is_err());
        assert!(validate(
            &Schedule::Cron {
                expr: "not a cron".to_string()
            },
            now
        )
        .is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let now = utc("2026-01-01T00:00:00Z");
        assert!(validate(&Schedule::Interval { every_ms: 0 }, now).is_err());
        assert!(validate(&Schedule::Interval { every_ms: 1 }, now).is_ok());
    }

    #[test]
    fn once_must_be_in_the_future() {
        let now = utc("2026-01-01T00:00:00Z");
        assert!(validate(
            &Schedule::Once {
                at: utc("2025-12-31T23:59:59Z")
            },
            now
        )
        .is_err());
        assert!(validate(&Schedule::Once { at: now }, now).is_err());
        assert!(validate(
            &Schedule::Once {
                at: utc("2026-01-01T00:00:01Z")
            },
            now
        )
        .is_ok());
    }

    #[test]
    fn interval_anchors_on_previous_next_run() {
        // Fired 35s late; the successor still lands on the original grid.
        let schedule = Schedule::Interval { every_ms: 60_000 };
        let anchor = utc("2026-01-01T10:00:00Z");
        let now = utc("2026-01-01T10:00:35Z");
        let next = next_run_after_fire(&schedule, anchor, now, Tz::UTC).unwrap();
        assert_eq!(next, utc("2026-01-01T10:01:00Z"));
    }

    #[test]
    fn once_is_exhausted_after_firing() {
        let schedule = Schedule::Once {
            at: utc("2026-01-01T10:00:00Z"),
        };
        let anchor = utc("2026-01-01T10:00:00Z");
        let now = utc("2026-01-01T10:00:01Z");
        assert!(next_run_after_fire(&schedule, anchor, now, Tz::UTC).is_none());
    }

    #[test]
    fn cron_next_occurrence_respects_timezone() {
        let schedule = Schedule::Cron {
            expr: "0 9 * * *".to_string(),
        };
        let now = utc("2026-06-01T00:00:00Z");
        // 09:00 in Bucharest is 06:00 UTC during EEST (UTC+3).
        let tz: Tz = "Europe/Bucharest".parse().unwrap();
        let next = initial_next_run(&schedule, now, tz).unwrap();
        assert_eq!(next, utc("2026-06-01T06:00:00Z"));
    }

    #[test]
    fn cron_recompute_uses_now_not_anchor() {
        let schedule = Schedule::Cron {
            expr: "0 * * * *".to_string(),
        };
        let anchor = utc("2026-01-01T10:00:00Z");
        // The run lagged into the next hour window.
        let now = utc("2026-01-01T11:30:00Z");
        let next = next_run_after_fire(&schedule, anchor, now, Tz::UTC).unwrap();
        assert_eq!(next, utc("2026-01-01T12:00:00Z"));
    }

    #[test]
    fn timezone_names_validate() {
        assert!(parse_timezone("Europe/Bucharest").is_ok());
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }
}
