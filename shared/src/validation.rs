//! Input validation functions
//!
//! Boundary validation for plan and session inputs. Invariant violations are
//! rejected here, before any mutation or save is attempted.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::models::DayOfWeek;

/// Longest supportable fast target, in hours (one week)
pub const MAX_TARGET_HOURS: f64 = 168.0;

/// Validate a plan display name
pub fn validate_plan_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Plan name cannot be empty".to_string());
    }
    if name.len() > 100 {
        return Err("Plan name too long".to_string());
    }
    Ok(())
}

/// Validate a target fast duration (in hours)
pub fn validate_target_hours(hours: f64) -> Result<(), String> {
    if hours.is_nan() || hours.is_infinite() {
        return Err("Target duration must be a valid number".to_string());
    }
    if hours <= 0.0 {
        return Err("Target duration must be positive".to_string());
    }
    if hours > MAX_TARGET_HOURS {
        return Err(format!(
            "Target duration cannot exceed {} hours",
            MAX_TARGET_HOURS
        ));
    }
    Ok(())
}

/// An active plan must be scheduled on at least one weekday
pub fn validate_active_days(days: &BTreeSet<DayOfWeek>) -> Result<(), String> {
    if days.is_empty() {
        return Err("At least one weekday must be selected".to_string());
    }
    Ok(())
}

/// Reminder offset must fall inside the fast window
pub fn validate_reminder_offset(offset_minutes: i64, target_hours: f64) -> Result<(), String> {
    if offset_minutes < 0 {
        return Err("Reminder offset cannot be negative".to_string());
    }
    if offset_minutes as f64 > target_hours * 60.0 {
        return Err("Reminder offset cannot exceed the fast duration".to_string());
    }
    Ok(())
}

/// A session end must not precede its start
pub fn validate_session_bounds(
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
) -> Result<(), String> {
    if ended_at < started_at {
        return Err("End time cannot be before start time".to_string());
    }
    Ok(())
}

/// Chosen instants for confirmations and edits must not be in the future
pub fn validate_not_future(instant: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), String> {
    if instant > now {
        return Err("Time cannot be in the future".to_string());
    }
    Ok(())
}

/// Validate an IANA timezone name
pub fn validate_timezone(name: &str) -> Result<(), String> {
    name.parse::<chrono_tz::Tz>()
        .map(|_| ())
        .map_err(|_| format!("Unknown timezone: {}", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn target_hours_bounds() {
        assert!(validate_target_hours(16.0).is_ok());
        assert!(validate_target_hours(0.0).is_err());
        assert!(validate_target_hours(-1.0).is_err());
        assert!(validate_target_hours(f64::NAN).is_err());
        assert!(validate_target_hours(200.0).is_err());
    }

    #[test]
    fn active_days_must_be_nonempty() {
        assert!(validate_active_days(&BTreeSet::new()).is_err());
        let days: BTreeSet<DayOfWeek> = [DayOfWeek::Monday].into_iter().collect();
        assert!(validate_active_days(&days).is_ok());
    }

    #[test]
    fn reminder_offset_inside_window() {
        assert!(validate_reminder_offset(30, 16.0).is_ok());
        assert!(validate_reminder_offset(0, 16.0).is_ok());
        assert!(validate_reminder_offset(-5, 16.0).is_err());
        assert!(validate_reminder_offset(16 * 60 + 1, 16.0).is_err());
    }

    #[test]
    fn session_bounds_reject_end_before_start() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 20, 0, 0).unwrap();
        assert!(validate_session_bounds(start, start).is_ok());
        assert!(validate_session_bounds(start, start - chrono::Duration::minutes(1)).is_err());
    }

    #[test]
    fn timezone_names_are_checked() {
        assert!(validate_timezone("America/New_York").is_ok());
        assert!(validate_timezone("UTC").is_ok());
        assert!(validate_timezone("Mars/Olympus_Mons").is_err());
    }
}
