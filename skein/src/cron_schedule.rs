//! Agent schedules: five-field cron evaluated in an IANA time zone.
//!
//! `next_run_at` is computed in the agent's zone but stored as naive UTC.
//! The cron crate wants a seconds field, so five-field expressions are
//! normalized with a leading `0`.

use std::str::FromStr;

use chrono::{NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::AgentError;

fn normalize(expr: &str) -> Result<String, AgentError> {
    let trimmed = expr.trim();
    match trimmed.split_whitespace().count() {
        5 => Ok(format!("0 {trimmed}")),
        6 | 7 => Ok(trimmed.to_string()),
        n => Err(AgentError::Validation(format!(
            "invalid cron expression '{trimmed}': expected 5 fields, got {n}"
        ))),
    }
}

fn parse_schedule(expr: &str) -> Result<Schedule, AgentError> {
    let normalized = normalize(expr)?;
    Schedule::from_str(&normalized)
        .map_err(|e| AgentError::Validation(format!("invalid cron expression '{expr}': {e}")))
}

fn parse_timezone(timezone: &str) -> Result<Tz, AgentError> {
    timezone
        .parse::<Tz>()
        .map_err(|_| AgentError::Validation(format!("unknown timezone: {timezone}")))
}

/// Checks both the expression and the zone without computing anything.
pub fn validate_schedule(expr: &str, timezone: &str) -> Result<(), AgentError> {
    parse_schedule(expr)?;
    parse_timezone(timezone)?;
    Ok(())
}

/// Next occurrence strictly after `after_utc`, as naive UTC. `None` when
/// the schedule has no future occurrence.
pub fn next_run_after(
    expr: &str,
    timezone: &str,
    after_utc: NaiveDateTime,
) -> Result<Option<NaiveDateTime>, AgentError> {
    let schedule = parse_schedule(expr)?;
    let tz = parse_timezone(timezone)?;
    let after_local = tz.from_utc_datetime(&after_utc);
    Ok(schedule.after(&after_local).next().map(|dt| dt.naive_utc()))
}
