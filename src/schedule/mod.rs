//! # Schedules
//!
//! `ScheduleSpec` is the validated form of the `schedule` option: exactly one
//! of `cron`, `every`, `at` or `in`. `ScheduleEngine` drives a job on that
//! cadence from a single dedicated worker.

pub mod engine;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::config::{ConfigResult, ConfigurationError};
use crate::constants::schedule_kinds;

pub use engine::{ScheduleEngine, ScheduledJob};

/// When a scheduled input fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// At every instant matched by a cron expression, evaluated in `timezone`
    Cron { expression: String, timezone: Tz },
    /// Repeatedly at a fixed period
    Every(Duration),
    /// Once, at an absolute instant
    At(DateTime<Utc>),
    /// Once, after a delay from start
    In(Duration),
}

impl ScheduleSpec {
    /// Validate a raw `kind -> value` map into a spec
    ///
    /// Exactly one key must be present and it must be one of the recognised
    /// kinds; anything else is a `ConfigurationError`.
    pub fn from_options(options: &BTreeMap<String, String>) -> ConfigResult<Self> {
        let mut entries = options.iter();
        let (kind, value) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            (None, _) => {
                return Err(ConfigurationError::invalid_schedule(format!(
                    "expected one of {:?}, got none",
                    schedule_kinds::ALL
                )))
            }
            (Some(_), Some(_)) => {
                return Err(ConfigurationError::invalid_schedule(format!(
                    "expected exactly one of {:?}, got {:?}",
                    schedule_kinds::ALL,
                    options.keys().collect::<Vec<_>>()
                )))
            }
        };

        match kind.as_str() {
            schedule_kinds::CRON => Self::cron(value),
            schedule_kinds::EVERY => {
                let period = parse_duration(value)?;
                if period.is_zero() {
                    return Err(ConfigurationError::invalid_value(
                        "schedule.every",
                        value.clone(),
                        "period must be greater than zero",
                    ));
                }
                Ok(ScheduleSpec::Every(period))
            }
            schedule_kinds::AT => parse_timestamp(value).map(ScheduleSpec::At),
            schedule_kinds::IN => parse_duration(value).map(ScheduleSpec::In),
            other => Err(ConfigurationError::invalid_schedule(format!(
                "unrecognised schedule kind '{other}', expected one of {:?}",
                schedule_kinds::ALL
            ))),
        }
    }

    /// Parse a cron expression with an optional trailing IANA timezone
    pub fn cron(expression: &str) -> ConfigResult<Self> {
        let mut tokens: Vec<&str> = expression.split_whitespace().collect();

        let timezone = match tokens.last().and_then(|token| Tz::from_str(token).ok()) {
            Some(tz) => {
                tokens.pop();
                tz
            }
            None => Tz::UTC,
        };

        let normalized = match tokens.len() {
            // Minute-precision expressions fire at second zero
            5 => format!("0 {}", tokens.join(" ")),
            6 | 7 => tokens.join(" "),
            n => {
                return Err(ConfigurationError::invalid_value(
                    "schedule.cron",
                    expression,
                    format!("expected 5, 6 or 7 fields, got {n}"),
                ))
            }
        };

        Schedule::from_str(&normalized).map_err(|e| {
            ConfigurationError::invalid_value("schedule.cron", expression, e.to_string())
        })?;

        Ok(ScheduleSpec::Cron {
            expression: normalized,
            timezone,
        })
    }

    /// Short name of the kind, as written in configuration
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleSpec::Cron { .. } => schedule_kinds::CRON,
            ScheduleSpec::Every(_) => schedule_kinds::EVERY,
            ScheduleSpec::At(_) => schedule_kinds::AT,
            ScheduleSpec::In(_) => schedule_kinds::IN,
        }
    }

    /// Whether the schedule fires more than once
    pub fn is_recurring(&self) -> bool {
        matches!(self, ScheduleSpec::Cron { .. } | ScheduleSpec::Every(_))
    }

    /// Next cron-matched instant strictly after `after`
    pub(crate) fn next_cron_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ScheduleSpec::Cron {
            expression,
            timezone,
        } = self
        else {
            return None;
        };
        let schedule = Schedule::from_str(expression).ok()?;
        let local_after = timezone.from_utc_datetime(&after.naive_utc());
        schedule
            .after(&local_after)
            .next()
            .map(|next| next.with_timezone(&Utc))
    }
}

/// Parse a duration such as `500ms`, `30s`, `5m`, `1h30m`, `2d`, `1w`
///
/// A bare integer is a number of seconds.
pub fn parse_duration(input: &str) -> ConfigResult<Duration> {
    let text = input.trim();
    let invalid = |context: &str| ConfigurationError::invalid_value("duration", input, context);

    if text.is_empty() {
        return Err(invalid("duration must not be empty"));
    }
    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(invalid("expected a number before each unit"));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|_| invalid("number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .count();
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.saturating_mul(60)),
            "h" => Duration::from_secs(amount.saturating_mul(3_600)),
            "d" => Duration::from_secs(amount.saturating_mul(86_400)),
            "w" => Duration::from_secs(amount.saturating_mul(604_800)),
            "" => return Err(invalid("missing unit (ms, s, m, h, d, w)")),
            _ => return Err(invalid("unknown unit (expected ms, s, m, h, d, w)")),
        };
        total = total.saturating_add(part);
    }

    Ok(total)
}

/// Parse an RFC 3339 timestamp, or `YYYY-MM-DD HH:MM:SS` taken as UTC
pub fn parse_timestamp(input: &str) -> ConfigResult<DateTime<Utc>> {
    let text = input.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| ConfigurationError::invalid_value("schedule.at", input, e.to_string()))
}
