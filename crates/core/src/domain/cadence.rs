//! Cadence descriptor for recurring producers
//!
//! Patterns are resolved once into a fixed interval:
//! - `every 10 minutes`, `every 30s`, `every 2 hours`
//! - `10m`, `45s`, `6h`
//! - step cron (5 fields): `*/10 * * * *`, `15 * * * *`, `0 */6 * * *`, `0 3 * * *`

use crate::domain::error::{DomainError, Result};
use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cadence {
    pattern: String,
    interval: Duration,
}

impl Cadence {
    /// Fixed interval cadence
    pub fn every(interval: Duration) -> Self {
        Self {
            pattern: format!("every {}s", interval.as_secs()),
            interval,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        let invalid = |reason: &str| DomainError::InvalidCadence {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let secs = if trimmed.split_whitespace().count() == 5 {
            parse_cron(trimmed).ok_or_else(|| invalid("unsupported cron pattern"))?
        } else {
            let body = trimmed.strip_prefix("every").unwrap_or(trimmed).trim();
            parse_duration(body).ok_or_else(|| invalid("expected '<n> <unit>'"))?
        };

        if secs == 0 {
            return Err(invalid("interval must be positive"));
        }

        Ok(Self {
            pattern: trimmed.to_string(),
            interval: Duration::from_secs(secs),
        })
    }
}

impl std::str::FromStr for Cadence {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Cadence::parse(s)
    }
}

/// "10 minutes", "10m", "30 s"
fn parse_duration(body: &str) -> Option<u64> {
    let split = body.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = body.split_at(split);
    let amount: u64 = amount.parse().ok()?;

    let unit_secs = match unit.trim() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR,
        "d" | "day" | "days" => DAY,
        _ => return None,
    };
    amount.checked_mul(unit_secs)
}

/// minute hour day-of-month month day-of-week; only step/fixed minute and hour fields
fn parse_cron(pattern: &str) -> Option<u64> {
    let fields: Vec<&str> = pattern.split_whitespace().collect();
    let (minute, hour) = (fields[0], fields[1]);
    if fields[2..].iter().any(|f| *f != "*") {
        return None;
    }

    let step = |field: &str| -> Option<u64> { field.strip_prefix("*/")?.parse().ok() };
    let fixed = |field: &str, max: u64| -> bool {
        field.parse::<u64>().map(|v| v < max).unwrap_or(false)
    };

    match (minute, hour) {
        ("*", "*") => Some(MINUTE),
        (m, "*") if step(m).is_some() => step(m).map(|n| n * MINUTE),
        (m, "*") if fixed(m, 60) => Some(HOUR),
        (m, h) if fixed(m, 60) && step(h).is_some() => step(h).map(|n| n * HOUR),
        (m, h) if fixed(m, 60) && fixed(h, 24) => Some(DAY),
        _ => None,
    }
}
