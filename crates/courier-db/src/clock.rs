use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use rusqlite::Row;

/// Stored form: fixed-width UTC with microseconds, so string order is time order.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Strictly increasing wall clock with microsecond resolution.
///
/// Two readings never compare equal, which keeps `sent_at > last_cleared_at`
/// exact for a message stored right after a clear.
pub struct Clock {
    last_micros: AtomicI64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            last_micros: AtomicI64::new(0),
        }
    }

    /// A clock whose readings all come after `floor`, even if the wall
    /// clock has since moved backwards.
    pub fn resume_after(floor: DateTime<Utc>) -> Self {
        Self {
            last_micros: AtomicI64::new(floor.timestamp_micros()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let mut prev = self.last_micros.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev + 1);
            match self.last_micros.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return from_micros(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Read a timestamp column written by `format_ts`.
pub(crate) fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| bad_timestamp(idx, raw))
}

pub(crate) fn opt_ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => parse_ts(&raw).map(Some).ok_or_else(|| bad_timestamp(idx, raw)),
        None => Ok(None),
    }
}

fn bad_timestamp(idx: usize, raw: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("corrupt timestamp '{}'", raw).into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_strictly_increase() {
        let clock = Clock::new();
        let mut prev = clock.now();
        for _ in 0..1_000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn resumed_clock_never_reads_before_its_floor() {
        let floor = Utc::now() + chrono::Duration::days(365);
        let clock = Clock::resume_after(floor);
        assert!(clock.now() > floor);
    }

    #[test]
    fn stored_form_sorts_chronologically() {
        let clock = Clock::new();
        let a = format_ts(&clock.now());
        let b = format_ts(&clock.now());
        assert!(a < b);
        assert_eq!(a.len(), b.len());
        assert_eq!(parse_ts(&a).map(|t| format_ts(&t)), Some(a));
    }
}
