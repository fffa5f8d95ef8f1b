//! Clock abstraction for dmx.
//!
//! Run reports are stamped with the wall-clock time they were generated at.
//! Tests use [`FixedClock`] so report output is byte-for-byte reproducible.

use chrono::{DateTime, SecondsFormat, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time as Unix seconds since epoch.
    fn now_unix_sec(&self) -> u64;

    /// Current time as an RFC 3339 UTC timestamp (`2024-01-01T00:00:00Z`).
    fn now_rfc3339(&self) -> String {
        format_rfc3339(self.now_unix_sec())
    }
}

/// Render Unix seconds as RFC 3339 in UTC.
///
/// Values outside chrono's representable range fall back to the raw number.
pub fn format_rfc3339(unix_sec: u64) -> String {
    i64::try_from(unix_sec)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| unix_sec.to_string())
}

/// Real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_sec(&self) -> u64 {
        u64::try_from(Utc::now().timestamp()).unwrap_or(0)
    }
}

/// Clock pinned to a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    unix_sec: u64,
}

impl FixedClock {
    pub fn new(unix_sec: u64) -> Self {
        Self { unix_sec }
    }
}

impl Clock for FixedClock {
    fn now_unix_sec(&self) -> u64 {
        self.unix_sec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(1704067200);
        assert_eq!(clock.now_unix_sec(), 1704067200);
        assert_eq!(clock.now_rfc3339(), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_format_epoch() {
        assert_eq!(format_rfc3339(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_format_out_of_range_falls_back() {
        assert_eq!(format_rfc3339(u64::MAX), u64::MAX.to_string());
    }

    #[test]
    fn test_system_clock_is_recent() {
        // After 2020-01-01, before 2100-01-01
        let now = SystemClock.now_unix_sec();
        assert!(now > 1577836800);
        assert!(now < 4102444800);
    }

    #[test]
    fn test_clock_trait_object() {
        let clock: Box<dyn Clock> = Box::new(FixedClock::new(86400));
        assert_eq!(clock.now_rfc3339(), "1970-01-02T00:00:00Z");
    }
}
