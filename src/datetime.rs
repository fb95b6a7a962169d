//! Date/time utilities for fast-storage.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC 3339 with second precision (e.g. `2024-01-15T10:30:00Z`).
pub fn to_rfc3339(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_to_rfc3339() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(to_rfc3339(&dt), "2024-01-15T10:30:00Z");
    }

    #[test]
    fn test_subseconds_dropped() {
        let dt = Utc.timestamp_opt(1_705_314_600, 123_456_789).unwrap();
        assert_eq!(to_rfc3339(&dt), "2024-01-15T10:30:00Z");
    }
}
