//! Timestamp and timezone utilities
//!
//! Daily idempotency is decided in the property's IANA zone, never in UTC:
//! both instants are formatted as `YYYY-MM-DD` in that zone and compared.

use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse an IANA zone name ("Europe/Paris")
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| Error::InvalidInput(format!("Unknown timezone: {:?}", name)))
}

/// Calendar date of `instant` in `tz`
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// `YYYY-MM-DD` of `instant` in `tz`
pub fn local_date_string(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%Y-%m-%d").to_string()
}

/// True when both instants fall on the same calendar day in `tz`
pub fn same_local_day(a: DateTime<Utc>, b: DateTime<Utc>, tz: Tz) -> bool {
    local_date_string(a, tz) == local_date_string(b, tz)
}

/// Next UTC wall-clock hour boundary strictly after `now`
pub fn next_hour_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    truncated + Duration::hours(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_timezone_valid() {
        assert_eq!(parse_timezone("Europe/Paris").unwrap(), chrono_tz::Europe::Paris);
        assert_eq!(parse_timezone(" UTC ").unwrap(), chrono_tz::UTC);
    }

    #[test]
    fn test_parse_timezone_rejects_garbage() {
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
        assert!(parse_timezone("").is_err());
    }

    #[test]
    fn test_same_local_day_differs_from_utc() {
        // 23:30 UTC on the 14th is already the 15th in Paris (UTC+2 in summer)
        let last_run = utc("2026-08-14T23:30:00Z");
        let now = utc("2026-08-15T08:00:00Z");
        assert!(same_local_day(last_run, now, chrono_tz::Europe::Paris));
        assert!(!same_local_day(last_run, now, chrono_tz::UTC));
    }

    #[test]
    fn test_same_local_day_west_of_utc() {
        // 03:00 UTC on the 15th is still the 14th in New York
        let last_run = utc("2026-08-15T03:00:00Z");
        let now = utc("2026-08-14T20:00:00Z");
        assert!(same_local_day(last_run, now, chrono_tz::America::New_York));
        assert!(!same_local_day(last_run, now, chrono_tz::UTC));
    }

    #[test]
    fn test_local_date_across_midnight() {
        let instant = utc("2026-01-10T23:15:00Z");
        assert_eq!(
            local_date(instant, chrono_tz::Europe::Berlin),
            NaiveDate::from_ymd_opt(2026, 1, 11).unwrap()
        );
        assert_eq!(
            local_date(instant, chrono_tz::UTC),
            NaiveDate::from_ymd_opt(2026, 1, 10).unwrap()
        );
    }

    #[test]
    fn test_next_hour_boundary() {
        let instant = utc("2026-03-01T10:42:17Z");
        assert_eq!(next_hour_boundary(instant), utc("2026-03-01T11:00:00Z"));

        let on_boundary = utc("2026-03-01T11:00:00Z");
        assert_eq!(next_hour_boundary(on_boundary), utc("2026-03-01T12:00:00Z"));
    }

    #[test]
    fn test_local_date_string_format() {
        let instant = utc("2026-12-31T22:00:00Z");
        assert_eq!(local_date_string(instant, chrono_tz::Asia::Tokyo), "2027-01-01");
    }
}
