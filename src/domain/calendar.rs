//! The daily broker spread hour in America/New_York.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;

/// True while the daily 17:00-18:00 New York spread hour is in effect on a
/// weekday. Liquidity providers roll positions in this window, so limit
/// touches are treated as spread artifacts rather than genuine fills.
pub fn in_spread_hour(now: DateTime<Utc>) -> bool {
    let ny = now.with_timezone(&New_York);
    if matches!(ny.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    ny.hour() == 17
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ny(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_weekday_spread_hour() {
        // 2025-01-15 is a Wednesday
        assert!(in_spread_hour(ny(2025, 1, 15, 17, 0)));
        assert!(in_spread_hour(ny(2025, 1, 15, 17, 30)));
        assert!(in_spread_hour(ny(2025, 1, 15, 17, 59)));
    }

    #[test]
    fn test_outside_spread_hour() {
        assert!(!in_spread_hour(ny(2025, 1, 15, 16, 59)));
        assert!(!in_spread_hour(ny(2025, 1, 15, 18, 0)));
    }

    #[test]
    fn test_weekend_never_spread_hour() {
        // 2025-01-18 is a Saturday
        assert!(!in_spread_hour(ny(2025, 1, 18, 17, 30)));
        assert!(!in_spread_hour(ny(2025, 1, 19, 17, 30)));
    }
}
