//! Expiry-time calculation in the America/New_York trading calendar.
//!
//! All cutoffs land at 16:45 New York wall time (15 minutes before the
//! daily spread hour) and are converted to UTC instants for storage.

use crate::domain::signal::ExpiryType;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;

/// Returns the expiry instant for a policy, or `None` for `NoExpiry` and
/// `Custom` (the custom instant is operator-supplied, not derived).
pub fn calculate_expiry(expiry_type: ExpiryType, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let now_ny = now.with_timezone(&New_York);

    match expiry_type {
        ExpiryType::NoExpiry | ExpiryType::Custom => None,

        ExpiryType::DayEnd => {
            let today = now_ny.date_naive();
            let cutoff = close_at(today)?;
            if now >= cutoff {
                close_at(today.succ_opt()?)
            } else {
                Some(cutoff)
            }
        }

        ExpiryType::WeekEnd => {
            let days_until_friday =
                (4 + 7 - now_ny.weekday().num_days_from_monday() as i64) % 7;
            let friday = now_ny.date_naive() + Duration::days(days_until_friday);
            let cutoff = close_at(friday)?;
            if now >= cutoff {
                close_at(friday + Duration::days(7))
            } else {
                Some(cutoff)
            }
        }

        ExpiryType::MonthEnd => {
            let (year, month) = if now_ny.month() == 12 {
                (now_ny.year() + 1, 1)
            } else {
                (now_ny.year(), now_ny.month() + 1)
            };
            let first_of_next = NaiveDate::from_ymd_opt(year, month, 1)?;
            let mut last = first_of_next.pred_opt()?;
            while matches!(last.weekday(), Weekday::Sat | Weekday::Sun) {
                last = last.pred_opt()?;
            }
            close_at(last)
        }
    }
}

/// 16:45 New York on the given date, as a UTC instant. 16:45 is never
/// ambiguous under DST (transitions happen at 02:00 local).
fn close_at(date: NaiveDate) -> Option<DateTime<Utc>> {
    New_York
        .with_ymd_and_hms(date.year(), date.month(), date.day(), 16, 45, 0)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
