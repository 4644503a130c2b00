//! Day-boundary policy for "claimed today" style guards.
//!
//! The policy is a UTC calendar day, not a rolling 24-hour window: the
//! reward cadence jobs fire at fixed UTC times, so the claim guard and the
//! sweep must agree on where a day starts.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

/// The UTC calendar day containing `at`.
pub fn utc_day(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

/// Whether two instants fall on the same UTC calendar day.
pub fn same_utc_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    utc_day(a) == utc_day(b)
}

/// Whole UTC calendar days elapsed from `start` to `now` (0 on the start
/// day itself). Drives the every-N-days VIP seed grants.
pub fn days_since(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (utc_day(now) - utc_day(start)).num_days()
}

/// Midnight UTC at the start of the day containing `at`.
pub fn day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&at.date_naive().and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_boundary_is_utc_midnight() {
        let before = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert!(!same_utc_day(before, after));
        assert_eq!(days_since(before, after), 1);
    }

    #[test]
    fn same_day_spans_the_whole_day() {
        let morning = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 1).unwrap();
        let night = Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 59).unwrap();
        assert!(same_utc_day(morning, night));
        assert_eq!(days_since(morning, night), 0);
    }

    #[test]
    fn days_since_counts_calendar_days_not_elapsed_hours() {
        // 23:00 to 01:00 is two hours but crosses one boundary.
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 1, 0, 0).unwrap();
        assert_eq!(days_since(start, now), 1);
    }

    #[test]
    fn day_start_truncates_time_of_day() {
        let at = Utc.with_ymd_and_hms(2024, 7, 4, 15, 42, 7).unwrap();
        assert_eq!(
            day_start(at),
            Utc.with_ymd_and_hms(2024, 7, 4, 0, 0, 0).unwrap()
        );
    }
}
