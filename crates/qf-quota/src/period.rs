//! Period calculator: computes the `(period_start, period_end)` window an
//! interval unit denotes at a given instant, for both calendar-aligned fixed
//! intervals and sliding rolling windows.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::model::IntervalUnit;

fn truncate_to_second(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_nanosecond(0).unwrap()
}

/// Add `value` instances of `unit`'s base duration to `base`, with calendar
/// arithmetic for MONTH/MONTH_ROLLING (day-of-month preserved, year/month
/// overflow carried).
pub fn add_interval(base: DateTime<Utc>, unit: IntervalUnit, value: i64) -> DateTime<Utc> {
    match unit {
        IntervalUnit::Second | IntervalUnit::SecondRolling => base + Duration::seconds(value),
        IntervalUnit::Minute | IntervalUnit::MinuteRolling => base + Duration::minutes(value),
        IntervalUnit::Hour | IntervalUnit::HourRolling => base + Duration::hours(value),
        IntervalUnit::Day | IntervalUnit::DayRolling => base + Duration::days(value),
        IntervalUnit::Week | IntervalUnit::WeekRolling => base + Duration::weeks(value),
        IntervalUnit::Month | IntervalUnit::MonthRolling => {
            let total_months = base.year() as i64 * 12 + (base.month() as i64 - 1) + value;
            let year = total_months.div_euclid(12) as i32;
            let month = (total_months.rem_euclid(12) + 1) as u32;
            Utc.with_ymd_and_hms(year, month, base.day(), base.hour(), base.minute(), base.second())
                .single()
                .expect("day-of-month preserved from a valid date stays valid")
        }
    }
}

/// The start of the window `unit`/`value` denotes at `now`.
pub fn period_start(now: DateTime<Utc>, unit: IntervalUnit, value: i64) -> DateTime<Utc> {
    let now = truncate_to_second(now);

    match unit {
        IntervalUnit::Second => {
            let new_second = now.second() as i64 - (now.second() as i64 % value);
            now.with_second(new_second as u32).unwrap()
        }
        IntervalUnit::Minute => {
            let new_minute = now.minute() as i64 - (now.minute() as i64 % value);
            now.with_minute(new_minute as u32)
                .unwrap()
                .with_second(0)
                .unwrap()
        }
        IntervalUnit::Hour => {
            let new_hour = now.hour() as i64 - (now.hour() as i64 % value);
            now.with_hour(new_hour as u32)
                .unwrap()
                .with_minute(0)
                .unwrap()
                .with_second(0)
                .unwrap()
        }
        IntervalUnit::Day => {
            let start_of_day = now
                .with_hour(0)
                .unwrap()
                .with_minute(0)
                .unwrap()
                .with_second(0)
                .unwrap();
            let days_since_epoch = start_of_day.timestamp() / 86_400;
            let offset = days_since_epoch.rem_euclid(value);
            start_of_day - Duration::days(offset)
        }
        IntervalUnit::Week => {
            let start_of_day = now
                .with_hour(0)
                .unwrap()
                .with_minute(0)
                .unwrap()
                .with_second(0)
                .unwrap();
            let start_of_iso_week = start_of_day - Duration::days(start_of_day.weekday().num_days_from_monday() as i64);
            if value == 1 {
                start_of_iso_week
            } else {
                let reference_monday = Utc.with_ymd_and_hms(1970, 1, 5, 0, 0, 0).single().unwrap();
                let weeks_since_epoch = (start_of_iso_week - reference_monday).num_days().div_euclid(7);
                let offset = weeks_since_epoch.rem_euclid(value);
                start_of_iso_week - Duration::weeks(offset)
            }
        }
        IntervalUnit::Month => {
            let total_months = now.year() as i64 * 12 + (now.month() as i64 - 1);
            let offset = total_months.rem_euclid(value);
            let effective_total = total_months - offset;
            let year = effective_total.div_euclid(12) as i32;
            let month = (effective_total.rem_euclid(12) + 1) as u32;
            Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single().unwrap()
        }
        IntervalUnit::SecondRolling => now - Duration::seconds(value),
        IntervalUnit::MinuteRolling => now - Duration::minutes(value),
        IntervalUnit::HourRolling => now - Duration::hours(value),
        IntervalUnit::DayRolling => now - Duration::days(value),
        IntervalUnit::WeekRolling => now - Duration::weeks(value),
        IntervalUnit::MonthRolling => {
            let total_months = now.year() as i64 * 12 + (now.month() as i64 - 1) - value;
            let year = total_months.div_euclid(12) as i32;
            let month = (total_months.rem_euclid(12) + 1) as u32;
            Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single().unwrap()
        }
    }
}

/// The end of the window: for fixed intervals, the start of the next period;
/// for rolling intervals, `now` truncated to second precision (the aggregation
/// query's closed upper bound).
pub fn period_end(now: DateTime<Utc>, start: DateTime<Utc>, unit: IntervalUnit, value: i64) -> DateTime<Utc> {
    if unit.is_rolling() {
        truncate_to_second(now)
    } else {
        add_interval(start, unit, value)
    }
}
