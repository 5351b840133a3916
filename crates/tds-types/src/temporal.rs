//! Conversions between chrono values and the date/time wire units.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::TypeError;

/// Days from 0001-01-01 to 9999-12-31.
pub const MAX_DATE_DAYS: u32 = 3_652_058;

/// Legacy DATETIME ticks (1/300 s) in one day.
const DATETIME_TICKS_PER_DAY: u32 = 25_920_000;

const NANOS_PER_SEC: u64 = 1_000_000_000;
const NANOS_PER_DAY: u64 = 86_400 * NANOS_PER_SEC;

fn datetime_epoch() -> Result<NaiveDate, TypeError> {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .ok_or_else(|| TypeError::malformed("datetime", "no 1900-01-01 epoch"))
}

/// Bytes used by the time part at a given fractional-second scale.
#[must_use]
pub const fn time_len(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

/// Date for a day count since 0001-01-01.
pub fn date_from_days(days: u32) -> Result<NaiveDate, TypeError> {
    if days > MAX_DATE_DAYS {
        return Err(TypeError::malformed(
            "date",
            format!("day number {days} is past 9999-12-31"),
        ));
    }
    NaiveDate::from_num_days_from_ce_opt(days as i32 + 1)
        .ok_or_else(|| TypeError::malformed("date", format!("day number {days}")))
}

/// Day count since 0001-01-01.
pub fn days_from_date(date: NaiveDate) -> Result<u32, TypeError> {
    u32::try_from(date.num_days_from_ce() - 1)
        .ok()
        .filter(|days| *days <= MAX_DATE_DAYS)
        .ok_or_else(|| TypeError::overflow("date", date))
}

fn nanos_per_tick(scale: u8) -> u64 {
    10u64.pow(9 - u32::from(scale.min(7)))
}

/// Time of day from `10^-scale` second ticks.
pub fn time_from_ticks(ticks: u64, scale: u8) -> Result<NaiveTime, TypeError> {
    let nanos = ticks
        .checked_mul(nanos_per_tick(scale))
        .filter(|n| *n < NANOS_PER_DAY)
        .ok_or_else(|| TypeError::malformed("time", format!("{ticks} ticks at scale {scale}")))?;
    NaiveTime::from_num_seconds_from_midnight_opt(
        (nanos / NANOS_PER_SEC) as u32,
        (nanos % NANOS_PER_SEC) as u32,
    )
    .ok_or_else(|| TypeError::malformed("time", format!("{ticks} ticks at scale {scale}")))
}

/// Ticks for a time of day, truncating precision beyond `scale`.
#[must_use]
pub fn ticks_from_time(time: NaiveTime, scale: u8) -> u64 {
    // Leap-second representations carry nanos >= 1e9; pin them to the last tick.
    let frac = u64::from(time.nanosecond()).min(NANOS_PER_SEC - 1);
    let nanos = u64::from(time.num_seconds_from_midnight()) * NANOS_PER_SEC + frac;
    nanos / nanos_per_tick(scale)
}

/// Decode a legacy DATETIME: days since 1900-01-01 and 1/300 s ticks.
pub fn datetime_from_parts(days: i32, ticks: u32) -> Result<NaiveDateTime, TypeError> {
    if ticks >= DATETIME_TICKS_PER_DAY {
        return Err(TypeError::malformed(
            "datetime",
            format!("{ticks} ticks exceed one day"),
        ));
    }
    let date = datetime_epoch()?
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| TypeError::malformed("datetime", format!("day {days}")))?;
    let nanos = u64::from(ticks) * 10_000_000 / 3;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(
        (nanos / NANOS_PER_SEC) as u32,
        (nanos % NANOS_PER_SEC) as u32,
    )
    .ok_or_else(|| TypeError::malformed("datetime", format!("{ticks} ticks")))?;
    Ok(date.and_time(time))
}

/// Encode a legacy DATETIME, rounding to the nearest 1/300 s.
pub fn datetime_to_parts(value: NaiveDateTime) -> Result<(i32, u32), TypeError> {
    let out_of_range = || TypeError::overflow("datetime", value);
    if !(1753..=9999).contains(&value.year()) {
        return Err(out_of_range());
    }
    let mut days = (value.date() - datetime_epoch()?).num_days();
    let time = value.time();
    let frac = u64::from(time.nanosecond()).min(NANOS_PER_SEC - 1);
    let nanos = u64::from(time.num_seconds_from_midnight()) * NANOS_PER_SEC + frac;
    let mut ticks = ((nanos * 3 + 5_000_000) / 10_000_000) as u32;
    if ticks >= DATETIME_TICKS_PER_DAY {
        days += 1;
        ticks = 0;
    }
    let days = i32::try_from(days).map_err(|_| out_of_range())?;
    Ok((days, ticks))
}

/// Decode a SMALLDATETIME: days since 1900-01-01 and minutes past midnight.
pub fn smalldatetime_from_parts(days: u16, minutes: u16) -> Result<NaiveDateTime, TypeError> {
    if minutes >= 1440 {
        return Err(TypeError::malformed(
            "smalldatetime",
            format!("{minutes} minutes exceed one day"),
        ));
    }
    let date = datetime_epoch()? + Duration::days(i64::from(days));
    let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(minutes) * 60, 0)
        .ok_or_else(|| TypeError::malformed("smalldatetime", format!("{minutes} minutes")))?;
    Ok(date.and_time(time))
}

/// Encode a SMALLDATETIME, rounding to the nearest minute.
pub fn smalldatetime_to_parts(value: NaiveDateTime) -> Result<(u16, u16), TypeError> {
    let out_of_range = || TypeError::overflow("smalldatetime", value);
    let mut days = (value.date() - datetime_epoch()?).num_days();
    let mut minutes = (value.time().num_seconds_from_midnight() + 30) / 60;
    if minutes >= 1440 {
        days += 1;
        minutes = 0;
    }
    let days = u16::try_from(days).map_err(|_| out_of_range())?;
    Ok((days, minutes as u16))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_date_bounds() {
        let min = NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
        let max = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        assert_eq!(days_from_date(min).unwrap(), 0);
        assert_eq!(days_from_date(max).unwrap(), MAX_DATE_DAYS);
        assert_eq!(date_from_days(MAX_DATE_DAYS).unwrap(), max);
        assert!(date_from_days(MAX_DATE_DAYS + 1).is_err());
    }

    #[test]
    fn test_time_scales() {
        let t = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_900).unwrap();
        for scale in 0..=7u8 {
            let ticks = ticks_from_time(t, scale);
            let back = time_from_ticks(ticks, scale).unwrap();
            assert!(back <= t);
            assert!(t - back < chrono::Duration::nanoseconds(nanos_per_tick(scale) as i64));
        }
        assert_eq!(ticks_from_time(t, 7), 863_999_999_999);
    }

    #[test]
    fn test_datetime_ticks() {
        let dt = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_milli_opt(12, 0, 0, 3)
            .unwrap();
        let (days, ticks) = datetime_to_parts(dt).unwrap();
        assert_eq!(days, 36_524);
        assert_eq!(ticks, 12 * 3600 * 300 + 1);
        let back = datetime_from_parts(days, ticks).unwrap();
        assert_eq!(back.time().nanosecond(), 3_333_333);
    }

    #[test]
    fn test_datetime_rollover() {
        let dt = NaiveDate::from_ymd_opt(2020, 2, 28)
            .unwrap()
            .and_hms_nano_opt(23, 59, 59, 999_000_000)
            .unwrap();
        let (days, ticks) = datetime_to_parts(dt).unwrap();
        let back = datetime_from_parts(days, ticks).unwrap();
        assert_eq!(back, NaiveDate::from_ymd_opt(2020, 2, 29).unwrap().and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn test_datetime_range() {
        let early = NaiveDate::from_ymd_opt(1600, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert!(datetime_to_parts(early).is_err());
    }

    #[test]
    fn test_smalldatetime_rounds() {
        let dt = NaiveDate::from_ymd_opt(1900, 1, 2)
            .unwrap()
            .and_hms_opt(10, 0, 31)
            .unwrap();
        assert_eq!(smalldatetime_to_parts(dt).unwrap(), (1, 601));
        assert_eq!(
            smalldatetime_from_parts(1, 601).unwrap(),
            NaiveDate::from_ymd_opt(1900, 1, 2).unwrap().and_hms_opt(10, 1, 0).unwrap()
        );
    }
}
