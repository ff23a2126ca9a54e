//! Japanese national holidays.
//!
//! Rules as in force from 2000 on, including the 2019 enthronement days
//! and the 2020/2021 Olympic moves. Equinoxes use the usual approximation,
//! valid for 1980 to 2099; outside that range they are not reported.

use chrono::{Datelike, NaiveDate, Weekday};

/// Whether `date` is a national holiday, substitute holiday or citizens'
/// holiday.
pub fn is_national_holiday(date: NaiveDate) -> bool {
    is_named_holiday(date) || is_substitute_holiday(date) || is_citizens_holiday(date)
}

/// A Sunday holiday moves to the next day that is not itself a holiday.
fn is_substitute_holiday(date: NaiveDate) -> bool {
    if is_named_holiday(date) {
        return false;
    }
    let mut day = date;
    while let Some(prev) = day.pred_opt() {
        if !is_named_holiday(prev) {
            return false;
        }
        if prev.weekday() == Weekday::Sun {
            return true;
        }
        day = prev;
    }
    false
}

/// A weekday wedged between two holidays.
fn is_citizens_holiday(date: NaiveDate) -> bool {
    if date.weekday() == Weekday::Sun || is_named_holiday(date) {
        return false;
    }
    match (date.pred_opt(), date.succ_opt()) {
        (Some(prev), Some(next)) => is_named_holiday(prev) && is_named_holiday(next),
        _ => false,
    }
}

fn is_named_holiday(date: NaiveDate) -> bool {
    let year = date.year();
    let day = date.day();
    match date.month() {
        1 => day == 1 || day == nth_monday(date, 2),
        2 => day == 11 || (year >= 2020 && day == 23),
        3 => vernal_equinox(year) == Some(day),
        4 => day == 29 || (year == 2019 && day == 30),
        5 => matches!(day, 3..=5) || (year == 2019 && matches!(day, 1 | 2)),
        7 => match year {
            2020 => matches!(day, 23 | 24),
            2021 => matches!(day, 22 | 23),
            _ => day == nth_monday(date, 3),
        },
        8 => match year {
            2020 => day == 10,
            2021 => day == 8,
            y if y >= 2016 => day == 11,
            _ => false,
        },
        9 => day == nth_monday(date, 3) || autumnal_equinox(year) == Some(day),
        10 => match year {
            2020 | 2021 => false,
            2019 => day == 22 || day == nth_monday(date, 2),
            _ => day == nth_monday(date, 2),
        },
        11 => matches!(day, 3 | 23),
        12 => (1989..=2018).contains(&year) && day == 23,
        _ => false,
    }
}

/// Day of the month of the `n`th Monday in `date`'s month.
fn nth_monday(date: NaiveDate, n: u8) -> u32 {
    NaiveDate::from_weekday_of_month_opt(date.year(), date.month(), Weekday::Mon, n)
        .map_or(0, |d| d.day())
}

fn equinox(year: i32, base: f64) -> Option<u32> {
    if !(1980..=2099).contains(&year) {
        return None;
    }
    let offset = f64::from(year - 1980);
    let leap_days = ((year - 1980) / 4) as f64;
    Some((base + 0.242194 * offset - leap_days).floor() as u32)
}

fn vernal_equinox(year: i32) -> Option<u32> {
    equinox(year, 20.8431)
}

fn autumnal_equinox(year: i32) -> Option<u32> {
    equinox(year, 23.2488)
}
