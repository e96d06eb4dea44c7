//! Calendar buckets used in stat keys.
//!
//! Weekly statistics run from Wednesday to Tuesday. A date is mapped to the
//! ISO week that contains the Wednesday opening its business week, with a
//! correction for dates in January whose ISO week still belongs to the
//! previous year.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::fmt;

/// Week number and year of a Wednesday→Tuesday business week.
///
/// Rendered as `"<week>-<year>"` inside stat keys, without zero padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeekLabel {
    pub week: u32,
    pub year: i32,
}

impl fmt::Display for WeekLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.week, self.year)
    }
}

fn iso_label(date: NaiveDate) -> WeekLabel {
    let iso = date.iso_week();
    WeekLabel {
        week: iso.week(),
        year: iso.year(),
    }
}

/// Map a date to its business week.
///
/// In January, a date whose ISO week is 1 or above 10 and which is not a
/// Wednesday, Thursday or Friday takes the plain ISO label of the date five
/// days earlier. Otherwise Mondays and Tuesdays belong to the previous week
/// number (the ISO year is kept as is). Everything else is the plain ISO
/// label.
///
/// A Monday or Tuesday at the end of December that ISO already counts as
/// week 1 comes out as week 0.
pub fn week_label(date: NaiveDate) -> WeekLabel {
    let label = iso_label(date);
    let weekday = date.weekday();
    let mid_week = matches!(weekday, Weekday::Wed | Weekday::Thu | Weekday::Fri);

    if date.month() == 1 && (label.week > 10 || label.week == 1) && !mid_week {
        return iso_label(date - Duration::days(5));
    }

    if matches!(weekday, Weekday::Mon | Weekday::Tue) {
        return WeekLabel {
            week: label.week.saturating_sub(1),
            year: label.year,
        };
    }

    label
}

/// Month bucket suffix, e.g. `m-1-2024`.
pub fn month_suffix(date: NaiveDate) -> String {
    format!("m-{}-{}", date.month(), date.year())
}

/// Week bucket suffix, e.g. `w-1-2024`.
pub fn week_suffix(date: NaiveDate) -> String {
    format!("w-{}", week_label(date))
}

/// Day bucket suffix, e.g. `d-2024-01-05`.
pub fn day_suffix(date: NaiveDate) -> String {
    format!("d-{}", date.format("%Y-%m-%d"))
}
