//! Bikram Sambat (BS) calendar.
//!
//! All dates the user types or sees are BS dates. Internally a date is an
//! offset in days from BS 2000-01-01, which maps one-to-one onto the AD
//! calendar through [`table::epoch_ad`]. Conversions outside the table range
//! are errors rather than guesses.

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

mod table;

pub use table::{BS_END_YEAR, BS_START_YEAR};

/// Nepal Standard Time is UTC+05:45.
const NEPAL_OFFSET_SECS: i32 = 5 * 3600 + 45 * 60;

const MONTH_NAMES: [&str; 12] = [
    "Baisakh", "Jestha", "Asar", "Shrawan", "Bhadra", "Asoj", "Kartik", "Mangsir", "Poush", "Magh",
    "Falgun", "Chaitra",
];

const MONTH_NAMES_NP: [&str; 12] = [
    "बैशाख", "जेठ", "असार", "साउन", "भदौ", "असोज", "कात्तिक", "मंसिर", "पुस", "माघ", "फागुन", "चैत",
];

const WEEKDAY_NAMES_NP: [&str; 7] = [
    "आइतबार", "सोमबार", "मङ्गलबार", "बुधबार", "बिहीबार", "शुक्रबार", "शनिबार",
];

const NEPALI_DIGITS: [char; 10] = ['०', '१', '२', '३', '४', '५', '६', '७', '८', '९'];

// ---------------------------------------------------------------------------
// Table lookups
// ---------------------------------------------------------------------------

fn year_row(year: u16) -> Result<&'static [u8; 12]> {
    if !(BS_START_YEAR..=BS_END_YEAR).contains(&year) {
        return Err(Error::validation(format!(
            "BS year {year} is outside the supported range {BS_START_YEAR}-{BS_END_YEAR}"
        )));
    }
    Ok(&table::MONTH_DAYS[(year - BS_START_YEAR) as usize])
}

/// Number of days in a BS month (`month` is 1-based).
pub fn days_in_month(year: u16, month: u8) -> Result<u8> {
    if !(1..=12).contains(&month) {
        return Err(Error::validation(format!(
            "Invalid BS month {month}: expected 1-12"
        )));
    }
    Ok(year_row(year)?[(month - 1) as usize])
}

pub fn days_in_year(year: u16) -> Result<u16> {
    Ok(year_row(year)?.iter().map(|d| *d as u16).sum())
}

pub fn month_name(month: u8) -> Option<&'static str> {
    MONTH_NAMES.get(month.checked_sub(1)? as usize).copied()
}

pub fn month_name_np(month: u8) -> Option<&'static str> {
    MONTH_NAMES_NP.get(month.checked_sub(1)? as usize).copied()
}

pub fn weekday_name_np(weekday: Weekday) -> &'static str {
    WEEKDAY_NAMES_NP[weekday.num_days_from_sunday() as usize]
}

/// Replace ASCII digits with Devanagari digits.
pub fn to_nepali_digits(input: &str) -> String {
    input
        .chars()
        .map(|c| match c.to_digit(10) {
            Some(d) if c.is_ascii_digit() => NEPALI_DIGITS[d as usize],
            _ => c,
        })
        .collect()
}

/// Replace Devanagari digits with ASCII digits.
pub fn from_nepali_digits(input: &str) -> String {
    input
        .chars()
        .map(|c| match NEPALI_DIGITS.iter().position(|n| *n == c) {
            Some(d) => char::from(b'0' + d as u8),
            None => c,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// BsDate
// ---------------------------------------------------------------------------

/// A validated Bikram Sambat date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BsDate {
    year: u16,
    month: u8,
    day: u8,
}

/// Calendar-wise distance between two BS dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BsDuration {
    pub years: u32,
    pub months: u32,
    pub days: u32,
}

impl BsDuration {
    pub fn total_months(&self) -> u32 {
        self.years * 12 + self.months
    }
}

impl fmt::Display for BsDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn unit(n: u32, name: &str) -> String {
            if n == 1 {
                format!("{n} {name}")
            } else {
                format!("{n} {name}s")
            }
        }
        write!(
            f,
            "{}, {}, {}",
            unit(self.years, "year"),
            unit(self.months, "month"),
            unit(self.days, "day")
        )
    }
}

/// Layout data for rendering one BS month.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthGrid {
    pub year: u16,
    pub month: u8,
    pub month_name: &'static str,
    pub month_name_np: &'static str,
    pub days: u8,
    /// 0 = Sunday (Aaitabar), the first column of a Nepali calendar.
    pub first_weekday: u8,
    pub first_day_ad: NaiveDate,
}

impl BsDate {
    pub fn new(year: u16, month: u8, day: u8) -> Result<Self> {
        let max_day = days_in_month(year, month)?;
        if day == 0 || day > max_day {
            return Err(Error::validation(format!(
                "Invalid day {day} for {year}-{month:02}: month has {max_day} days"
            )));
        }
        Ok(Self { year, month, day })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn day(&self) -> u8 {
        self.day
    }

    /// First supported date (BS 2000-01-01).
    pub fn min() -> Self {
        Self {
            year: BS_START_YEAR,
            month: 1,
            day: 1,
        }
    }

    /// Last supported date.
    pub fn max() -> Self {
        let last = table::MONTH_DAYS[(BS_END_YEAR - BS_START_YEAR) as usize][11];
        Self {
            year: BS_END_YEAR,
            month: 12,
            day: last,
        }
    }

    /// Today in Nepal, regardless of the host timezone.
    pub fn today() -> Result<Self> {
        let offset = FixedOffset::east_opt(NEPAL_OFFSET_SECS)
            .ok_or_else(|| Error::State("invalid Nepal UTC offset".into()))?;
        Self::from_ad(Utc::now().with_timezone(&offset).date_naive())
    }

    /// Days elapsed since BS 2000-01-01.
    fn ordinal(&self) -> i64 {
        let mut days: i64 = 0;
        for row in &table::MONTH_DAYS[..(self.year - BS_START_YEAR) as usize] {
            days += row.iter().map(|d| *d as i64).sum::<i64>();
        }
        let row = &table::MONTH_DAYS[(self.year - BS_START_YEAR) as usize];
        days += row[..(self.month - 1) as usize]
            .iter()
            .map(|d| *d as i64)
            .sum::<i64>();
        days + (self.day as i64 - 1)
    }

    fn from_ordinal(ordinal: i64) -> Result<Self> {
        if ordinal < 0 {
            return Err(Error::validation(
                "Date is before the supported BS range (2000-01-01)",
            ));
        }
        let mut remaining = ordinal;
        for (offset, row) in table::MONTH_DAYS.iter().enumerate() {
            let year_len: i64 = row.iter().map(|d| *d as i64).sum();
            if remaining >= year_len {
                remaining -= year_len;
                continue;
            }
            for (month_idx, len) in row.iter().enumerate() {
                let len = *len as i64;
                if remaining < len {
                    return Ok(Self {
                        year: BS_START_YEAR + offset as u16,
                        month: month_idx as u8 + 1,
                        day: remaining as u8 + 1,
                    });
                }
                remaining -= len;
            }
        }
        Err(Error::validation(format!(
            "Date is after the supported BS range ({BS_END_YEAR})"
        )))
    }

    pub fn to_ad(&self) -> NaiveDate {
        table::epoch_ad() + Duration::days(self.ordinal())
    }

    pub fn from_ad(date: NaiveDate) -> Result<Self> {
        let offset = (date - table::epoch_ad()).num_days();
        Self::from_ordinal(offset)
    }

    pub fn weekday(&self) -> Weekday {
        self.to_ad().weekday()
    }

    pub fn add_days(&self, days: i64) -> Result<Self> {
        Self::from_ordinal(self.ordinal() + days)
    }

    /// Signed number of days from `self` to `other`.
    pub fn days_until(&self, other: &BsDate) -> i64 {
        other.ordinal() - self.ordinal()
    }

    /// Move by whole months; the day is clamped to the target month length.
    pub fn add_months(&self, months: i32) -> Result<Self> {
        let zero_based = (self.year as i64) * 12 + (self.month as i64 - 1) + months as i64;
        if zero_based < 0 {
            return Err(Error::validation("Month arithmetic underflowed"));
        }
        let year = u16::try_from(zero_based / 12)
            .map_err(|_| Error::validation("Month arithmetic overflowed"))?;
        let month = (zero_based % 12) as u8 + 1;
        let max_day = days_in_month(year, month)?;
        Self::new(year, month, self.day.min(max_day))
    }

    /// Calendar difference `end - self` in years, months and days.
    pub fn diff(&self, end: &BsDate) -> Result<BsDuration> {
        if end < self {
            return Err(Error::validation(format!(
                "End date {end} is before start date {self}"
            )));
        }
        // Whole months first: the largest `m` whose clamped anchor does not
        // pass `end`. The remainder is counted in days from that anchor.
        let mut months =
            (end.year as i32 - self.year as i32) * 12 + (end.month as i32 - self.month as i32);
        let mut anchor = self.add_months(months)?;
        while anchor > *end {
            months -= 1;
            anchor = self.add_months(months)?;
        }
        let days = anchor.days_until(end);

        Ok(BsDuration {
            years: (months / 12) as u32,
            months: (months % 12) as u32,
            days: days as u32,
        })
    }

    pub fn month_name(&self) -> &'static str {
        MONTH_NAMES[(self.month - 1) as usize]
    }

    pub fn month_name_np(&self) -> &'static str {
        MONTH_NAMES_NP[(self.month - 1) as usize]
    }

    /// `2081-05-15` rendered with Devanagari digits.
    pub fn to_nepali_string(&self) -> String {
        to_nepali_digits(&self.to_string())
    }

    /// Long form such as `15 Bhadra 2081`.
    pub fn to_long_string(&self) -> String {
        format!("{} {} {}", self.day, self.month_name(), self.year)
    }

    /// Long form such as `१५ भदौ २०८१`.
    pub fn to_long_string_np(&self) -> String {
        to_nepali_digits(&format!(
            "{} {} {}",
            self.day,
            self.month_name_np(),
            self.year
        ))
    }

    pub fn first_of_month(&self) -> Self {
        Self {
            year: self.year,
            month: self.month,
            day: 1,
        }
    }
}

pub fn month_grid(year: u16, month: u8) -> Result<MonthGrid> {
    let days = days_in_month(year, month)?;
    let first = BsDate::new(year, month, 1)?;
    Ok(MonthGrid {
        year,
        month,
        month_name: first.month_name(),
        month_name_np: first.month_name_np(),
        days,
        first_weekday: first.weekday().num_days_from_sunday() as u8,
        first_day_ad: first.to_ad(),
    })
}

impl fmt::Display for BsDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for BsDate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let ascii = from_nepali_digits(s.trim());
        let parts: Vec<&str> = ascii.split(['-', '/', '.']).collect();
        if parts.len() != 3 {
            return Err(Error::validation(format!(
                "Invalid BS date '{s}': expected YYYY-MM-DD"
            )));
        }
        let parse = |part: &str, what: &str| -> Result<u32> {
            part.trim().parse::<u32>().map_err(|_| {
                Error::validation(format!("Invalid BS date '{s}': bad {what} '{part}'"))
            })
        };
        let year = parse(parts[0], "year")?;
        let month = parse(parts[1], "month")?;
        let day = parse(parts[2], "day")?;
        let year = u16::try_from(year)
            .map_err(|_| Error::validation(format!("Invalid BS year {year}")))?;
        let month = u8::try_from(month)
            .map_err(|_| Error::validation(format!("Invalid BS month {month}")))?;
        let day =
            u8::try_from(day).map_err(|_| Error::validation(format!("Invalid BS day {day}")))?;
        BsDate::new(year, month, day)
    }
}

impl Serialize for BsDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BsDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
