//! Calendar date parsing for date-picker input.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DatePickerError;

static US_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("us date regex")
});
static ISO_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("iso date regex")
});

/// A validated calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CalendarDate {
    /// Parse `MM/DD/YYYY` or `YYYY-MM-DD`.
    ///
    /// ```
    /// use mocrun_core::date::CalendarDate;
    ///
    /// let a = CalendarDate::parse("12/20/2025").unwrap();
    /// let b = CalendarDate::parse("2025-12-20").unwrap();
    /// assert_eq!(a, b);
    /// assert!(CalendarDate::parse("20.12.2025").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, DatePickerError> {
        let invalid = || DatePickerError::InvalidDateFormat {
            input: input.to_string(),
        };
        let trimmed = input.trim();

        let (year, month, day) = if let Some(caps) = US_FORMAT.captures(trimmed) {
            (&caps[3], &caps[1], &caps[2]).parse_parts().ok_or_else(invalid)?
        } else if let Some(caps) = ISO_FORMAT.captures(trimmed) {
            (&caps[1], &caps[2], &caps[3]).parse_parts().ok_or_else(invalid)?
        } else {
            return Err(invalid());
        };

        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;
        Ok(Self { year, month, day })
    }

    /// Months from `self`'s month to `other`'s month (negative when earlier).
    #[must_use]
    pub fn months_until(&self, other: &Self) -> i64 {
        (i64::from(other.year) - i64::from(self.year)) * 12 + i64::from(other.month)
            - i64::from(self.month)
    }

    /// First day of this date's month.
    #[must_use]
    pub fn month_start(&self) -> Self {
        Self { day: 1, ..*self }
    }

    /// Parse a calendar header such as "December 2025" or "DEC 2025".
    #[must_use]
    pub fn from_month_header(header: &str) -> Option<Self> {
        let normalized = header.split_whitespace().collect::<Vec<_>>().join(" ");
        let candidate = format!("1 {normalized}");
        ["%d %B %Y", "%d %b %Y"]
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(&candidate, fmt).ok())
            .map(|d| Self {
                year: d.year(),
                month: d.month(),
                day: 1,
            })
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:02}/{:04}", self.month, self.day, self.year)
    }
}

impl FromStr for CalendarDate {
    type Err = DatePickerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

trait ParseParts {
    fn parse_parts(self) -> Option<(i32, u32, u32)>;
}

impl ParseParts for (&str, &str, &str) {
    fn parse_parts(self) -> Option<(i32, u32, u32)> {
        Some((self.0.parse().ok()?, self.1.parse().ok()?, self.2.parse().ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_impossible_dates() {
        for bad in ["02/30/2025", "13/01/2025", "2025-00-10", "", "12/20/25", "2025/12/20"] {
            assert!(
                matches!(
                    CalendarDate::parse(bad),
                    Err(DatePickerError::InvalidDateFormat { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn leap_day_is_valid_only_in_leap_years() {
        assert!(CalendarDate::parse("02/29/2028").is_ok());
        assert!(CalendarDate::parse("2027-02-29").is_err());
    }

    #[test]
    fn month_header_parsing() {
        let dec = CalendarDate::from_month_header("December 2025").unwrap();
        assert_eq!((dec.year, dec.month), (2025, 12));
        let jan = CalendarDate::from_month_header(" JAN   2027 ").unwrap();
        assert_eq!((jan.year, jan.month), (2027, 1));
        assert!(CalendarDate::from_month_header("Choose month and year").is_none());
    }

    #[test]
    fn months_until_spans_years() {
        let from = CalendarDate::parse("12/16/2025").unwrap();
        let to = CalendarDate::parse("01/01/2027").unwrap();
        assert_eq!(from.months_until(&to), 13);
        assert_eq!(to.months_until(&from), -13);
    }

    proptest! {
        #[test]
        fn both_formats_parse_to_the_same_date(
            year in 1900i32..2200,
            month in 1u32..=12,
            day in 1u32..=28,
        ) {
            let us = CalendarDate::parse(&format!("{month:02}/{day:02}/{year}")).unwrap();
            let iso = CalendarDate::parse(&format!("{year}-{month:02}-{day:02}")).unwrap();
            prop_assert_eq!(us, iso);
            prop_assert_eq!(us.day, day);
        }
    }
}
