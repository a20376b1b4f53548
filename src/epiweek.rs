// src/epiweek.rs
//
// CDC/MMWR epidemiological week calendar. An epi week runs Sunday through
// Saturday; week 1 of a year is the first week containing at least four days
// of January, so its Saturday end date falls on or after January 4th.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::utils::error::ParseError;

/// The Canadian respiratory season convention: week numbers >= 35 belong to
/// the season's start year, week numbers < 35 to start year + 1. The season
/// runs roughly September through August.
pub const LAST_WEEK_OF_YEAR: u32 = 35;

/// An epidemiological week under the CDC/MMWR week-numbering convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpiWeek {
    pub year: i32,
    pub week: u32,
}

impl EpiWeek {
    pub fn new(year: i32, week: u32) -> Result<Self, ParseError> {
        if week == 0 || week > 53 {
            return Err(ParseError::InvalidEpiweek { year, week });
        }
        let ew = Self { year, week };
        // Week 53 only exists in years whose calendar admits it.
        if week == 53 && EpiWeek::from_date(ew.end_date()).year != year {
            return Err(ParseError::InvalidEpiweek { year, week });
        }
        Ok(ew)
    }

    /// The Saturday ending this epi week.
    pub fn end_date(&self) -> NaiveDate {
        first_week_end(self.year) + Duration::weeks(self.week as i64 - 1)
    }

    /// The epi week containing the given date.
    pub fn from_date(date: NaiveDate) -> Self {
        // Saturday on or after `date` closes the week containing it.
        let days_to_saturday = (6 - date.weekday().num_days_from_sunday()) as i64;
        let end = date + Duration::days(days_to_saturday);

        let mut year = end.year();
        let mut week1_end = first_week_end(year);
        if end < week1_end {
            // A Saturday in early January belongs to the previous year.
            year -= 1;
            week1_end = first_week_end(year);
        }
        let week = ((end - week1_end).num_days() / 7 + 1) as u32;
        Self { year, week }
    }

    /// Canonical integer encoding, year * 100 + week (e.g. 202035).
    pub fn encode(&self) -> u32 {
        self.year as u32 * 100 + self.week
    }
}

impl std::fmt::Display for EpiWeek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{:02}", self.year, self.week)
    }
}

/// Saturday ending week 1 of `year`: the first Saturday on or after Jan 4.
fn first_week_end(year: i32) -> NaiveDate {
    let jan4 = NaiveDate::from_ymd_opt(year, 1, 4).expect("Jan 4 always exists");
    let days_to_saturday = match jan4.weekday() {
        Weekday::Sat => 0,
        wd => (6 - wd.num_days_from_sunday()) as i64,
    };
    jan4 + Duration::days(days_to_saturday)
}

/// Resolves a report week number against a season's start year.
pub fn season_week(week: u32, start_year: i32) -> Result<EpiWeek, ParseError> {
    let year = if week < LAST_WEEK_OF_YEAR {
        start_year + 1
    } else {
        start_year
    };
    EpiWeek::new(year, week)
}

/// The week-end date for a report week of a season (ISO `YYYY-MM-DD`).
pub fn season_week_end(week: u32, start_year: i32) -> Result<NaiveDate, ParseError> {
    Ok(season_week(week, start_year)?.end_date())
}
