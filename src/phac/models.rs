// src/phac/models.rs
//
// Types crossing the fetch boundary. The client yields already-paired
// (caption, table markup) tuples plus the week metadata, so the core
// pipeline never touches page-level DOM traversal.

use chrono::NaiveDate;

/// One table of interest on a weekly report page, paired with the caption
/// that identifies it.
#[derive(Debug, Clone)]
pub struct CaptionedTable {
    pub caption: String,
    pub markup: String,
}

/// Everything the pipeline needs from one weekly report page.
#[derive(Debug, Clone)]
pub struct WeekReport {
    /// Epidemiological week number as printed on the season index.
    pub week: u32,
    /// End date of the reporting week.
    pub week_end: NaiveDate,
    /// Page modification date, used as the issue date for the figures.
    pub issue: NaiveDate,
    pub tables: Vec<CaptionedTable>,
}

/// A season's worth of weekly reports plus its year range.
#[derive(Debug, Clone)]
pub struct SeasonReports {
    pub start_year: i32,
    pub end_year: i32,
    pub reports: Vec<WeekReport>,
}
