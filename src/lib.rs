// src/lib.rs
//
// Harvester for Canada's weekly respiratory virus detection reports.
// Historical seasons come from archived HTML report pages, the current
// season from the interactive dashboard's CSV feeds; both funnel into a
// common record layout, are merged across report revisions, and are
// written out as per-season CSV files.

pub mod epiweek;
pub mod merge;
pub mod phac;
pub mod records;
pub mod season;
pub mod storage;
pub mod tables;
pub mod utils;
pub mod vocab;
