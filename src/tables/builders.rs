// src/tables/builders.rs
//
// Reshapes each classified table into long-format observation records
// indexed by (epiweek, time_value, issue, geo_type, geo_value). Builders
// are pure functions of their input table: re-running one against the same
// table re-derives the same records.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::epiweek::{season_week, season_week_end, EpiWeek};
use crate::records::{RecordKey, RecordSet};
use crate::tables::columns;
use crate::tables::raw::RawTable;
use crate::utils::error::ParseError;
use crate::vocab::{GeoClass, Vocabulary};

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]{4}-[0-9]{2}-[0-9]{2}").expect("Failed to compile ISO_DATE_RE"));
static DMY_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{2}-[0-9]{2}-[0-9]{4}$").expect("Failed to compile DMY_DATE_RE")
});

/// Index columns and page furniture that never become virus signals.
const NON_SIGNAL_COLUMNS: &[&str] = &[
    "geo_value",
    "week",
    "week end",
    "date",
    "weekorder",
    "epiweek",
    "time_value",
    "issue",
];

/// Everything a builder needs besides the table itself: the season, the
/// report week, its end date, and the page's issue (modification) date.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub vocab: &'a Vocabulary,
    pub season_start: i32,
    pub week: u32,
    pub week_end: NaiveDate,
    pub issue: NaiveDate,
}

impl BuildContext<'_> {
    fn epiweek(&self) -> Result<EpiWeek, ParseError> {
        season_week(self.week, self.season_start)
    }
}

/// Normalizes the date spellings seen across seasons to ISO `YYYY-MM-DD`.
/// Anything unrecognised is a hard error, never coerced.
pub fn check_date_format(date_string: &str) -> Result<NaiveDate, ParseError> {
    let s = date_string.trim();
    if let Some(m) = ISO_DATE_RE.find(s) {
        return NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d")
            .map_err(|_| ParseError::UnrecognisedDate(date_string.to_string()));
    }
    if s.contains('/') {
        let dashed = s.replace('/', "-");
        return NaiveDate::parse_from_str(&dashed, "%d-%m-%Y")
            .map_err(|_| ParseError::UnrecognisedDate(date_string.to_string()));
    }
    if DMY_DATE_RE.is_match(s) {
        return NaiveDate::parse_from_str(s, "%d-%m-%Y")
            .map_err(|_| ParseError::UnrecognisedDate(date_string.to_string()));
    }
    Err(ParseError::UnrecognisedDate(date_string.to_string()))
}

/// Builds the lab-level detections table: one row per reporting laboratory,
/// per-virus positive-test counts for a single week, no revision history.
pub fn build_lab_detections(
    table: &RawTable,
    ctx: &BuildContext,
) -> Result<RecordSet, ParseError> {
    let headers = columns::rewrite_lab_headers(&table.columns);
    let geo_idx = headers
        .iter()
        .position(|c| c == "geo_value")
        .ok_or_else(|| ParseError::MissingColumn("reporting laboratory".to_string()))?;

    let epiweek = ctx.epiweek()?.encode();
    let mut set = RecordSet::new();

    for (row_idx, _) in table.rows.iter().enumerate() {
        let Some(geo_raw) = table.value(row_idx, geo_idx) else {
            continue;
        };
        let geo_value = ctx.vocab.normalize_geo(&geo_raw.to_lowercase());
        let geo_type = ctx.vocab.geo_class(&geo_value, GeoClass::Lab);
        let key = RecordKey {
            epiweek,
            time_value: ctx.week_end,
            issue: ctx.issue,
            geo_type,
            geo_value,
        };
        for (col_idx, header) in headers.iter().enumerate() {
            if col_idx == geo_idx || NON_SIGNAL_COLUMNS.contains(&header.as_str()) {
                continue;
            }
            if let Some(value) = table.numeric(row_idx, col_idx) {
                set.insert_value(&key, header, value);
            }
        }
        // Keep the lab row even when every count is missing.
        set.insert_row(key, Default::default());
    }

    Ok(set)
}

/// Builds the national cumulative counts table: one row per historical week
/// up to the current one, per-virus positive-test counts, nation geography.
pub fn build_national_counts(
    table: &RawTable,
    ctx: &BuildContext,
) -> Result<RecordSet, ParseError> {
    let week_idx = table
        .column_index("week")
        .ok_or_else(|| ParseError::MissingColumn("week".to_string()))?;
    let week_end_idx = table.column_index("week end");

    // Every non-week column is a per-virus positive-test count.
    let headers: Vec<Option<String>> = table
        .columns
        .iter()
        .map(|col| {
            if col.contains("week") {
                None
            } else {
                let virus = ctx.vocab.normalize_virus(col);
                Some(format!("{}_positive_tests", virus.replace(' ', "_")))
            }
        })
        .collect();

    let mut set = RecordSet::new();
    for (row_idx, _) in table.rows.iter().enumerate() {
        let Some(week) = table
            .numeric(row_idx, week_idx)
            .map(|w| w as u32)
        else {
            continue;
        };
        let epiweek = season_week(week, ctx.season_start)?;
        // Missing week-end dates are derived from the week number.
        let time_value = match week_end_idx.and_then(|i| table.value(row_idx, i)) {
            Some(raw) => check_date_format(raw)?,
            None => season_week_end(week, ctx.season_start)?,
        };
        let key = RecordKey {
            epiweek: epiweek.encode(),
            time_value,
            issue: ctx.issue,
            geo_type: GeoClass::Nation,
            geo_value: "ca".to_string(),
        };
        for (col_idx, header) in headers.iter().enumerate() {
            let Some(header) = header else { continue };
            if let Some(value) = table.numeric(row_idx, col_idx) {
                set.insert_value(&key, header, value);
            }
        }
    }

    Ok(set)
}

/// Resolves duplicate week rows by dropping the row with the lowest
/// reported national test count: duplicates are truncated partial reports
/// superseded by a fuller one under the same week number.
pub fn deduplicate_rows(table: &mut RawTable) {
    let Some(week_idx) = table.column_index("week") else {
        return;
    };
    let Some(can_idx) = table.column_index("can tests") else {
        return;
    };

    let weeks: Vec<Option<String>> = table
        .rows
        .iter()
        .map(|r| r.get(week_idx).cloned().flatten())
        .collect();

    let mut drop: Vec<usize> = Vec::new();
    let mut processed: HashSet<&str> = HashSet::new();
    for week in weeks.iter().flatten() {
        // Each distinct week number resolves exactly once.
        if !processed.insert(week.as_str()) {
            continue;
        }
        let dup_rows: Vec<usize> = weeks
            .iter()
            .enumerate()
            .filter(|(_, w)| w.as_deref() == Some(week.as_str()))
            .map(|(j, _)| j)
            .collect();
        if dup_rows.len() < 2 {
            continue;
        }
        // idxmin: the first row holding the minimum count among duplicates.
        let min_row = dup_rows
            .iter()
            .copied()
            .min_by(|&a, &b| {
                let va = table.numeric(a, can_idx).unwrap_or(f64::INFINITY);
                let vb = table.numeric(b, can_idx).unwrap_or(f64::INFINITY);
                va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("duplicate group is non-empty");
        drop.push(min_row);
    }

    drop.sort_unstable();
    for idx in drop.into_iter().rev() {
        table.rows.remove(idx);
    }
}

/// Builds a regional percent-positive table. Wide region columns
/// (`{region} tests`, `{region} {virus}%`) pivot into one row per
/// (week, region); positive-test counts are derived from the percentage
/// and the total tests, the table's defining characteristic. Influenza
/// tables carry the two subtype percentages instead of a combined one.
pub fn build_percent_positive(
    table: &mut RawTable,
    ctx: &BuildContext,
    flu: bool,
    overwrite_weeks: bool,
) -> Result<RecordSet, ParseError> {
    deduplicate_rows(table);

    let headers: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let c = columns::respell_pct(c);
            if flu {
                // Subtype-only headers ("a%", "b%") gain the flu prefix.
                if let Some(rest) = c.strip_prefix("a_pct") {
                    return format!("flua_pct{rest}");
                }
                if let Some(rest) = c.strip_prefix("b_pct") {
                    return format!("flub_pct{rest}");
                }
            }
            c
        })
        .collect();

    let week_idx = headers
        .iter()
        .position(|c| c == "week")
        .ok_or_else(|| ParseError::MissingColumn("week".to_string()))?;
    let week_end_idx = headers
        .iter()
        .position(|c| c == "week end")
        .ok_or_else(|| ParseError::MissingColumn("week end".to_string()))?;

    // The table's virus: taken from its percent column. Influenza tables
    // report subtypes and use the combined "flu" name for the test totals.
    let virus = if flu {
        "flu".to_string()
    } else {
        headers
            .iter()
            .find_map(|c| c.split_once("_pct_positive").map(|(v, _)| v.to_string()))
            .ok_or_else(|| ParseError::MissingColumn("pct_positive".to_string()))?
    };

    // Column groups per region: each "{region} tests" column opens a group
    // and the percent columns that follow belong to it.
    struct RegionGroup {
        region: String,
        tests_idx: usize,
        pct_cols: Vec<(String, usize)>,
    }
    let mut groups: Vec<RegionGroup> = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        if let Some(region) = header.strip_suffix(" tests") {
            if !region.is_empty() {
                groups.push(RegionGroup {
                    region: region.split(' ').next().unwrap_or(region).to_string(),
                    tests_idx: idx,
                    pct_cols: Vec::new(),
                });
            }
        } else if header.contains("_pct_positive") {
            if let Some(group) = groups.last_mut() {
                let signal = if flu {
                    header.clone()
                } else {
                    format!("{virus}_pct_positive")
                };
                group.pct_cols.push((signal, idx));
            }
        }
    }
    if groups.is_empty() {
        return Err(ParseError::MalformedTable(
            "percent-positive table has no region columns".to_string(),
        ));
    }

    let mut set = RecordSet::new();
    for (row_idx, _) in table.rows.iter().enumerate() {
        let Some(raw_week) = table.numeric(row_idx, week_idx).map(|w| w as u32) else {
            continue;
        };
        let time_value = match table.value(row_idx, week_end_idx) {
            Some(raw) => check_date_format(raw)?,
            None => continue,
        };
        // Remake week numbers from dates when the season skipped week 53.
        let week = if overwrite_weeks {
            EpiWeek::from_date(time_value).week
        } else {
            raw_week
        };
        let epiweek = season_week(week, ctx.season_start)?.encode();

        for group in &groups {
            let geo_value = ctx.vocab.normalize_geo(&group.region);
            let geo_type = ctx.vocab.geo_class(&geo_value, GeoClass::Lab);
            let key = RecordKey {
                epiweek,
                time_value,
                issue: ctx.issue,
                geo_type,
                geo_value,
            };

            let tests = table.numeric(row_idx, group.tests_idx);
            if let Some(tests) = tests {
                set.insert_value(&key, &format!("{virus}_tests"), tests);
            }
            for (signal, pct_idx) in &group.pct_cols {
                let Some(pct) = table.numeric(row_idx, *pct_idx) else {
                    continue;
                };
                set.insert_value(&key, signal, pct);
                // Positive counts are derived, not given.
                if let Some(tests) = tests {
                    let positive = pct / 100.0 * tests;
                    let positive_signal = if flu {
                        signal.replace("_pct_positive", "_positive_tests")
                    } else {
                        format!("{virus}_positive_tests")
                    };
                    set.insert_value(&key, &positive_signal, positive);
                }
            }
        }
    }

    // Influenza tables also carry the combined signal, summed from the
    // derived subtype counts.
    if flu {
        let keys: Vec<RecordKey> = set.rows().map(|(k, _)| k.clone()).collect();
        for key in keys {
            let (a, b, tests) = {
                let signals = set.get(&key).expect("key enumerated from set");
                (
                    signals.get("flua_positive_tests").copied(),
                    signals.get("flub_positive_tests").copied(),
                    signals.get("flu_tests").copied(),
                )
            };
            if let (Some(a), Some(b)) = (a, b) {
                let combined = a + b;
                set.insert_value(&key, "flu_positive_tests", combined);
                if let Some(tests) = tests {
                    if tests != 0.0 {
                        set.insert_value(&key, "flu_pct_positive", combined / tests * 100.0);
                    }
                }
            }
        }
    }

    Ok(set)
}

/// Hard bounds assertion on every percent-positive signal, applied after a
/// table is built unless the season/week is the documented exemption.
pub fn assert_pct_bounds(set: &RecordSet, context: &str) -> Result<(), ParseError> {
    for (_, signals) in set.rows() {
        for (column, value) in signals {
            if column.contains("pct_positive") && !(0.0..=100.0).contains(value) {
                return Err(ParseError::PctOutOfBounds {
                    column: column.clone(),
                    value: *value,
                    context: context.to_string(),
                });
            }
        }
    }
    Ok(())
}
