// src/tables/patches.rs
//
// One-off corrections for known historical anomalies in the source
// reports. These are data, not logic: a registry of
// (season start year, week number, caption substring) -> transform entries
// applied right after a table is parsed, before generic column rewriting,
// so the rest of the pipeline stays free of special cases. New seasons'
// anomalies are additive rows in the registry.

use crate::tables::raw::RawTable;

/// A single declarative table transform.
#[derive(Debug, Clone, Copy)]
pub enum TablePatch {
    /// Replace the entire header row verbatim.
    ReplaceColumns(&'static [&'static str]),
    /// Rename one header verbatim.
    RenameColumn {
        from: &'static str,
        to: &'static str,
    },
    /// Set `column` for every row whose "week" cell equals `week` verbatim.
    SetCellForWeek {
        week: &'static str,
        column: &'static str,
        value: &'static str,
    },
    /// Replace a value wherever it appears in the table body.
    ReplaceValue {
        from: &'static str,
        to: &'static str,
    },
    /// Drop the leading cell of the first body row (a duplicated week
    /// number that shifts every entry one column to the right).
    DropLeadingCell,
    /// Replace a cell value (matched exactly, case-insensitively) in the
    /// column whose header contains `column_contains`.
    ReplaceCellExact {
        column_contains: &'static str,
        from: &'static str,
        to: &'static str,
    },
}

/// One registry entry: the season/week it applies to, an optional caption
/// predicate, and the transform.
#[derive(Debug, Clone, Copy)]
pub struct PatchRule {
    pub season_start: i32,
    pub week: u32,
    pub caption_contains: Option<&'static str>,
    pub patch: TablePatch,
}

/// In week 35 of the 2017-2018 season the positive enterovirus table has
/// French headers; replace them with the English equivalents (including the
/// numbered duplicate suffixes the generic rewrite strips).
const ENTERO_2017_W35_COLUMNS: &[&str] = &[
    "week",
    "week end",
    "canada tests",
    "entero/rhino%",
    "at tests",
    "entero/rhino%.1",
    "qc tests",
    "entero/rhino%.2",
    "on tests",
    "entero/rhino%.3",
    "pr tests",
    "entero/rhino%.4",
    "bc tests",
    "entero/rhino%.5",
];

pub const PATCHES: &[PatchRule] = &[
    PatchRule {
        season_start: 2017,
        week: 35,
        caption_contains: Some("entero"),
        patch: TablePatch::ReplaceColumns(ENTERO_2017_W35_COLUMNS),
    },
    // Week 35 of 2017-2018: the positive adenovirus table has ">week end"
    // instead of "week end".
    PatchRule {
        season_start: 2017,
        week: 35,
        caption_contains: Some("adeno"),
        patch: TablePatch::RenameColumn {
            from: ">week end",
            to: "week end",
        },
    },
    // Week 47 of 2017-2018: a date written as 201-11-25 instead of
    // 2017-11-25.
    PatchRule {
        season_start: 2017,
        week: 47,
        caption_contains: Some("rsv"),
        patch: TablePatch::SetCellForWeek {
            week: "47",
            column: "week end",
            value: "2017-11-25",
        },
    },
    // Week 41 of 2015-2016: a date written m-d-y instead of d-m-y.
    PatchRule {
        season_start: 2015,
        week: 41,
        caption_contains: None,
        patch: TablePatch::ReplaceValue {
            from: "10-17-2015",
            to: "17-10-2015",
        },
    },
    // Week 11 of 2022-2023: in the positive hMPV table a date is written as
    // 022-09-03 instead of 2022-09-03.
    PatchRule {
        season_start: 2022,
        week: 11,
        caption_contains: Some("hmpv"),
        patch: TablePatch::SetCellForWeek {
            week: "35",
            column: "week end",
            value: "2022-09-03",
        },
    },
    // Week 35 of 2019-2020: the positive adenovirus table has its week
    // number duplicated, shifting all entries one column to the right.
    PatchRule {
        season_start: 2019,
        week: 35,
        caption_contains: Some("adeno"),
        patch: TablePatch::DropLeadingCell,
    },
    // Week 3 of 2016-2017: a lab row reads "Province of" where it means
    // Alberta.
    PatchRule {
        season_start: 2016,
        week: 3,
        caption_contains: None,
        patch: TablePatch::ReplaceCellExact {
            column_contains: "reporting",
            from: "province of",
            to: "alberta",
        },
    },
];

/// Applies every registry entry matching (season, week, caption) in order.
pub fn apply_patches(table: &mut RawTable, season_start: i32, week: u32, caption: &str) {
    let caption = caption.to_lowercase();
    for rule in PATCHES {
        if rule.season_start != season_start || rule.week != week {
            continue;
        }
        if let Some(needle) = rule.caption_contains {
            if !caption.contains(needle) {
                continue;
            }
        }
        apply(table, rule.patch);
    }
}

fn apply(table: &mut RawTable, patch: TablePatch) {
    match patch {
        TablePatch::ReplaceColumns(columns) => {
            table.columns = columns.iter().map(|c| c.to_string()).collect();
        }
        TablePatch::RenameColumn { from, to } => {
            for col in &mut table.columns {
                if col == from {
                    *col = to.to_string();
                }
            }
        }
        TablePatch::SetCellForWeek { week, column, value } => {
            let Some(week_idx) = table.column_index("week") else {
                return;
            };
            let Some(col_idx) = table.column_index(column) else {
                return;
            };
            for row in &mut table.rows {
                if row.get(week_idx).and_then(|v| v.as_deref()) == Some(week) {
                    if let Some(cell) = row.get_mut(col_idx) {
                        *cell = Some(value.to_string());
                    }
                }
            }
        }
        TablePatch::ReplaceValue { from, to } => {
            for row in &mut table.rows {
                for cell in row.iter_mut().flatten() {
                    if cell.contains(from) {
                        *cell = cell.replace(from, to);
                    }
                }
            }
        }
        TablePatch::DropLeadingCell => {
            if let Some(first) = table.rows.first_mut() {
                if !first.is_empty() {
                    first.remove(0);
                }
            }
        }
        TablePatch::ReplaceCellExact {
            column_contains,
            from,
            to,
        } => {
            let Some(idx) = table.find_column(column_contains) else {
                return;
            };
            for row in &mut table.rows {
                if let Some(Some(cell)) = row.get_mut(idx) {
                    if cell.trim().eq_ignore_ascii_case(from) {
                        *cell = to.to_string();
                    }
                }
            }
        }
    }
}

/// Weeks whose report pages are effectively empty (only the abbreviations
/// table and bare headers) and are skipped outright.
pub fn is_skipped_week(season_start: i32, week: u32) -> bool {
    season_start == 2019 && (week == 5 || week == 47)
}

/// The 2014-2015 season skips week 53 in the percent-positive tables, so
/// week numbers after 52 run one too high; these weeks recompute their week
/// numbers from the week-end dates instead.
pub fn overwrite_week_numbers(season_start: i32, week: u32) -> bool {
    season_start == 2014 && matches!(week, 53 | 2 | 3)
}

/// Week 39 of the 2014-2015 season genuinely reports a percent positive
/// above 100 in the source data; it is preserved, not corrected.
pub fn pct_bounds_exempt(season_start: i32, week: u32) -> bool {
    season_start == 2014 && week == 39
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[Option<&str>]]) -> RawTable {
        RawTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|v| v.map(|s| s.to_string())).collect())
                .collect(),
        }
    }

    #[test]
    fn replaces_french_entero_headers() {
        let mut t = table(&["semaine", "fin de semaine"], &[]);
        apply_patches(&mut t, 2017, 35, "Positive Entero/Rhinovirus Tests (%)");
        assert_eq!(t.columns[0], "week");
        assert_eq!(t.columns.len(), 14);
    }

    #[test]
    fn fixes_malformed_week_end_date() {
        let mut t = table(
            &["week", "week end"],
            &[
                &[Some("46"), Some("2017-11-18")],
                &[Some("47"), Some("201-11-25")],
            ],
        );
        apply_patches(&mut t, 2017, 47, "Positive RSV Tests (%)");
        assert_eq!(t.value(1, 1), Some("2017-11-25"));
        assert_eq!(t.value(0, 1), Some("2017-11-18"));
    }

    #[test]
    fn swaps_month_day_order() {
        let mut t = table(&["week", "week end"], &[&[Some("41"), Some("10-17-2015")]]);
        apply_patches(&mut t, 2015, 41, "Positive RSV Tests (%)");
        assert_eq!(t.value(0, 1), Some("17-10-2015"));
    }

    #[test]
    fn drops_duplicated_leading_cell() {
        let mut t = table(
            &["week", "week end", "can tests"],
            &[&[Some("35"), Some("35"), Some("2019-08-31")]],
        );
        apply_patches(&mut t, 2019, 35, "Positive Adenovirus Tests (%)");
        assert_eq!(t.rows[0].len(), 2);
        assert_eq!(t.value(0, 0), Some("35"));
        assert_eq!(t.value(0, 1), Some("2019-08-31"));
    }

    #[test]
    fn rewrites_truncated_lab_name() {
        let mut t = table(
            &["reporting laboratory", "rsv test"],
            &[&[Some("Province of"), Some("10")]],
        );
        apply_patches(&mut t, 2016, 3, "Respiratory virus detections");
        assert_eq!(t.value(0, 0), Some("alberta"));
    }

    #[test]
    fn patches_do_not_fire_elsewhere() {
        let mut t = table(&["week", "week end"], &[&[Some("41"), Some("10-17-2015")]]);
        apply_patches(&mut t, 2016, 41, "Positive RSV Tests (%)");
        assert_eq!(t.value(0, 1), Some("10-17-2015"));
    }

    #[test]
    fn skip_and_exemption_sets() {
        assert!(is_skipped_week(2019, 5));
        assert!(is_skipped_week(2019, 47));
        assert!(!is_skipped_week(2018, 5));
        assert!(overwrite_week_numbers(2014, 53));
        assert!(overwrite_week_numbers(2014, 2));
        assert!(!overwrite_week_numbers(2014, 40));
        assert!(pct_bounds_exempt(2014, 39));
        assert!(!pct_bounds_exempt(2015, 39));
    }
}
