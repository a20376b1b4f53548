// src/season.rs
//
// Season-level accumulation. Weekly builder outputs fold into three
// running tables (lab detections, national counts, regional percent
// positive), each keyed by the full record index; a week folds in only if
// none of its keys are already present, so re-running a season over
// already-ingested data is a no-op. After all weeks, a post-pass
// reconciles residual column spellings and derives the combined signals.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::phac::models::WeekReport;
use crate::records::{RecordKey, RecordSet};
use crate::tables::builders::{
    self, assert_pct_bounds, BuildContext,
};
use crate::tables::classify::{self, TableKind};
use crate::tables::columns::{canonical_column, preprocess_columns};
use crate::tables::patches;
use crate::tables::raw::RawTable;
use crate::utils::error::ParseError;
use crate::vocab::{Vocabulary, VIRUSES};

static HPIV_SUBTYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"hpiv\d*.*positive_tests").expect("Failed to compile HPIV_SUBTYPE_RE")
});
static FLU_DETAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"fluah1|fluah3|fluauns|flu_ah1|flu_ah3|flu_auns")
        .expect("Failed to compile FLU_DETAIL_RE")
});

/// The three running tables for one season.
#[derive(Debug, Default)]
pub struct SeasonAccumulator {
    season_start: i32,
    pub detections: RecordSet,
    pub counts: RecordSet,
    pub positives: RecordSet,
}

impl SeasonAccumulator {
    pub fn new(season_start: i32) -> Self {
        Self {
            season_start,
            ..Default::default()
        }
    }

    /// Classifies, patches, builds and folds every table of one weekly
    /// report. A missing table kind is logged, not fatal; format errors
    /// and bounds violations are.
    pub fn ingest_week(
        &mut self,
        report: &WeekReport,
        vocab: &Vocabulary,
    ) -> Result<(), ParseError> {
        if patches::is_skipped_week(self.season_start, report.week) {
            tracing::info!(
                "Skipping effectively-empty week {} of season {}",
                report.week,
                self.season_start
            );
            return Ok(());
        }

        let ctx = BuildContext {
            vocab,
            season_start: self.season_start,
            week: report.week,
            week_end: report.week_end,
            issue: report.issue,
        };

        let mut detections: Option<RecordSet> = None;
        let mut counts: Option<RecordSet> = None;
        let mut week_positives = RecordSet::new();

        for captioned in &report.tables {
            if !classify::caption_is_relevant(&captioned.caption) {
                continue;
            }
            let strip_commas = classify::strips_commas(&captioned.caption);
            let mut table = RawTable::parse(&captioned.markup, strip_commas)?;
            patches::apply_patches(
                &mut table,
                self.season_start,
                report.week,
                &captioned.caption,
            );
            table.columns = preprocess_columns(&table.columns, vocab);

            match classify::classify(&captioned.caption, &table.columns) {
                Some(TableKind::LabDetections) => {
                    detections = Some(builders::build_lab_detections(&table, &ctx)?);
                }
                Some(TableKind::NationalCounts) => {
                    counts = Some(builders::build_national_counts(&table, &ctx)?);
                }
                Some(TableKind::PercentPositive { flu }) => {
                    let overwrite =
                        patches::overwrite_week_numbers(self.season_start, report.week);
                    let set =
                        builders::build_percent_positive(&mut table, &ctx, flu, overwrite)?;
                    if !patches::pct_bounds_exempt(self.season_start, report.week) {
                        assert_pct_bounds(
                            &set,
                            &format!("season {} week {}", self.season_start, report.week),
                        )?;
                    }
                    // The per-virus tables of one week share the same index.
                    week_positives.merge_columns(set);
                }
                None => {
                    tracing::debug!(
                        "Discarding unclassified table: '{}'",
                        captioned.caption
                    );
                }
            }
        }

        match detections {
            Some(set) => {
                if !self.detections.extend_if_new(set) {
                    tracing::debug!(
                        "Week {} detections already ingested, skipping",
                        report.week
                    );
                }
            }
            None => tracing::warn!(
                "Week {} of season {} has no lab detections table",
                report.week,
                self.season_start
            ),
        }
        if let Some(set) = counts {
            self.counts.extend_if_new(set);
        }
        if !week_positives.is_empty() {
            self.positives.extend_if_new(week_positives);
        } else {
            tracing::warn!(
                "Week {} of season {} has no percent-positive tables",
                report.week,
                self.season_start
            );
        }

        Ok(())
    }

    /// Runs the post-pass over the accumulated detections and
    /// percent-positive tables and returns them ready for merging.
    pub fn finish(self) -> (RecordSet, RecordSet, RecordSet) {
        let (detections, positives) = finalize_tables(self.detections, self.positives);
        (detections, self.counts, positives)
    }
}

/// Season post-pass: canonical column spellings, hpiv subtype summation,
/// influenza detail cleanup and combined-signal derivation. Also used for
/// the live-season dashboard tables.
pub fn finalize_tables(
    mut detections: RecordSet,
    mut positives: RecordSet,
) -> (RecordSet, RecordSet) {
    for set in [&mut detections, &mut positives] {
        set.rename_columns(|c| canonical_column(c).map(str::to_string));
        set.drop_columns(|c| c == "flu_a_tests" || c == "flu_b_tests");
        set.drop_columns(|c| FLU_DETAIL_RE.is_match(c));
    }

    sum_hpiv_subtypes(&mut detections);

    for (_, signals) in detections.rows_mut() {
        // flu_positive_tests is the sum of the subtype counts.
        if let (Some(a), Some(b)) = (
            signals.get("flua_positive_tests").copied(),
            signals.get("flub_positive_tests").copied(),
        ) {
            signals.insert("flu_positive_tests".to_string(), a + b);
        }

        // Percent positive always derives from counts where both exist.
        for virus in VIRUSES {
            let positive = signals.get(&format!("{virus}_positive_tests")).copied();
            let tests = signals.get(&format!("{virus}_tests")).copied();
            if let (Some(positive), Some(tests)) = (positive, tests) {
                let pct = if tests != 0.0 {
                    positive / tests * 100.0
                } else {
                    0.0
                };
                signals.insert(format!("{virus}_pct_positive"), pct);
            }
        }
        let flu_tests = signals.get("flu_tests").copied();
        for subtype in ["flua", "flub"] {
            let positive = signals.get(&format!("{subtype}_positive_tests")).copied();
            if let (Some(positive), Some(tests)) = (positive, flu_tests) {
                let pct = if tests != 0.0 {
                    positive / tests * 100.0
                } else {
                    0.0
                };
                signals.insert(format!("{subtype}_pct_positive"), pct);
            }
        }
    }

    (detections, positives)
}

/// Derives `hpiv_positive_tests` by summing the subtype columns (hpiv1-4,
/// hpivother), which then drop out of the schema.
fn sum_hpiv_subtypes(set: &mut RecordSet) {
    let mut totals: Vec<(RecordKey, f64)> = Vec::new();
    for (key, signals) in set.rows() {
        let values: Vec<f64> = signals
            .iter()
            .filter(|(c, _)| c.as_str() != "hpiv_positive_tests")
            .filter(|(c, _)| HPIV_SUBTYPE_RE.is_match(c))
            .map(|(_, v)| *v)
            .collect();
        if !values.is_empty() {
            totals.push((key.clone(), values.iter().sum()));
        }
    }
    if totals.is_empty() {
        return;
    }
    set.drop_columns(|c| c != "hpiv_positive_tests" && HPIV_SUBTYPE_RE.is_match(c));
    for (key, total) in totals {
        // The derived total supersedes any reported hpiv column.
        set.set_value(&key, "hpiv_positive_tests", total);
    }
}
