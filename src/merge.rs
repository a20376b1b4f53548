// src/merge.rs
//
// Collapses the revision history of a season into one row per
// (time_value, geo_type, geo_value). The latest issue of each observation
// wins; cells it leaves missing backfill from progressively older issues.
// Only geographies in the fixed vocabulary survive, and their class is
// recomputed from the vocabulary rather than trusted from the input.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::records::{RecordSet, Signals};
use crate::vocab::{GeoClass, Vocabulary};

/// Final-table index, without epiweek and issue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MergedKey {
    pub time_value: NaiveDate,
    pub geo_type: GeoClass,
    pub geo_value: String,
}

/// The merged season table: one row per key, sorted by the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedTable {
    rows: BTreeMap<MergedKey, Signals>,
}

/// The signal columns of the narrow output schema, in column order.
pub const TARGET_COLUMNS: &[&str] = &[
    "flu_pct_positive",
    "rsv_pct_positive",
    "sarscov2_pct_positive",
];

impl MergedTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&MergedKey, &Signals)> {
        self.rows.iter()
    }

    pub fn get(&self, key: &MergedKey) -> Option<&Signals> {
        self.rows.get(key)
    }

    /// Union of signal column names, sorted.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .rows
            .values()
            .flat_map(|signals| signals.keys().cloned())
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }
}

/// Merges the detections and percent-positive revision histories into the
/// final season table.
pub fn merge_revisions(
    detections: &RecordSet,
    positives: &RecordSet,
    vocab: &Vocabulary,
) -> MergedTable {
    let stacked = detections.stacked(positives);

    // Group the per-issue rows of each observation, newest issue first.
    let mut groups: BTreeMap<MergedKey, Vec<(NaiveDate, &Signals)>> = BTreeMap::new();
    for (key, signals) in stacked.rows() {
        let Some(geo_type) = vocab.fixed_geo_class(&key.geo_value) else {
            tracing::debug!("Dropping unrecognized geography '{}'", key.geo_value);
            continue;
        };
        groups
            .entry(MergedKey {
                time_value: key.time_value,
                geo_type,
                geo_value: key.geo_value.clone(),
            })
            .or_default()
            .push((key.issue, signals));
    }

    let mut merged = MergedTable::default();
    for (key, mut issues) in groups {
        issues.sort_by(|a, b| b.0.cmp(&a.0));
        let mut row = Signals::new();
        for (_, signals) in issues {
            for (col, val) in signals {
                row.entry(col.clone()).or_insert(*val);
            }
        }
        merged.rows.insert(key, row);
    }
    merged
}

/// Rounds to three decimal places, the precision of the narrow output.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Projects the merged table onto the narrow dashboard schema: the three
/// headline percent-positive signals, rounded. Rows missing a signal keep
/// the cell empty rather than zero.
pub fn project_target(merged: &MergedTable) -> Vec<(MergedKey, Vec<Option<f64>>)> {
    merged
        .rows()
        .map(|(key, signals)| {
            let values = TARGET_COLUMNS
                .iter()
                .map(|col| signals.get(*col).copied().map(round3))
                .collect();
            (key.clone(), values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordKey;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record_key(geo: &str, issue: NaiveDate) -> RecordKey {
        RecordKey {
            epiweek: 202344,
            time_value: date(2023, 11, 4),
            issue,
            geo_type: GeoClass::Region,
            geo_value: geo.to_string(),
        }
    }

    #[test]
    fn newer_issue_wins_and_older_backfills() {
        let vocab = Vocabulary::new();
        let mut positives = RecordSet::new();

        // Older issue has both signals; newer revises pct but omits tests.
        let older = record_key("on", date(2023, 11, 9));
        positives.insert_value(&older, "rsv_pct_positive", 5.0);
        positives.insert_value(&older, "rsv_tests", 1000.0);
        let newer = record_key("on", date(2023, 11, 16));
        positives.insert_value(&newer, "rsv_pct_positive", 5.5);

        let merged = merge_revisions(&RecordSet::new(), &positives, &vocab);
        assert_eq!(merged.len(), 1);
        // The fixed vocabulary reclasses "on" from region to province.
        let row = merged
            .get(&MergedKey {
                time_value: date(2023, 11, 4),
                geo_type: GeoClass::Province,
                geo_value: "on".to_string(),
            })
            .unwrap();
        assert_eq!(row["rsv_pct_positive"], 5.5);
        assert_eq!(row["rsv_tests"], 1000.0);
    }

    #[test]
    fn geo_class_is_recomputed() {
        let vocab = Vocabulary::new();
        let mut detections = RecordSet::new();
        // Lab tables class everything as lab; the merge reclasses "ca".
        let mut key = record_key("ca", date(2023, 11, 9));
        key.geo_type = GeoClass::Lab;
        detections.insert_value(&key, "rsv_positive_tests", 12.0);

        let merged = merge_revisions(&detections, &RecordSet::new(), &vocab);
        let (merged_key, _) = merged.rows().next().unwrap();
        assert_eq!(merged_key.geo_type, GeoClass::Nation);
    }

    #[test]
    fn unrecognized_geographies_drop_out() {
        let vocab = Vocabulary::new();
        let mut detections = RecordSet::new();
        detections.insert_value(
            &record_key("chu ste-justine", date(2023, 11, 9)),
            "rsv_positive_tests",
            3.0,
        );
        detections.insert_value(&record_key("on", date(2023, 11, 9)), "rsv_tests", 40.0);

        let merged = merge_revisions(&detections, &RecordSet::new(), &vocab);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn projection_rounds_and_keeps_gaps() {
        let vocab = Vocabulary::new();
        let mut positives = RecordSet::new();
        let key = record_key("qc", date(2023, 11, 9));
        positives.insert_value(&key, "flu_pct_positive", 10.0 / 3.0);
        positives.insert_value(&key, "rsv_pct_positive", 5.0);

        let merged = merge_revisions(&RecordSet::new(), &positives, &vocab);
        let projected = project_target(&merged);
        assert_eq!(projected.len(), 1);
        let (_, values) = &projected[0];
        assert_eq!(values[0], Some(3.333));
        assert_eq!(values[1], Some(5.0));
        assert_eq!(values[2], None);
    }
}
