// src/records.rs
//
// Long-format observation records. A record is identified by the full
// five-column index (epiweek, time_value, issue, geo_type, geo_value) and
// carries a variable set of numeric virus-signal columns. Missing cells are
// absent map entries.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::vocab::GeoClass;

/// The atomic index of one observation: week identity, observation date,
/// publication (issue) date, and geography.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub epiweek: u32,
    pub time_value: NaiveDate,
    pub issue: NaiveDate,
    pub geo_type: GeoClass,
    pub geo_value: String,
}

pub type Signals = BTreeMap<String, f64>;

/// A set of observation records keyed by their full index. Used both for
/// single-table builder outputs and for season-level accumulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    rows: BTreeMap<RecordKey, Signals>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Sets a signal value. If the column is already present for the record,
    /// the existing value wins: duplicate-named source columns merge by
    /// keeping the first non-missing value.
    pub fn insert_value(&mut self, key: &RecordKey, column: &str, value: f64) {
        self.rows
            .entry(key.clone())
            .or_default()
            .entry(column.to_string())
            .or_insert(value);
    }

    /// Sets a signal value unconditionally, replacing any existing one.
    /// Used for derived signals, which always supersede reported ones.
    pub fn set_value(&mut self, key: &RecordKey, column: &str, value: f64) {
        self.rows
            .entry(key.clone())
            .or_default()
            .insert(column.to_string(), value);
    }

    /// Ensures a record exists even if no signal columns were parseable.
    pub fn insert_row(&mut self, key: RecordKey, signals: Signals) {
        let row = self.rows.entry(key).or_default();
        for (col, val) in signals {
            row.entry(col).or_insert(val);
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = (&RecordKey, &Signals)> {
        self.rows.iter()
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = (&RecordKey, &mut Signals)> {
        self.rows.iter_mut()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&Signals> {
        self.rows.get(key)
    }

    /// Union of all signal column names across records.
    pub fn columns(&self) -> BTreeSet<String> {
        self.rows
            .values()
            .flat_map(|signals| signals.keys().cloned())
            .collect()
    }

    /// True if any of `other`'s index keys are already present here.
    pub fn overlaps(&self, other: &RecordSet) -> bool {
        other.rows.keys().any(|k| self.rows.contains_key(k))
    }

    /// Folds `other` in only when none of its index keys are already
    /// present, making repeated accumulation of the same week a no-op.
    /// Returns whether the fold happened.
    pub fn extend_if_new(&mut self, other: RecordSet) -> bool {
        if self.overlaps(&other) {
            return false;
        }
        self.rows.extend(other.rows);
        true
    }

    /// Column-wise union: merges `other`'s signal columns into matching (or
    /// new) records. Used to combine the per-virus percent-positive tables
    /// of a single week, which share the same index.
    pub fn merge_columns(&mut self, other: RecordSet) {
        for (key, signals) in other.rows {
            self.insert_row(key, signals);
        }
    }

    /// Row-wise union of two record sets (missing cells stay missing).
    pub fn stacked(&self, other: &RecordSet) -> RecordSet {
        let mut out = self.clone();
        for (key, signals) in other.rows() {
            out.insert_row(key.clone(), signals.clone());
        }
        out
    }

    /// Renames signal columns. When a rename collides with an existing
    /// column of the same record, the first non-missing value is kept.
    pub fn rename_columns<F>(&mut self, mut rename: F)
    where
        F: FnMut(&str) -> Option<String>,
    {
        for signals in self.rows.values_mut() {
            let old = std::mem::take(signals);
            for (col, val) in old {
                let name = rename(&col).unwrap_or(col);
                signals.entry(name).or_insert(val);
            }
        }
    }

    /// Drops every signal column for which the predicate holds.
    pub fn drop_columns<F>(&mut self, mut drop: F)
    where
        F: FnMut(&str) -> bool,
    {
        for signals in self.rows.values_mut() {
            signals.retain(|col, _| !drop(col));
        }
    }
}

impl FromIterator<(RecordKey, Signals)> for RecordSet {
    fn from_iter<T: IntoIterator<Item = (RecordKey, Signals)>>(iter: T) -> Self {
        let mut set = RecordSet::new();
        for (key, signals) in iter {
            set.insert_row(key, signals);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(day: u32, issue_day: u32, geo: &str) -> RecordKey {
        RecordKey {
            epiweek: 202340 + day,
            time_value: NaiveDate::from_ymd_opt(2023, 11, day).unwrap(),
            issue: NaiveDate::from_ymd_opt(2023, 11, issue_day).unwrap(),
            geo_type: GeoClass::Province,
            geo_value: geo.to_string(),
        }
    }

    #[test]
    fn accumulation_is_idempotent() {
        let mut season = RecordSet::new();
        let mut week = RecordSet::new();
        week.insert_value(&key(4, 9, "on"), "rsv_tests", 100.0);

        assert!(season.extend_if_new(week.clone()));
        assert_eq!(season.len(), 1);
        // Re-folding the same week must not duplicate or overwrite rows.
        assert!(!season.extend_if_new(week));
        assert_eq!(season.len(), 1);
    }

    #[test]
    fn duplicate_columns_keep_first_value() {
        let mut set = RecordSet::new();
        let k = key(4, 9, "on");
        set.insert_value(&k, "flu_tests", 50.0);
        set.insert_value(&k, "flu_tests", 999.0);
        assert_eq!(set.get(&k).unwrap()["flu_tests"], 50.0);
    }

    #[test]
    fn rename_collisions_backfill() {
        let mut set = RecordSet::new();
        let k = key(4, 9, "on");
        set.insert_value(&k, "flu_a_positive_tests", 7.0);
        set.insert_value(&k, "flua_positive_tests", 3.0);
        set.rename_columns(|c| {
            (c == "flu_a_positive_tests").then(|| "flua_positive_tests".to_string())
        });
        // BTreeMap order puts flu_a_* first; its value survives the collision.
        assert_eq!(set.get(&k).unwrap()["flua_positive_tests"], 7.0);
        assert_eq!(set.get(&k).unwrap().len(), 1);
    }

    #[test]
    fn merge_columns_unions_signals() {
        let mut a = RecordSet::new();
        let mut b = RecordSet::new();
        let k = key(4, 9, "qc");
        a.insert_value(&k, "rsv_pct_positive", 5.0);
        b.insert_value(&k, "adv_pct_positive", 2.0);
        a.merge_columns(b);
        assert_eq!(a.len(), 1);
        assert_eq!(a.get(&k).unwrap().len(), 2);
    }
}
