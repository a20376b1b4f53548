// src/tables/classify.rs
//
// Decides which semantic role a report table plays from its caption text
// and column shape, and which captions are worth pairing with a table at
// all.

/// Caption terms identifying the tables of interest. A caption containing
/// none of them is non-informative (e.g. just "Figure 1").
pub const CAPTION_IDENTIFIERS: &[&str] = &["respiratory", "number", "positive", "abbreviation"];

/// Historic comparisons and cumulative tables are excluded by caption text.
pub const CAPTION_SKIP_TERMS: &[&str] = &["period", "abbreviation", "cumulative", "compared"];

/// The three semantic table kinds the pipeline ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// One row per reporting laboratory for a single week; per-virus
    /// positive-test counts; no revision history.
    LabDetections,
    /// One row per week from the season start up to the current week;
    /// national per-virus positive-test counts; revised over time.
    NationalCounts,
    /// One row per week per region; total tests and percent positive for
    /// one virus (or the two influenza subtypes); revised over time.
    PercentPositive { flu: bool },
}

/// True when a caption names one of the tables of interest.
pub fn caption_is_informative(text: &str) -> bool {
    let lower = text.to_lowercase();
    CAPTION_IDENTIFIERS.iter().any(|term| lower.contains(term))
}

/// True when a caption should be paired with its table. Skips historic
/// comparison and cumulative tables, and anything non-informative.
pub fn caption_is_relevant(text: &str) -> bool {
    let lower = text.to_lowercase();
    if CAPTION_SKIP_TERMS.iter().any(|term| lower.contains(term)) {
        return false;
    }
    caption_is_informative(text)
}

/// Routes a (caption, column set) pair to its table kind, in priority
/// order: a "reporting laboratory" column wins over caption text; "number"
/// captions are national counts; "positive" captions are regional
/// percent-positive tables. Anything else is discarded.
pub fn classify(caption: &str, columns: &[String]) -> Option<TableKind> {
    let caption = caption.to_lowercase();
    if columns.iter().any(|c| c.contains("reporting laboratory")) {
        Some(TableKind::LabDetections)
    } else if caption.contains("number") {
        Some(TableKind::NationalCounts)
    } else if caption.contains("positive") {
        Some(TableKind::PercentPositive {
            flu: caption.contains(" influenza"),
        })
    } else {
        None
    }
}

/// Number-of-detections tables use commas as thousands separators; all
/// other tables use them as decimal points.
pub fn strips_commas(caption: &str) -> bool {
    caption.to_lowercase().contains("number")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lab_column_wins_over_caption() {
        let kind = classify(
            "Number of positive respiratory detections",
            &cols(&["reporting laboratory", "rsv test"]),
        );
        assert_eq!(kind, Some(TableKind::LabDetections));
    }

    #[test]
    fn number_captions_are_national_counts() {
        let kind = classify(
            "Number of positive respiratory detections",
            &cols(&["week", "rsv"]),
        );
        assert_eq!(kind, Some(TableKind::NationalCounts));
    }

    #[test]
    fn positive_captions_are_percent_positive() {
        assert_eq!(
            classify("Positive RSV Tests (%)", &cols(&["week", "can tests"])),
            Some(TableKind::PercentPositive { flu: false })
        );
        assert_eq!(
            classify("Positive Influenza Tests (%)", &cols(&["week", "can tests"])),
            Some(TableKind::PercentPositive { flu: true })
        );
    }

    #[test]
    fn unrecognized_tables_are_discarded() {
        assert_eq!(classify("Figure 1", &cols(&["week"])), None);
    }

    #[test]
    fn caption_filtering() {
        assert!(caption_is_relevant("Respiratory virus detections"));
        assert!(caption_is_relevant("Positive RSV Tests (%)"));
        // abbreviation legends and cumulative/comparison tables are skipped
        assert!(!caption_is_relevant("Abbreviations used in this report"));
        assert!(!caption_is_relevant(
            "Positive tests compared with previous seasons"
        ));
        assert!(!caption_is_relevant("Cumulative number of detections"));
        assert!(!caption_is_relevant("Figure 1"));
        assert!(!caption_is_informative("Figure 1"));
    }
}
