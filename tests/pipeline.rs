// tests/pipeline.rs
//
// End-to-end runs over synthetic weekly report pages: parse, classify,
// build, accumulate across weeks, merge revisions and project the narrow
// output. Mirrors a two-week slice of a season with one revised
// observation and one backfilled gap.

use chrono::NaiveDate;
use rvd_extractor::merge::{merge_revisions, project_target, MergedKey};
use rvd_extractor::phac::models::{CaptionedTable, WeekReport};
use rvd_extractor::records::RecordKey;
use rvd_extractor::season::SeasonAccumulator;
use rvd_extractor::storage::StorageManager;
use rvd_extractor::vocab::{GeoClass, Vocabulary};

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn table_html(headers: &[&str], rows: &[&[&str]]) -> String {
    let mut html = String::from("<table><thead><tr>");
    for header in headers {
        html.push_str(&format!("<th>{header}</th>"));
    }
    html.push_str("</tr></thead><tbody>");
    for row in rows {
        html.push_str("<tr>");
        for cell in *row {
            html.push_str(&format!("<td>{cell}</td>"));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table>");
    html
}

fn captioned(caption: &str, headers: &[&str], rows: &[&[&str]]) -> CaptionedTable {
    CaptionedTable {
        caption: caption.to_string(),
        markup: table_html(headers, rows),
    }
}

/// Week 45: lab detections, national counts, RSV and influenza
/// percent-positive tables, plus an abbreviations legend to be filtered.
fn week_45() -> WeekReport {
    WeekReport {
        week: 45,
        week_end: ymd(2023, 11, 11),
        issue: ymd(2023, 11, 16),
        tables: vec![
            captioned(
                "Abbreviations used in this report",
                &["Abbreviation", "Meaning"],
                &[&["RSV", "Respiratory syncytial virus"]],
            ),
            captioned(
                "Respiratory virus detections for the week ending November 11, 2023",
                &["Reporting Laboratory", "RSV Test", "RSV Pos"],
                &[&["Ontario", "1000", "55"], &["Canada", "4000", "220"]],
            ),
            captioned(
                "Number of positive respiratory detections",
                &["Week", "Week End", "RSV", "Adenovirus"],
                &[
                    &["44", "2023-11-04", "180", "20"],
                    &["45", "2023-11-11", "1,020", "25"],
                ],
            ),
            captioned(
                "Positive RSV Tests (%)",
                &["Week", "Week End", "Can Tests", "RSV%", "On Tests", "RSV%"],
                &[
                    &["44", "2023-11-04", "3800", "4.8", "950", "4.0"],
                    // Comma used as a decimal point, as on the real pages.
                    &["45", "2023-11-11", "4000", "5,5", "1000", "5.5"],
                ],
            ),
            captioned(
                "Positive Influenza Tests (%)",
                &["Week", "Week End", "Can Tests", "A%", "B%"],
                &[&["45", "2023-11-11", "4000", "2.0", "1.0"]],
            ),
        ],
    }
}

/// Week 46: the RSV table revises week 45 and drops one week-44 cell.
fn week_46() -> WeekReport {
    WeekReport {
        week: 46,
        week_end: ymd(2023, 11, 18),
        issue: ymd(2023, 11, 23),
        tables: vec![captioned(
            "Positive RSV Tests (%)",
            &["Week", "Week End", "Can Tests", "RSV%", "On Tests", "RSV%"],
            &[
                &["44", "2023-11-04", "3800", "4.8", "-", "4.2"],
                &["45", "2023-11-11", "4000", "5.6", "1000", "5.5"],
                &["46", "2023-11-18", "4200", "6.0", "1100", "6.1"],
            ],
        )],
    }
}

#[test]
fn two_week_season_merges_revisions() {
    let vocab = Vocabulary::new();
    let mut accumulator = SeasonAccumulator::new(2023);
    accumulator.ingest_week(&week_45(), &vocab).unwrap();
    accumulator.ingest_week(&week_46(), &vocab).unwrap();
    let (detections, counts, positives) = accumulator.finish();

    // National counts accumulate separately, with commas stripped.
    assert_eq!(counts.len(), 2);
    let count_key = RecordKey {
        epiweek: 202345,
        time_value: ymd(2023, 11, 11),
        issue: ymd(2023, 11, 16),
        geo_type: GeoClass::Nation,
        geo_value: "ca".to_string(),
    };
    assert_eq!(counts.get(&count_key).unwrap()["rsv_positive_tests"], 1020.0);

    let merged = merge_revisions(&detections, &positives, &vocab);

    // Week 44 for Ontario: the newer issue revised the percentage but lost
    // the test count, which backfills from the older issue.
    let on_w44 = merged
        .get(&MergedKey {
            time_value: ymd(2023, 11, 4),
            geo_type: GeoClass::Province,
            geo_value: "on".to_string(),
        })
        .unwrap();
    assert_eq!(on_w44["rsv_pct_positive"], 4.2);
    assert_eq!(on_w44["rsv_tests"], 950.0);
    assert_eq!(on_w44["rsv_positive_tests"], 38.0);

    // Week 45 nationally: the week-46 issue's revision wins.
    let ca_w45 = merged
        .get(&MergedKey {
            time_value: ymd(2023, 11, 11),
            geo_type: GeoClass::Nation,
            geo_value: "ca".to_string(),
        })
        .unwrap();
    assert_eq!(ca_w45["rsv_pct_positive"], 5.6);
    assert_eq!(ca_w45["rsv_tests"], 4000.0);

    // Influenza signals come from the subtype table: 2% A + 1% B of 4000
    // tests makes 120 positives, 3% overall.
    assert_eq!(ca_w45["flu_positive_tests"], 120.0);
    assert!((ca_w45["flu_pct_positive"] - 3.0).abs() < 1e-9);

    // Narrow projection: flu and rsv filled, no SARS-CoV-2 signal.
    let projected = project_target(&merged);
    let (_, values) = projected
        .iter()
        .find(|(key, _)| key.geo_value == "ca" && key.time_value == ymd(2023, 11, 11))
        .unwrap();
    assert_eq!(values[0], Some(3.0));
    assert_eq!(values[1], Some(5.6));
    assert_eq!(values[2], None);
}

#[test]
fn reingesting_a_week_changes_nothing() {
    let vocab = Vocabulary::new();
    let mut accumulator = SeasonAccumulator::new(2023);
    accumulator.ingest_week(&week_45(), &vocab).unwrap();
    let detections_before = accumulator.detections.len();
    let positives_before = accumulator.positives.len();

    accumulator.ingest_week(&week_45(), &vocab).unwrap();
    assert_eq!(accumulator.detections.len(), detections_before);
    assert_eq!(accumulator.positives.len(), positives_before);
}

#[test]
fn season_outputs_reach_the_archive() {
    let vocab = Vocabulary::new();
    let dir = tempfile::TempDir::new().unwrap();
    let storage = StorageManager::new(dir.path()).unwrap();

    let mut accumulator = SeasonAccumulator::new(2023);
    accumulator.ingest_week(&week_45(), &vocab).unwrap();
    let (detections, _, positives) = accumulator.finish();
    let merged = merge_revisions(&detections, &positives, &vocab);

    let season_dir = storage
        .write_season_outputs(2023, 2024, false, &merged)
        .unwrap();
    assert!(storage.season_output_exists(2023, 2024, false));

    let target = std::fs::read_to_string(season_dir.join("data_report.csv")).unwrap();
    let mut lines = target.lines();
    assert_eq!(
        lines.next().unwrap(),
        "time_value,geo_type,geo_value,flu_pct_positive,rsv_pct_positive,sarscov2_pct_positive"
    );
    // One merged row per (time_value, geography) pair.
    assert_eq!(lines.count(), merged.len());

    let raw = std::fs::read_to_string(season_dir.join("raw.csv")).unwrap();
    assert!(raw.starts_with("time_value,geo_type,geo_value,"));
    assert!(raw.contains("rsv_pct_positive"));
}
