// src/phac/dashboard.rs
//
// Live-season feed. Once a season's reports move to the interactive
// dashboard, the data comes from its CSV endpoints instead of report pages:
// a revision feed of regional percent-positive figures and a
// current-week-only lab table. Both are reshaped into the same record
// layout the historical builders produce.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::epiweek::{season_week, EpiWeek};
use crate::phac::client;
use crate::records::{RecordKey, RecordSet};
use crate::tables::builders::{assert_pct_bounds, check_date_format};
use crate::utils::error::{AppError, FetchError, ParseError};
use crate::vocab::{GeoClass, Vocabulary};

const UPDATE_DATE_FILE: &str = "RVD_UpdateDate.csv";
const REVISED_DATA_FILE: &str = "RVD_WeeklyData.csv";
const SUMMARY_FILE: &str = "RVD_SummaryText.csv";
const CURRENT_WEEK_FILE: &str = "RVD_CurrentWeekTable.csv";

static CURRENT_WEEK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"week (\d+)").expect("Failed to compile CURRENT_WEEK_RE"));
static TEST_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"test\b").expect("Failed to compile TEST_SUFFIX_RE"));
static POS_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"pos\b").expect("Failed to compile POS_SUFFIX_RE"));

/// The dashboard's update timestamp, used as the issue date of both feeds.
pub async fn fetch_update_date(base_url: &str) -> Result<NaiveDate, FetchError> {
    let text = client::fetch_text(&format!("{base_url}{UPDATE_DATE_FILE}")).await?;
    parse_update_date(text.trim())
}

fn parse_update_date(text: &str) -> Result<NaiveDate, FetchError> {
    NaiveDateTime::parse_from_str(text, "%m/%d/%Y %H:%M:%S")
        .map(|dt| dt.date())
        .map_err(|e| FetchError::Page(format!("bad dashboard update date '{text}': {e}")))
}

/// Downloads and reshapes the full revision feed.
pub async fn fetch_revised_data(
    base_url: &str,
    vocab: &Vocabulary,
) -> Result<RecordSet, AppError> {
    let issue = fetch_update_date(base_url).await?;
    let text = client::fetch_text(&format!("{base_url}{REVISED_DATA_FILE}")).await?;
    Ok(parse_revised_data(&text, issue, vocab)?)
}

/// Reshapes the revision feed: one input row per (virus, week, province)
/// pivots into per-virus signal columns on a shared record index.
pub fn parse_revised_data(
    csv_text: &str,
    issue: NaiveDate,
    vocab: &Vocabulary,
) -> Result<RecordSet, ParseError> {
    let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
    let headers = lowercase_headers(&mut reader)?;
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ParseError::MissingColumn(name.to_string()))
    };
    let virus_idx = column("virus")?;
    let year_idx = column("year")?;
    let week_idx = column("week")?;
    let date_idx = column("date")?;
    let province_idx = column("province")?;
    let detections_idx = column("detections")?;
    let tests_idx = column("tests")?;
    let pct_idx = column("percentpositive")?;

    let mut set = RecordSet::new();
    for record in reader.records() {
        let record = record.map_err(|e| ParseError::MalformedTable(e.to_string()))?;
        let field = |idx: usize| record.get(idx).unwrap_or_default().trim();

        let virus = vocab.normalize_virus(field(virus_idx));
        let year: i32 = field(year_idx)
            .parse()
            .map_err(|_| ParseError::MalformedTable(format!("bad year '{}'", field(year_idx))))?;
        let week: u32 = field(week_idx)
            .parse()
            .map_err(|_| ParseError::MalformedTable(format!("bad week '{}'", field(week_idx))))?;
        let geo_value = vocab.normalize_geo(field(province_idx));

        let key = RecordKey {
            epiweek: EpiWeek::new(year, week)?.encode(),
            time_value: check_date_format(field(date_idx))?,
            issue,
            geo_type: vocab.geo_class(&geo_value, GeoClass::Province),
            geo_value,
        };
        for (idx, suffix) in [
            (tests_idx, "tests"),
            (pct_idx, "pct_positive"),
            (detections_idx, "positive_tests"),
        ] {
            if let Ok(value) = field(idx).parse::<f64>() {
                set.insert_value(&key, &format!("{virus}_{suffix}"), value);
            }
        }
    }

    assert_pct_bounds(&set, "dashboard revision feed")?;
    Ok(set)
}

/// The week number the dashboard currently reports, from its summary text.
pub fn parse_current_week(summary_csv: &str) -> Result<u32, ParseError> {
    let mut reader = csv::Reader::from_reader(summary_csv.as_bytes());
    let headers = lowercase_headers(&mut reader)?;
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ParseError::MissingColumn(name.to_string()))
    };
    let section_idx = column("section")?;
    let type_idx = column("type")?;
    let text_idx = column("text")?;

    for record in reader.records() {
        let record = record.map_err(|e| ParseError::MalformedTable(e.to_string()))?;
        if record.get(section_idx) != Some("summary") || record.get(type_idx) != Some("title") {
            continue;
        }
        let text = record.get(text_idx).unwrap_or_default().to_lowercase();
        if let Some(caps) = CURRENT_WEEK_RE.captures(&text) {
            return caps[1]
                .parse()
                .map_err(|_| ParseError::MalformedTable(format!("bad week in '{text}'")));
        }
    }
    Err(ParseError::MalformedTable(
        "no current week in dashboard summary".to_string(),
    ))
}

/// Downloads and reshapes the current week's lab table.
pub async fn fetch_current_week_data(
    base_url: &str,
    start_year: i32,
    vocab: &Vocabulary,
) -> Result<RecordSet, AppError> {
    let issue = fetch_update_date(base_url).await?;
    let summary = client::fetch_text(&format!("{base_url}{SUMMARY_FILE}")).await?;
    let week = parse_current_week(&summary)?;
    let epiweek = season_week(week, start_year)?;

    let text = client::fetch_text(&format!("{base_url}{CURRENT_WEEK_FILE}")).await?;
    Ok(parse_weekly_table(&text, epiweek, issue, vocab)?)
}

/// Reshapes the current-week lab table into detection records keyed on the
/// given epi week.
pub fn parse_weekly_table(
    csv_text: &str,
    epiweek: EpiWeek,
    issue: NaiveDate,
    vocab: &Vocabulary,
) -> Result<RecordSet, ParseError> {
    let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::MalformedTable(e.to_string()))?
        .iter()
        .map(|h| weekly_header(h, vocab))
        .collect();
    let geo_idx = headers
        .iter()
        .position(|h| h == "geo_value")
        .ok_or_else(|| ParseError::MissingColumn("geo_value".to_string()))?;

    let mut set = RecordSet::new();
    for record in reader.records() {
        let record = record.map_err(|e| ParseError::MalformedTable(e.to_string()))?;
        let geo_value = vocab.normalize_geo(record.get(geo_idx).unwrap_or_default().trim());
        let key = RecordKey {
            epiweek: epiweek.encode(),
            time_value: epiweek.end_date(),
            issue,
            geo_type: vocab.geo_class(&geo_value, GeoClass::Lab),
            geo_value,
        };
        let mut signals = crate::records::Signals::new();
        for (idx, header) in headers.iter().enumerate() {
            if idx == geo_idx || matches!(header.as_str(), "weekorder" | "date" | "week") {
                continue;
            }
            if let Some(value) = record.get(idx).and_then(|v| v.trim().parse::<f64>().ok()) {
                signals.insert(header.clone(), value);
            }
        }
        set.insert_row(key, signals);
    }
    Ok(set)
}

/// Rewrites one current-week CSV header into the canonical signal
/// vocabulary. The feed prefixes every column with a grouping token, which
/// rotates to the end before the usual virus and signal respelling.
fn weekly_header(raw: &str, vocab: &Vocabulary) -> String {
    let mut parts: Vec<&str> = raw.split('_').collect();
    if parts.len() > 1 {
        parts.rotate_left(1);
    }
    // Virus names are abbreviated per token; the alias patterns match on
    // word boundaries and an underscore would mask them.
    let mut name = parts
        .iter()
        .map(|part| vocab.normalize_virus(part))
        .collect::<Vec<_>>()
        .join("_");
    name = TEST_SUFFIX_RE.replace_all(&name, "tests").into_owned();
    name = POS_SUFFIX_RE
        .replace_all(&name, "positive_tests")
        .into_owned();
    name = name.replace("flua_", "flu_a");
    name = name.replace("flub_", "flu_b");
    name = name.replace("bpositive", "b_positive");
    name = name.replace("apositive", "a_positive");
    name = name.replace("flu_ah1_", "flu_ah1pdm09_");
    name = name.replace(' ', "_");
    if name == "reportinglaboratory" {
        "geo_value".to_string()
    } else {
        name
    }
}

fn lowercase_headers(
    reader: &mut csv::Reader<&[u8]>,
) -> Result<Vec<String>, ParseError> {
    Ok(reader
        .headers()
        .map_err(|e| ParseError::MalformedTable(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_update_timestamp() {
        assert_eq!(
            parse_update_date("11/16/2023 09:30:00").unwrap(),
            ymd(2023, 11, 16)
        );
        assert!(parse_update_date("yesterday").is_err());
    }

    #[test]
    fn pivots_revision_feed_by_virus() {
        let vocab = Vocabulary::new();
        let csv_text = "\
virus,year,week,weekorder,date,province,detections,tests,percentpositive,region
Respiratory Syncytial Virus,2023,45,10,2023-11-11,Ontario,55,1000,5.5,Central
Influenza,2023,45,10,2023-11-11,Ontario,120,1000,12.0,Central
";
        let set = parse_revised_data(csv_text, ymd(2023, 11, 16), &vocab).unwrap();
        assert_eq!(set.len(), 1);
        let (key, signals) = set.rows().next().unwrap();
        assert_eq!(key.epiweek, 202345);
        assert_eq!(key.geo_value, "on");
        assert_eq!(key.geo_type, GeoClass::Region);
        assert_eq!(signals["rsv_positive_tests"], 55.0);
        assert_eq!(signals["rsv_pct_positive"], 5.5);
        assert_eq!(signals["flu_tests"], 1000.0);
    }

    #[test]
    fn revision_feed_enforces_pct_bounds() {
        let vocab = Vocabulary::new();
        let csv_text = "\
virus,year,week,weekorder,date,province,detections,tests,percentpositive,region
Respiratory Syncytial Virus,2023,45,10,2023-11-11,Ontario,55,1000,105.5,Central
";
        assert!(matches!(
            parse_revised_data(csv_text, ymd(2023, 11, 16), &vocab),
            Err(ParseError::PctOutOfBounds { .. })
        ));
    }

    #[test]
    fn reads_current_week_from_summary() {
        let csv_text = "\
Section,Type,Text
header,note,some text
summary,title,Respiratory virus report for week 45 ending November 11
";
        assert_eq!(parse_current_week(csv_text).unwrap(), 45);
    }

    #[test]
    fn rewrites_current_week_headers() {
        let vocab = Vocabulary::new();
        assert_eq!(weekly_header("ReportingLaboratory", &vocab), "geo_value");
        assert_eq!(weekly_header("RSV test", &vocab), "rsv_tests");
        assert_eq!(weekly_header("RSV pos", &vocab), "rsv_positive_tests");
        // Grouping prefix rotates to the end.
        assert_eq!(weekly_header("c_Adenovirus", &vocab), "adv_c");
    }

    #[test]
    fn builds_current_week_records() {
        let vocab = Vocabulary::new();
        let epiweek = EpiWeek::new(2024, 45).unwrap();
        let csv_text = "\
ReportingLaboratory,RSV test,RSV pos
Ontario,1000,55
Canada,4000,220
";
        let set =
            parse_weekly_table(csv_text, epiweek, ymd(2024, 11, 14), &vocab).unwrap();
        assert_eq!(set.len(), 2);
        let (key, signals) = set
            .rows()
            .find(|(k, _)| k.geo_value == "on")
            .unwrap();
        assert_eq!(key.epiweek, 202445);
        assert_eq!(key.time_value, epiweek.end_date());
        assert_eq!(signals["rsv_tests"], 1000.0);
        assert_eq!(signals["rsv_positive_tests"], 55.0);
        let (ca_key, _) = set
            .rows()
            .find(|(k, _)| k.geo_value == "ca")
            .unwrap();
        assert_eq!(ca_key.geo_type, GeoClass::Nation);
    }
}
