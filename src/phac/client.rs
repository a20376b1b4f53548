// src/phac/client.rs
use crate::epiweek::season_week_end;
use crate::phac::models::{CaptionedTable, SeasonReports, WeekReport};
use crate::tables::{classify, patches};
use crate::utils::error::FetchError;
use chrono::{Duration as DateDuration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::Duration;

// The report pages refuse requests without a browser User-Agent.
const REPORT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
const REQUEST_DELAY_MS: u64 = 250;

pub const DASHBOARD_BASE_URL: &str =
    "https://health-infobase.canada.ca/src/data/respiratory-virus-detections/";
const SEASON_BASE_URL: &str = "https://www.canada.ca";
// Weekly report links in the oldest seasons point at the legacy host.
const ALTERNATIVE_SEASON_BASE_URL: &str = "www.phac-aspc.gc.ca/bid-bmi/dsd-dsm/rvdi-divr/";

/// Season landing pages with weekly report archives.
const HISTORIC_SEASON_RANGES: &[&str] = &[
    "2013-2014",
    "2014-2015",
    "2015-2016",
    "2016-2017",
    "2017-2018",
    "2018-2019",
    "2019-2020",
    "2020-2021",
    "2021-2022",
    "2022-2023",
    "2023-2024",
];

static SEASON_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(20\d{2})-(20\d{2})").expect("Failed to compile SEASON_RANGE_RE"));
static WEEK_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[Ww]eek (\d+)").expect("Failed to compile WEEK_NUMBER_RE"));

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a").expect("Failed to parse anchor selector"));
static CANONICAL_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"link[rel="canonical"]"#).expect("Failed to parse canonical selector")
});
static SUMMARY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("summary").expect("Failed to parse summary selector"));
static FIGCAPTION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("figcaption").expect("Failed to parse figcaption selector"));
static MODIFIED_META_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[title="W3CDTF"]"#).expect("Failed to parse modified-date selector")
});

/// URLs of the season landing pages, oldest first.
pub fn historic_season_urls() -> Vec<String> {
    HISTORIC_SEASON_RANGES
        .iter()
        .map(|range| {
            format!(
                "{SEASON_BASE_URL}/en/public-health/services/surveillance/respiratory-virus-detections-canada/{range}.html"
            )
        })
        .collect()
}

fn build_report_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(REPORT_USER_AGENT)
        .build()
}

/// Downloads one page as text, with basic rate limiting.
pub async fn fetch_text(url: &str) -> Result<String, FetchError> {
    let client = build_report_client()?;

    tracing::debug!("Fetching {}", url);
    tokio::time::sleep(Duration::from_millis(REQUEST_DELAY_MS)).await;

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        tracing::error!("HTTP error status: {} for URL: {}", status, url);
        return Err(FetchError::Http(status));
    }

    let body = response.text().await?;
    tracing::debug!("Fetched {} bytes from {}", body.len(), url);
    Ok(body)
}

/// Reads the season's year range from the page's canonical link.
pub fn season_years(page: &str) -> Result<(i32, i32), FetchError> {
    let doc = Html::parse_document(page);
    let canonical = doc
        .select(&CANONICAL_SELECTOR)
        .next()
        .and_then(|link| link.value().attr("href"))
        .unwrap_or_default();

    let caps = SEASON_RANGE_RE
        .captures(canonical)
        .ok_or_else(|| FetchError::SeasonNotFound(canonical.to_string()))?;
    let start: i32 = caps[1].parse().expect("two-digit-anchored year");
    let end: i32 = caps[2].parse().expect("two-digit-anchored year");
    Ok((start, end))
}

/// Collects the weekly report links of a season landing page, in page
/// order. Anchors are recognized either by "ending" in the link text or by
/// the legacy host path used in the oldest seasons.
pub fn weekly_report_links(page: &str, start_year: i32, end_year: i32) -> Vec<String> {
    let doc = Html::parse_document(page);
    let alternative_url = format!("{ALTERNATIVE_SEASON_BASE_URL}{start_year}-{end_year}");

    doc.select(&ANCHOR_SELECTOR)
        .filter(|link| {
            let html = link.html();
            html.contains("ending") || html.contains(&alternative_url)
        })
        .filter_map(|link| link.value().attr("href"))
        .map(normalize_report_url)
        .collect()
}

/// Relative links resolve against the current host; legacy plain-http links
/// upgrade to https.
fn normalize_report_url(href: &str) -> String {
    if let Some(rest) = href.strip_prefix("http://") {
        format!("https://{rest}")
    } else if href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{SEASON_BASE_URL}{href}")
    }
}

/// The report week numbers listed on a season landing page, in page order.
pub fn report_weeks(page: &str) -> Vec<u32> {
    let doc = Html::parse_document(page);
    doc.select(&ANCHOR_SELECTOR)
        .filter_map(|link| {
            let text: String = link.text().collect();
            WEEK_NUMBER_RE
                .captures(&text)
                .and_then(|caps| caps[1].parse().ok())
        })
        .collect()
}

/// Pairs each informative caption on a weekly report page with the first
/// table following it in document order. Summary captions need less parsing
/// but are sometimes missing or uninformative ("Figure 1"); in that case
/// figure captions are considered as well.
pub fn extract_captioned_tables(page: &str) -> Vec<CaptionedTable> {
    let doc = Html::parse_document(page);

    let mut captions: Vec<ElementRef> = doc.select(&SUMMARY_SELECTOR).collect();
    let any_uninformative = captions
        .iter()
        .any(|cap| !classify::caption_is_informative(&element_text(cap)));
    if captions.is_empty() || any_uninformative {
        captions.extend(doc.select(&FIGCAPTION_SELECTOR));
    }

    // A summary and a figcaption can carry the same text; each table pairs
    // with the first caption preceding it only.
    let mut seen_tables = HashSet::new();
    captions
        .into_iter()
        .filter(|cap| cap.value().attr("class").is_none())
        .filter(|cap| classify::caption_is_relevant(&element_text(cap)))
        .filter_map(|cap| {
            let table = following_table(&doc, cap)?;
            if !seen_tables.insert(table.id()) {
                return None;
            }
            Some(CaptionedTable {
                caption: element_text(&cap),
                markup: table.html(),
            })
        })
        .collect()
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// First <table> after `caption` in document order.
fn following_table<'a>(doc: &'a Html, caption: ElementRef<'a>) -> Option<ElementRef<'a>> {
    let mut seen = false;
    for node in doc.tree.nodes() {
        if !seen {
            seen = node.id() == caption.id();
            continue;
        }
        if let Some(element) = ElementRef::wrap(node) {
            if element.value().name() == "table" {
                return Some(element);
            }
        }
    }
    None
}

/// Derives the issue date of a weekly report from its dcterms.modified meta
/// tag. Pages are commonly revised about five days after the reporting week
/// with full-week data; a modification long after that is presumed to be a
/// wording change, so the issue date falls back to week end plus five days.
pub fn modified_date(page: &str, week_end: NaiveDate) -> Result<NaiveDate, FetchError> {
    let doc = Html::parse_document(page);
    let mut modified = None;
    for tag in doc.select(&MODIFIED_META_SELECTOR) {
        let value = tag.value();
        let is_modified = value.attr("name") == Some("dcterms.modified")
            || value.attr("property") == Some("dcterms.modified");
        if is_modified {
            modified = value.attr("content");
        }
    }
    let modified = modified
        .ok_or_else(|| FetchError::Page("missing dcterms.modified meta tag".to_string()))?;
    let modified = NaiveDate::parse_from_str(modified, "%Y-%m-%d")
        .map_err(|e| FetchError::Page(format!("bad dcterms.modified date '{modified}': {e}")))?;

    let lag_days = (modified - week_end).num_days();
    if lag_days > 0 && lag_days < 14 {
        Ok(modified)
    } else {
        Ok(week_end + DateDuration::days(5))
    }
}

/// Downloads and dissects one weekly report page.
pub async fn fetch_week_report(
    url: &str,
    week: u32,
    week_end: NaiveDate,
) -> Result<WeekReport, FetchError> {
    let page = fetch_text(url).await?;
    let issue = modified_date(&page, week_end)?;
    let tables = extract_captioned_tables(&page);
    if tables.is_empty() {
        tracing::warn!("No tables of interest on {}", url);
    }
    Ok(WeekReport {
        week,
        week_end,
        issue,
        tables,
    })
}

/// Downloads a full season: the landing page, then every weekly report it
/// links to. Weeks known to be empty are not fetched.
pub async fn fetch_season(url: &str) -> Result<SeasonReports, FetchError> {
    let page = fetch_text(url).await?;
    let (start_year, end_year) = season_years(&page)?;
    tracing::info!("Fetching season {}-{}", start_year, end_year);

    let links = weekly_report_links(&page, start_year, end_year);
    let weeks = report_weeks(&page);
    if links.len() != weeks.len() {
        return Err(FetchError::Page(format!(
            "season {start_year}-{end_year}: {} report links but {} week numbers",
            links.len(),
            weeks.len()
        )));
    }

    let mut reports = Vec::with_capacity(links.len());
    for (link, week) in links.iter().zip(weeks) {
        if patches::is_skipped_week(start_year, week) {
            continue;
        }
        let week_end = season_week_end(week, start_year)
            .map_err(|e| FetchError::Page(format!("week {week}: {e}")))?;
        reports.push(fetch_week_report(link, week, week_end).await?);
    }

    Ok(SeasonReports {
        start_year,
        end_year,
        reports,
    })
}
