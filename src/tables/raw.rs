// src/tables/raw.rs
//
// Parses a report table's HTML markup into headers plus cell text. This is
// the only place DOM structure is interpreted; everything downstream works
// on plain headers and cells.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use crate::utils::error::ParseError;

static TABLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table").expect("Failed to compile TABLE_SELECTOR"));
static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("Failed to compile ROW_SELECTOR"));
static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("th, td").expect("Failed to compile CELL_SELECTOR"));

/// Cell values treated as missing data in the source tables.
const NA_VALUES: &[&str] = &[
    "N.A.",
    "N.A",
    "N.C.",
    "N.R.",
    "Not Available",
    "Not Tested",
    "N.D.",
    "-",
];

/// A parsed table: lowercased headers (possibly duplicated, order preserved)
/// and body rows of optional cell text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    /// Parses the first `<table>` in `markup`.
    ///
    /// `strip_commas` reflects the source's comma convention: "number of
    /// detections" tables use commas as thousands separators (deleted),
    /// every other table uses them as decimal points (turned into periods).
    pub fn parse(markup: &str, strip_commas: bool) -> Result<RawTable, ParseError> {
        let fragment = Html::parse_fragment(markup);
        let table = fragment
            .select(&TABLE_SELECTOR)
            .next()
            .ok_or_else(|| ParseError::MalformedTable("no <table> element".to_string()))?;

        let mut header_rows: Vec<Vec<String>> = Vec::new();
        let mut body_rows: Vec<Vec<Option<String>>> = Vec::new();

        for row in table.select(&ROW_SELECTOR) {
            // Footers carry source notes, not data.
            if has_ancestor(row, "tfoot") {
                continue;
            }
            let cells: Vec<ElementRef> = row.select(&CELL_SELECTOR).collect();
            if cells.is_empty() {
                continue;
            }

            let is_header = has_ancestor(row, "thead")
                || (body_rows.is_empty()
                    && cells.iter().all(|c| c.value().name() == "th"));

            if is_header && body_rows.is_empty() {
                let mut header: Vec<String> = Vec::new();
                for cell in &cells {
                    let text = cell_text(cell);
                    // Expand colspans so header rows line up column-wise.
                    let span = cell
                        .value()
                        .attr("colspan")
                        .and_then(|s| s.trim().parse::<usize>().ok())
                        .unwrap_or(1)
                        .max(1);
                    for _ in 0..span {
                        header.push(text.clone());
                    }
                }
                header_rows.push(header);
            } else {
                let mut values: Vec<Option<String>> = Vec::new();
                for cell in &cells {
                    let mut text = cell_text(cell);
                    if strip_commas {
                        text = text.replace(',', "");
                    } else {
                        text = text.replace(',', ".");
                    }
                    let value = if text.is_empty() || NA_VALUES.contains(&text.as_str()) {
                        None
                    } else {
                        Some(text)
                    };
                    values.push(value);
                }
                // Removing footers can leave rows with no data at all.
                if values.iter().any(|v| v.is_some()) {
                    body_rows.push(values);
                }
            }
        }

        if header_rows.is_empty() {
            // Some legacy tables mark nothing as a header; the first body
            // row is the header line in that case.
            if body_rows.is_empty() {
                return Err(ParseError::MalformedTable(
                    "table has no header row".to_string(),
                ));
            }
            let first = body_rows.remove(0);
            header_rows.push(
                first
                    .into_iter()
                    .map(|v| v.unwrap_or_default())
                    .collect(),
            );
        }

        Ok(RawTable {
            columns: combine_header_rows(&header_rows),
            rows: body_rows,
        })
    }

    /// Index of the first column whose name contains `needle`.
    pub fn find_column(&self, needle: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.contains(needle))
    }

    /// Index of the column exactly named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col)?.as_deref()
    }

    pub fn numeric(&self, row: usize, col: usize) -> Option<f64> {
        self.value(row, col)?.trim().parse::<f64>().ok()
    }
}

fn has_ancestor(el: ElementRef, name: &str) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == name)
}

fn cell_text(el: &ElementRef) -> String {
    let text = el.text().collect::<String>();
    // Non-breaking spaces show up in older report headers.
    let text = text.replace('\u{a0}', " ");
    let mut collapsed = String::with_capacity(text.len());
    let mut last_space = false;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            if !last_space {
                collapsed.push(' ');
            }
            last_space = true;
        } else {
            collapsed.push(ch);
            last_space = false;
        }
    }
    collapsed
}

/// Combines multi-line headers into a single line, joining distinct parts
/// with a space (mirroring how a two-level header reads).
fn combine_header_rows(header_rows: &[Vec<String>]) -> Vec<String> {
    let width = header_rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut combined = Vec::with_capacity(width);
    for i in 0..width {
        let mut parts: Vec<&str> = Vec::new();
        for row in header_rows {
            if let Some(part) = row.get(i) {
                if !part.is_empty() && parts.last() != Some(&part.as_str()) {
                    parts.push(part);
                }
            }
        }
        combined.push(parts.join(" ").to_lowercase());
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_table() {
        let html = r#"<table>
            <thead><tr><th>Week</th><th>Week End</th><th>RSV Test</th></tr></thead>
            <tbody>
                <tr><td>35</td><td>2023-09-02</td><td>1,234</td></tr>
                <tr><td>36</td><td>2023-09-09</td><td>N.A.</td></tr>
            </tbody>
            <tfoot><tr><td colspan="3">Source: weekly reports</td></tr></tfoot>
        </table>"#;

        let table = RawTable::parse(html, true).unwrap();
        assert_eq!(table.columns, vec!["week", "week end", "rsv test"]);
        assert_eq!(table.value(0, 2), Some("1234"));
        assert_eq!(table.rows[1][2], None);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn commas_become_periods_outside_number_tables() {
        let html = r#"<table><tr><th>qc</th></tr><tr><td>12,5</td></tr></table>"#;
        let table = RawTable::parse(html, false).unwrap();
        assert_eq!(table.value(0, 0), Some("12.5"));
        assert_eq!(table.numeric(0, 0), Some(12.5));
    }

    #[test]
    fn combines_multiline_headers() {
        let html = r#"<table>
            <thead>
                <tr><th>Week</th><th colspan="2">RSV</th></tr>
                <tr><th>Week</th><th>Tests</th><th>Pos</th></tr>
            </thead>
            <tr><td>35</td><td>10</td><td>2</td></tr>
        </table>"#;
        let table = RawTable::parse(html, true).unwrap();
        assert_eq!(table.columns, vec!["week", "rsv tests", "rsv pos"]);
    }

    #[test]
    fn headerless_table_is_an_error() {
        let err = RawTable::parse("<div>no table</div>", true).unwrap_err();
        assert!(matches!(err, ParseError::MalformedTable(_)));
    }
}
