//! Direct parsing of pasted TSV/CSV-like data. Large spreadsheets blow
//! past model token limits, so tabular text is parsed locally and only
//! unstructured text falls back to the provider.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::normalize::{normalize_rows, HeaderAliases};
use crate::types::ScanResult;

/// Above this row count a warning is attached to the result.
const LARGE_DATASET_ROWS: usize = 100;

fn serial_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+$").expect("serial number regex"))
}

/// Collapse punctuation and spelling drift so header comparison sees
/// "S.No.", "S No" and "क्रम संख्या" as the same column.
fn canonical_header(header: &str) -> String {
    let stripped: String = header
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | '_' | '(' | ')') && !c.is_whitespace())
        .collect();
    if stripped == "sno" || stripped.starts_with("क्रम") {
        "sno".to_string()
    } else {
        stripped
    }
}

fn headers_overlap(a: &str, b: &str) -> bool {
    let (a, b) = (a.to_lowercase(), b.to_lowercase());
    a == b || a.contains(&b) || b.contains(&a)
}

fn detect_delimiter(line: &str) -> Option<char> {
    if line.contains('\t') {
        Some('\t')
    } else if line.contains('|') {
        Some('|')
    } else if line.contains(',') {
        Some(',')
    } else {
        None
    }
}

fn split_cells(line: &str, delimiter: char) -> Vec<String> {
    line.split(delimiter).map(|c| c.trim().to_string()).collect()
}

fn line_matches_headers(cells: &[String], expected: &[String]) -> bool {
    cells.iter().any(|cell| {
        expected
            .iter()
            .any(|eh| headers_overlap(eh, cell) || canonical_header(eh) == canonical_header(cell))
    })
}

/// Parse tab/pipe/comma-separated text against the expected headers.
/// Returns `None` when the text does not look tabular, so the caller
/// can fall back to model extraction.
pub fn parse_delimited(
    raw_text: &str,
    headers: &[String],
    aliases: &HeaderAliases,
) -> Option<ScanResult> {
    let lines: Vec<&str> = raw_text
        .trim()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < 2 {
        return None;
    }

    let delimiter = detect_delimiter(lines[0])?;
    let first_cells = split_cells(lines[0], delimiter);
    if first_cells.len() < 3 {
        return None;
    }

    // A metadata line (title, block name, date) sometimes precedes the
    // header row; skip it when the second line is the better match.
    let mut data_start = 1;
    if !line_matches_headers(&first_cells, headers) && lines.len() > 2 {
        let second_cells = split_cells(lines[1], delimiter);
        if line_matches_headers(&second_cells, headers) {
            data_start = 2;
        }
    }

    // Map each detected column onto an expected header where one fits;
    // unmatched columns keep their detected name and are reconciled by
    // the normalizer below.
    let detected = split_cells(lines[data_start - 1], delimiter);
    let column_names: Vec<String> = detected
        .iter()
        .map(|dh| {
            headers
                .iter()
                .find(|eh| headers_overlap(eh, dh) || canonical_header(eh) == canonical_header(dh))
                .cloned()
                .unwrap_or_else(|| dh.clone())
        })
        .collect();

    let mut raw_rows: Vec<Value> = Vec::new();
    for line in &lines[data_start..] {
        let cells = split_cells(line, delimiter);
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        // Main rows carry a numeric serial; anything else is a
        // continuation sub-row (per-crop breakdowns) and is skipped.
        let is_main_row = cells
            .first()
            .map(|c| serial_number().is_match(c))
            .unwrap_or(false);
        if !is_main_row {
            continue;
        }
        let mut obj = serde_json::Map::new();
        let mut has_data = false;
        for (idx, name) in column_names.iter().enumerate() {
            let value = cells.get(idx).cloned().unwrap_or_default();
            if !value.is_empty() {
                has_data = true;
            }
            obj.insert(name.clone(), Value::String(value));
        }
        if has_data {
            raw_rows.push(Value::Object(obj));
        }
    }

    if raw_rows.is_empty() {
        return None;
    }

    let narrative = if data_start > 1 {
        lines[..data_start - 1].join("\n")
    } else {
        String::new()
    };
    let warnings = if raw_rows.len() > LARGE_DATASET_ROWS {
        vec![format!("Large dataset: {} rows extracted", raw_rows.len())]
    } else {
        vec![]
    };

    Some(ScanResult {
        document_type: "tabular_data".to_string(),
        narrative,
        rows: normalize_rows(&raw_rows, headers, aliases),
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn headers() -> Vec<String> {
        vec![
            "S.No.".to_string(),
            "Name".to_string(),
            "Village".to_string(),
        ]
    }

    #[test]
    fn parses_tab_separated_rows() {
        let text = "S.No.\tName\tVillage\n1\tSunita Rai\tPokhara\n2\tRamesh Karki\tLakeside";
        let result = parse_delimited(text, &headers(), &HeaderAliases::empty()).unwrap();
        assert_eq!(result.document_type, "tabular_data");
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].get("Name"), Some("Sunita Rai"));
        assert_eq!(result.rows[1].get("Village"), Some("Lakeside"));
        assert_eq!(result.narrative, "");
    }

    #[test]
    fn maps_detected_headers_onto_expected_ones() {
        let text = "s no|Farmer Name|Village Name\n1|Gita|Butwal";
        let result = parse_delimited(text, &headers(), &HeaderAliases::empty()).unwrap();
        assert_eq!(result.rows[0].get("Name"), Some("Gita"));
        assert_eq!(result.rows[0].get("Village"), Some("Butwal"));
        assert_eq!(result.rows[0].get("S.No."), Some("1"));
    }

    #[test]
    fn leading_metadata_line_becomes_narrative() {
        let text = "Block B survey,June 2023,Collector: R. Sharma\nS.No.,Name,Village\n1,Sunita,Pokhara";
        let result = parse_delimited(text, &headers(), &HeaderAliases::empty()).unwrap();
        assert_eq!(result.narrative, "Block B survey,June 2023,Collector: R. Sharma");
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn continuation_rows_are_skipped() {
        let text = "S.No.\tName\tVillage\n1\tSunita\tPokhara\n\tमूंग\t\n2\tGita\tButwal";
        let result = parse_delimited(text, &headers(), &HeaderAliases::empty()).unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[1].get("Name"), Some("Gita"));
    }

    #[test]
    fn non_tabular_text_returns_none() {
        assert!(parse_delimited(
            "Just a paragraph about the harvest season.",
            &headers(),
            &HeaderAliases::empty()
        )
        .is_none());
        // Two columns is not enough to call it a table.
        assert!(parse_delimited(
            "a,b\n1,2",
            &headers(),
            &HeaderAliases::empty()
        )
        .is_none());
    }
}
