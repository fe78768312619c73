//! Reconciles provider-returned rows against the caller's target
//! headers. Vision models follow the requested schema only loosely:
//! key names come back re-cased, translated, or renamed, and a known
//! failure mode is echoing a column label back as if it were data.
//! Resolution therefore degrades through progressively looser matches,
//! and every candidate value is checked against the header/alias
//! vocabulary before it is accepted.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::Value;

use crate::types::{RowCell, TableRow};

/// Known alternate spellings/synonyms/scripts per target header.
/// Loaded once, immutable for the session.
#[derive(Debug, Clone, Default)]
pub struct HeaderAliases {
    map: HashMap<String, Vec<String>>,
}

impl HeaderAliases {
    pub fn new<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<S>)>,
        S: Into<String>,
    {
        let map = pairs
            .into_iter()
            .map(|(h, a)| (h.into(), a.into_iter().map(Into::into).collect()))
            .collect();
        HeaderAliases { map }
    }

    pub fn empty() -> Self {
        HeaderAliases::default()
    }

    fn aliases_of(&self, header: &str) -> &[String] {
        self.map.get(header).map(Vec::as_slice).unwrap_or(&[])
    }

    fn all_aliases(&self) -> impl Iterator<Item = &str> {
        self.map.values().flatten().map(String::as_str)
    }

    /// Alias table for the Hindi NGO farmer registration forms this
    /// tool was built around. Covers the header variants seen across
    /// scanned sheets: Hindi/English spellings, abbreviations, and the
    /// punctuation drift of handwritten column labels.
    pub fn farmer_form() -> &'static HeaderAliases {
        static TABLE: OnceLock<HeaderAliases> = OnceLock::new();
        TABLE.get_or_init(|| {
            HeaderAliases::new([
                (
                    "S.No.",
                    vec![
                        "S.No", "S.NO", "S.NO.", "क्र.सं.", "क्रम", "क्रम संख्या", "Serial",
                        "Serial No", "Sl.No", "Sl. No.", "क्र.",
                    ],
                ),
                (
                    "भी.आर.पी नाम",
                    vec!["VRP Name", "BRP Name", "VRP नाम", "भी.आर.पी.", "VRP"],
                ),
                (
                    "Code",
                    vec!["CODE", "कोड", "CHF Code", "CHF", "Farmer Code", "किसान कोड"],
                ),
                (
                    "किसान नाम",
                    vec![
                        "Farmer Name",
                        "किसान का नाम",
                        "किसान दीदी का नाम",
                        "Name",
                        "नाम",
                        "Farmer's Name",
                        "किसान",
                    ],
                ),
                (
                    "पति/पिता का नाम",
                    vec![
                        "पति/पिता",
                        "Father Name",
                        "Father's Name",
                        "Husband Name",
                        "Husband's Name",
                        "Father/Husband Name",
                        "पिता का नाम",
                        "पिता/पति का नाम",
                        "पति का नाम",
                        "Parent Name",
                        "Guardian Name",
                        "S/O",
                        "D/O",
                        "W/O",
                        "पिता",
                        "पति",
                    ],
                ),
                (
                    "गाँव",
                    vec!["Village", "गांव", "ग्राम", "Village Name", "Address", "पता", "Gaon"],
                ),
                ("फसल", vec!["Crop", "Crop Name", "Fasal", "फसल का नाम"]),
                (
                    "क्षेत्रफल (कट्ठा)",
                    vec![
                        "क्षेत्रफल",
                        "Area",
                        "Area (Katha)",
                        "Area (कट्ठा)",
                        "Katha",
                        "कट्ठा",
                        "क्षेत्र",
                    ],
                ),
                (
                    "रोपाई/बुआई तिथि",
                    vec![
                        "Date",
                        "Sowing Date",
                        "Transplanting Date",
                        "रोपाई तिथि",
                        "बुआई तिथि",
                        "तिथि",
                        "तारीख",
                    ],
                ),
                (
                    "कुल तोड़ाई (Kg)",
                    vec![
                        "कुल तोड़ाई",
                        "Total Production",
                        "Production",
                        "उत्पादन",
                        "Kg",
                        "तोड़ाई",
                        "Harvest",
                    ],
                ),
                (
                    "कुल आमदनी (रु०)",
                    vec![
                        "कुल आमदनी",
                        "Total Income",
                        "Income",
                        "आमदनी",
                        "रु०",
                        "Rs",
                        "Amount",
                        "राशि",
                    ],
                ),
            ])
        })
    }
}

/// Cell text from an untrusted JSON value. Null, arrays and objects
/// count as absent; scalars are stringified.
fn as_cell_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// True when a candidate value equals one of the target headers or any
/// configured alias (case-insensitive, trimmed) - i.e. the model wrote
/// the column label where the data should be.
fn is_header_echo(value: &str, headers: &[String], aliases: &HeaderAliases) -> bool {
    let v = value.trim().to_lowercase();
    if v.is_empty() {
        return false;
    }
    if headers.iter().any(|h| h.to_lowercase() == v) {
        return true;
    }
    aliases.all_aliases().any(|a| a.to_lowercase() == v)
}

/// Resolve one cell for `header` out of a raw provider row.
///
/// Tiers, first surviving candidate wins:
/// 1. exact key
/// 2. case-insensitive key
/// 3. alias key (exact, then case-insensitive, per alias)
/// 4. substring overlap between key and header
/// A candidate rejected by the echo filter falls through to the next
/// tier; when every tier is exhausted the cell is empty.
fn resolve_cell(
    raw: &serde_json::Map<String, Value>,
    header: &str,
    headers: &[String],
    aliases: &HeaderAliases,
) -> String {
    let header_lower = header.to_lowercase();

    // 1. Exact key.
    if let Some(value) = raw.get(header).and_then(as_cell_text) {
        if !is_header_echo(&value, headers, aliases) {
            return value;
        }
    }

    // 2. First case-insensitive key.
    if let Some(value) = raw
        .iter()
        .find(|(k, _)| k.to_lowercase() == header_lower)
        .and_then(|(_, v)| as_cell_text(v))
    {
        if !is_header_echo(&value, headers, aliases) {
            return value;
        }
    }

    // 3. Aliases, exact then case-insensitive.
    for alias in aliases.aliases_of(header) {
        if let Some(value) = raw.get(alias).and_then(as_cell_text) {
            if !is_header_echo(&value, headers, aliases) {
                return value;
            }
        }
        let alias_lower = alias.to_lowercase();
        if let Some(value) = raw
            .iter()
            .find(|(k, _)| k.to_lowercase() == alias_lower)
            .and_then(|(_, v)| as_cell_text(v))
        {
            if !is_header_echo(&value, headers, aliases) {
                return value;
            }
        }
    }

    // 4. Substring overlap in either direction.
    for (key, value) in raw {
        let key_lower = key.to_lowercase();
        if key_lower.contains(&header_lower) || header_lower.contains(&key_lower) {
            if let Some(value) = as_cell_text(value) {
                if !is_header_echo(&value, headers, aliases) {
                    return value;
                }
            }
        }
    }

    String::new()
}

/// Normalize provider rows so every output row carries exactly
/// `headers`, in order. Rows that resolve to all-empty cells are kept;
/// dropping them is the caller's decision, not ours.
pub fn normalize_rows(
    raw_rows: &[Value],
    headers: &[String],
    aliases: &HeaderAliases,
) -> Vec<TableRow> {
    raw_rows
        .iter()
        .map(|raw| match raw.as_object() {
            Some(obj) => TableRow(
                headers
                    .iter()
                    .map(|h| RowCell {
                        column: h.clone(),
                        value: resolve_cell(obj, h, headers, aliases),
                    })
                    .collect(),
            ),
            None => TableRow::blank(headers),
        })
        .collect()
}
