//! Script conversion for table columns: Romanized names go out to the
//! model in one batched call and come back in Devanagari. The original
//! rows are returned alongside the converted ones so the caller can
//! revert without another call.

use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::error::{Result, ScanError};
use crate::provider::{strip_code_fences, VisionClient};
use crate::types::TableRow;

/// Converts a batch of texts to Devanagari. Implemented by the HTTP
/// client and by fakes in tests.
pub trait Transliterator {
    fn transliterate(&self, texts: &[String]) -> Result<HashMap<String, String>>;
}

/// Converted rows plus the untouched originals for revert.
#[derive(Debug, Clone)]
pub struct ScriptConversion {
    pub converted: Vec<TableRow>,
    pub original: Vec<TableRow>,
}

/// True when the string already carries Devanagari codepoints
/// (U+0900..U+097F) and needs no conversion.
pub fn contains_devanagari(s: &str) -> bool {
    s.chars().any(|c| ('\u{0900}'..='\u{097F}').contains(&c))
}

/// Headers worth converting: names, places and crops, in either script.
pub fn text_columns(headers: &[String]) -> Vec<String> {
    const KEYWORDS: &[&str] = &[
        "name", "नाम", "address", "पता", "गाँव", "village", "crop", "फसल", "father", "husband",
        "पति", "पिता",
    ];
    headers
        .iter()
        .filter(|h| {
            let lower = h.to_lowercase();
            KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .cloned()
        .collect()
}

/// Convert the selected columns of every row. Values already in
/// Devanagari, empty cells and unknown texts pass through unchanged.
pub fn convert_rows(
    rows: &[TableRow],
    columns: &[String],
    transliterator: &impl Transliterator,
) -> Result<ScriptConversion> {
    let original = rows.to_vec();

    // Unique values needing conversion, in first-seen order so the
    // prompt is deterministic.
    let mut texts: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for row in rows {
        for column in columns {
            if let Some(value) = row.get(column) {
                let value = value.trim();
                if !value.is_empty()
                    && !contains_devanagari(value)
                    && seen.insert(value.to_string())
                {
                    texts.push(value.to_string());
                }
            }
        }
    }

    if texts.is_empty() {
        return Ok(ScriptConversion {
            converted: original.clone(),
            original,
        });
    }

    let map = transliterator.transliterate(&texts)?;

    let converted = rows
        .iter()
        .map(|row| {
            let mut new_row = row.clone();
            for column in columns {
                if let Some(value) = row.get(column) {
                    if let Some(replacement) = map.get(value.trim()) {
                        new_row.set(column, replacement.clone());
                    }
                }
            }
            new_row
        })
        .collect();

    Ok(ScriptConversion {
        converted,
        original,
    })
}

const TRANSLITERATION_SYSTEM: &str = "You are a Hindi transliteration expert. You convert Romanized Indian/Nepali names to accurate, natural Devanagari script. Focus on phonetic accuracy - the Hindi text should sound exactly like the English when spoken. Output strict JSON only.";

fn transliteration_prompt(texts: &[String]) -> String {
    let input = serde_json::to_string(texts).unwrap_or_default();
    format!(
        r#"Convert each English/Romanized Indian name or word below into accurate, natural Hindi (Devanagari) script.

Rules:
1. Names must sound EXACTLY the same when spoken aloud in Hindi.
2. Mind vowel length: "Sunita" = सुनीता, not सुनित.
3. Common patterns: "Rai" = राय, "Sharma" = शर्मा, "Karki" = कार्की, "Adhikari" = अधिकारी, "Chaudhary" = चौधरी.
4. For places use the standard Hindi spelling: "Pokhara" = पोखरा, "Kathmandu" = काठमांडू.

Input list (JSON array):
{input}

Return ONLY a JSON object with this exact structure (no extra text):
{{
  "transliterations": {{
    "Sunita Rai": "सुनीता राय",
    ...
  }}
}}"#
    )
}

pub(crate) fn parse_transliteration_reply(content: &str) -> Result<HashMap<String, String>> {
    let cleaned = strip_code_fences(content);
    let raw: Value = serde_json::from_str(&cleaned)
        .map_err(|e| ScanError::Provider(format!("Invalid JSON: {}", e)))?;
    // Either {"transliterations": {...}} or the bare map.
    let map = raw.get("transliterations").unwrap_or(&raw);
    let obj = map
        .as_object()
        .ok_or_else(|| ScanError::Provider("No transliterations in reply".to_string()))?;
    Ok(obj
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect())
}

impl Transliterator for VisionClient {
    fn transliterate(&self, texts: &[String]) -> Result<HashMap<String, String>> {
        let content = self.chat_json(
            TRANSLITERATION_SYSTEM,
            &transliteration_prompt(texts),
            0.2,
        )?;
        parse_transliteration_reply(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct FakeTransliterator {
        calls: std::cell::RefCell<Vec<Vec<String>>>,
    }

    impl FakeTransliterator {
        fn new() -> Self {
            FakeTransliterator {
                calls: std::cell::RefCell::new(Vec::new()),
            }
        }
    }

    impl Transliterator for FakeTransliterator {
        fn transliterate(&self, texts: &[String]) -> Result<HashMap<String, String>> {
            self.calls.borrow_mut().push(texts.to_vec());
            Ok(texts
                .iter()
                .map(|t| (t.clone(), format!("हिं:{}", t)))
                .collect())
        }
    }

    fn headers() -> Vec<String> {
        vec![
            "S.No.".to_string(),
            "Name".to_string(),
            "Village".to_string(),
        ]
    }

    fn row(sno: &str, name: &str, village: &str) -> TableRow {
        let mut r = TableRow::blank(&headers());
        r.set("S.No.", sno);
        r.set("Name", name);
        r.set("Village", village);
        r
    }

    #[test]
    fn devanagari_detection() {
        assert!(contains_devanagari("सुनीता"));
        assert!(contains_devanagari("Sunita सुनीता"));
        assert!(!contains_devanagari("Sunita Rai"));
        assert!(!contains_devanagari(""));
    }

    #[test]
    fn text_columns_pick_names_and_places() {
        let headers = vec![
            "S.No.".to_string(),
            "किसान नाम".to_string(),
            "Village".to_string(),
            "कुल आमदनी (रु०)".to_string(),
        ];
        assert_eq!(
            text_columns(&headers),
            vec!["किसान नाम".to_string(), "Village".to_string()]
        );
    }

    #[test]
    fn converts_selected_columns_and_keeps_originals() {
        let rows = vec![row("1", "Sunita Rai", "Pokhara"), row("2", "सीता", "")];
        let columns = vec!["Name".to_string(), "Village".to_string()];
        let fake = FakeTransliterator::new();
        let outcome = convert_rows(&rows, &columns, &fake).unwrap();

        assert_eq!(outcome.converted[0].get("Name"), Some("हिं:Sunita Rai"));
        assert_eq!(outcome.converted[0].get("Village"), Some("हिं:Pokhara"));
        // Serial numbers are not a selected column.
        assert_eq!(outcome.converted[0].get("S.No."), Some("1"));
        // Already-Devanagari and empty values pass through.
        assert_eq!(outcome.converted[1].get("Name"), Some("सीता"));
        assert_eq!(outcome.converted[1].get("Village"), Some(""));
        // Originals untouched, so revert is lossless.
        assert_eq!(outcome.original, rows);

        let calls = fake.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec!["Sunita Rai".to_string(), "Pokhara".to_string()]
        );
    }

    #[test]
    fn no_call_when_nothing_needs_conversion() {
        let rows = vec![row("1", "सीता", "")];
        let columns = vec!["Name".to_string()];
        let fake = FakeTransliterator::new();
        let outcome = convert_rows(&rows, &columns, &fake).unwrap();
        assert_eq!(outcome.converted, rows);
        assert!(fake.calls.borrow().is_empty());
    }

    #[test]
    fn parses_a_fenced_transliteration_reply() {
        let content =
            "```json\n{\"transliterations\": {\"Sunita Rai\": \"सुनीता राय\"}}\n```";
        let map = parse_transliteration_reply(content).unwrap();
        assert_eq!(map.get("Sunita Rai").map(String::as_str), Some("सुनीता राय"));
    }

    #[test]
    fn accepts_a_bare_map_reply() {
        let map = parse_transliteration_reply("{\"Gita\": \"गीता\"}").unwrap();
        assert_eq!(map.get("Gita").map(String::as_str), Some("गीता"));
    }
}
