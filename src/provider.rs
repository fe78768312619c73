//! Extraction provider: sends an image (or pasted text) to a
//! vision-capable chat-completions endpoint and turns the reply into a
//! `ScanResult`. The provider's JSON is untrusted - key names, casing
//! and nesting vary between responses - so everything row-shaped is
//! funneled through the normalizer before it leaves this module.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{Result, ScanError};
use crate::normalize::{normalize_rows, HeaderAliases};
use crate::types::ScanResult;

const DEFAULT_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";

/// Text extraction truncates its input to stay inside token limits.
const MAX_TEXT_CHARS: usize = 15_000;

const SYSTEM_PROMPT: &str = r#"You are an OCR data extractor for handwritten Hindi NGO farmer registration documents.

CRITICAL: This is STRICT OCR - you must ONLY transcribe what is ACTUALLY VISIBLE in the document.

Document context:
- These are farmer data collection forms for an agricultural NGO
- "किसान दीदी का नाम" = Female Farmer's Name (most farmers are women)
- Documents contain farmer details in tabular format

Rules, no exceptions:
1. NEVER invent, guess, or make up names or data. Only transcribe what you can actually read.
2. Copy the EXACT Hindi text from each cell as written.
3. If a cell is empty, illegible, or unclear, use "" (empty string).
4. Column headers must NEVER appear as cell values. Extract the actual row data.
5. Keep original spelling even if it looks like an OCR error - do not "correct" names.
6. Names like "Ramesh Karki" keep the space between first and last name.

Output:
- extracted_text: header/title text from the document
- extracted_table: array of row objects with exact cell values
"#;

/// A source of extraction results. Implemented by the HTTP client
/// below and by in-memory fakes in tests.
pub trait ExtractionProvider {
    /// Extract structured rows and narrative text from one image.
    fn extract_image(&self, image: &[u8], mime: &str, headers: &[String]) -> Result<ScanResult>;

    /// Extract structured rows from unstructured pasted text.
    fn extract_text(&self, raw_text: &str, headers: &[String]) -> Result<ScanResult>;
}

/// Blocking client for an OpenAI-compatible vision endpoint (Groq).
pub struct VisionClient {
    client: reqwest::blocking::Client,
    api_key: String,
    url: String,
    model: String,
    aliases: HeaderAliases,
}

impl VisionClient {
    /// Read credentials from the environment (`GROQ_API_KEY`, optional
    /// `GROQ_API_URL` / `GROQ_MODEL`). A `.env` file next to the
    /// binary works too.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let api_key = std::env::var("GROQ_API_KEY")
            .map_err(|_| ScanError::InvalidInput("GROQ_API_KEY not set in .env".to_string()))?;
        let url = std::env::var("GROQ_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let model = std::env::var("GROQ_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(api_key, url, model)
    }

    pub fn new(api_key: String, url: String, model: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ScanError::Provider(e.to_string()))?;
        Ok(VisionClient {
            client,
            api_key,
            url,
            model,
            aliases: HeaderAliases::farmer_form().clone(),
        })
    }

    /// Replace the default alias table (e.g. for a non-farmer schema).
    pub fn with_aliases(mut self, aliases: HeaderAliases) -> Self {
        self.aliases = aliases;
        self
    }

    /// One-shot chat call with plain string messages and a JSON-object
    /// response format. Used by the transliteration path.
    pub(crate) fn chat_json(&self, system: &str, user: &str, temperature: f64) -> Result<String> {
        let body = json!({
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "model": self.model,
            "temperature": temperature,
            "stream": false,
            "response_format": { "type": "json_object" }
        });
        self.post_chat(body)
    }

    fn post_chat(&self, body: Value) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .map_err(|e| {
                ScanError::Provider(
                    if e.is_connect() || e.is_timeout() {
                        "Check your internet connection and try again."
                    } else {
                        "Network error."
                    }
                    .to_string(),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            // The error payload is usually {"error": {"message": ...}}.
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(|m| m.as_str())
                        .map(String::from)
                })
                .unwrap_or(body);
            return Err(ScanError::Provider(format!(
                "Extraction failed ({}): {}",
                status,
                if message.is_empty() {
                    "Invalid key or endpoint?"
                } else {
                    message.as_str()
                }
            )));
        }

        let reply: Value = response
            .json()
            .map_err(|e| ScanError::Provider(format!("Invalid JSON: {}", e)))?;
        reply
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(String::from)
            .ok_or_else(|| ScanError::Provider("No response content from provider".to_string()))
    }

    fn extraction_prompt(headers: &[String]) -> String {
        let header_list = serde_json::to_string(headers).unwrap_or_default();
        let row_shape = headers
            .iter()
            .map(|h| format!("\"{}\": \"actual_extracted_value_not_header\"", h))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            r#"{SYSTEM_PROMPT}

CRITICAL EXTRACTION RULES:
1. Extract the ACTUAL VALUES from the document, NOT the column headers themselves.
2. If a column in the document has a different heading than our target headers, map the DATA by semantic meaning.
3. NEVER put a column header as a cell value.
4. If a field's value is genuinely not present or illegible, use an empty string "".

Return ONLY valid JSON matching this structure:
{{
  "document_type_guess": "string describing the document type",
  "extracted_text": "any narrative/paragraph text from the document",
  "extracted_table": [
    {{ {row_shape} }}
  ],
  "warnings": ["optional array of warnings"]
}}

Map the extracted data EXACTLY to these target headers:
{header_list}

REMEMBER: Extract REAL DATA VALUES, not column headers!"#
        )
    }
}

impl ExtractionProvider for VisionClient {
    fn extract_image(&self, image: &[u8], mime: &str, headers: &[String]) -> Result<ScanResult> {
        let encoded = BASE64.encode(image);
        let body = json!({
            "messages": [
                {
                    "role": "system",
                    "content": "You are a helpful data extraction assistant. You output strict JSON matching the provided schema."
                },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": Self::extraction_prompt(headers) },
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:{};base64,{}", mime, encoded) }
                        }
                    ]
                }
            ],
            "model": self.model,
            "temperature": 0.1,
            "stream": false,
            "response_format": { "type": "json_object" }
        });
        let content = self.post_chat(body)?;
        parse_extraction_reply(&content, headers, &self.aliases)
    }

    fn extract_text(&self, raw_text: &str, headers: &[String]) -> Result<ScanResult> {
        let truncated = if raw_text.chars().count() > MAX_TEXT_CHARS {
            let cut: String = raw_text.chars().take(MAX_TEXT_CHARS).collect();
            format!("{}\n... [TRUNCATED]", cut)
        } else {
            raw_text.to_string()
        };
        let prompt = format!(
            "{}\n\nIMPORTANT: Extract ALL rows from the text.\n\n{}\n\n--- TEXT TO EXTRACT FROM ---\n{}",
            SYSTEM_PROMPT,
            Self::extraction_prompt(headers),
            truncated
        );
        let body = json!({
            "messages": [
                {
                    "role": "system",
                    "content": "You are a data extraction assistant. Extract ALL data rows. Output strict JSON."
                },
                { "role": "user", "content": prompt }
            ],
            "model": self.model,
            "temperature": 0.1,
            "max_tokens": 8000,
            "stream": false,
            "response_format": { "type": "json_object" }
        });
        let content = self.post_chat(body)?;
        parse_extraction_reply(&content, headers, &self.aliases)
    }
}

/// Strip Markdown code fences some models wrap their JSON in.
pub(crate) fn strip_code_fences(content: &str) -> String {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"```(?:json)?").expect("fence regex"));
    fence.replace_all(content, "").trim().to_string()
}

/// First string value among several spellings of the same field.
fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| raw.get(*k).and_then(|v| v.as_str()).map(String::from))
}

/// First array value among several spellings of the same field.
fn first_array<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|k| raw.get(*k).and_then(|v| v.as_array()))
}

/// Parse a provider reply into a `ScanResult`. Key names are not
/// guaranteed, so each top-level field falls back through the
/// spellings observed in the wild, and rows go through the normalizer.
pub(crate) fn parse_extraction_reply(
    content: &str,
    headers: &[String],
    aliases: &HeaderAliases,
) -> Result<ScanResult> {
    let cleaned = strip_code_fences(content);
    let raw: Value = serde_json::from_str(&cleaned)
        .map_err(|e| ScanError::Provider(format!("Invalid JSON: {}", e)))?;

    let document_type = first_string(&raw, &["document_type_guess", "documentType", "type"])
        .unwrap_or_else(|| "Unknown".to_string());
    let narrative =
        first_string(&raw, &["extracted_text", "extractedText", "text"]).unwrap_or_default();
    let empty = Vec::new();
    let table = first_array(
        &raw,
        &["extracted_table", "extractedTable", "table", "data", "rows"],
    )
    .unwrap_or(&empty);
    let warnings = raw
        .get("warnings")
        .and_then(|w| w.as_array())
        .map(|w| {
            w.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    Ok(ScanResult {
        document_type,
        narrative,
        rows: normalize_rows(table, headers, aliases),
        warnings,
    })
}
