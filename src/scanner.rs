//! The extraction pipeline: input validation, content-addressed cache
//! lookup, provider call, history logging and usage tracking. Storage
//! is best-effort throughout - a scan must succeed identically whether
//! or not the stores are available.

use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, warn};

use crate::batch::run_batch;
use crate::error::{Result, ScanError};
use crate::normalize::HeaderAliases;
use crate::provider::ExtractionProvider;
use crate::store::{content_key, HistoryStore, ResultCache, UsageStore};
use crate::text::parse_delimited;
use crate::types::{BatchOutcome, HistoryEntry, PageImage, ScanResult};

/// Provider free-tier allowance per calendar day. Tracked and
/// reported; the pipeline never blocks on it.
pub const DAILY_LIMIT: u32 = 1500;

const PREVIEW_CHARS: usize = 80;

/// Time-based unique history id: epoch milliseconds, bumped past the
/// previous id when two extractions land in the same millisecond.
fn next_entry_id() -> String {
    static LAST: AtomicI64 = AtomicI64::new(0);
    let now = chrono::Utc::now().timestamp_millis();
    let id = LAST
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |prev| {
            Some(now.max(prev + 1))
        })
        .map(|prev| now.max(prev + 1))
        .unwrap_or(now);
    id.to_string()
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Short single-line preview for history list views.
fn preview_of(result: &ScanResult) -> String {
    let source = result
        .narrative
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(String::from)
        .or_else(|| {
            result.rows.iter().find_map(|row| {
                row.0
                    .iter()
                    .map(|c| c.value.trim())
                    .find(|v| !v.is_empty())
                    .map(String::from)
            })
        })
        .unwrap_or_default();
    if source.chars().count() > PREVIEW_CHARS {
        let cut: String = source.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    } else {
        source
    }
}

/// Drives extraction end to end. The provider and the backing store
/// are injected so tests run against in-memory fakes.
pub struct Scanner<P, S> {
    provider: P,
    store: S,
    aliases: HeaderAliases,
}

impl<P, S> Scanner<P, S>
where
    P: ExtractionProvider,
    S: ResultCache + HistoryStore + UsageStore,
{
    pub fn new(provider: P, store: S) -> Self {
        Scanner {
            provider,
            store,
            aliases: HeaderAliases::farmer_form().clone(),
        }
    }

    /// Replace the default alias table used by the pasted-text parser.
    pub fn with_aliases(mut self, aliases: HeaderAliases) -> Self {
        self.aliases = aliases;
        self
    }

    /// Backing store, for history listing/removal and cache clearing.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Extract one image. Byte-identical re-uploads are served from
    /// the cache without touching the provider.
    pub fn scan_image(&self, bytes: &[u8], mime: &str, headers: &[String]) -> Result<ScanResult> {
        if headers.is_empty() {
            return Err(ScanError::InvalidInput("No target headers given.".to_string()));
        }
        let result = self.cached_extract(bytes, mime, headers)?;
        self.record_history(&result);
        Ok(result)
    }

    /// Extract a multi-page upload sequentially, tolerating per-page
    /// failures, and log the combined result as one history entry.
    pub fn scan_pages<F>(
        &self,
        pages: &[PageImage],
        headers: &[String],
        on_progress: F,
    ) -> Result<BatchOutcome>
    where
        F: FnMut(usize, usize),
    {
        if headers.is_empty() {
            return Err(ScanError::InvalidInput("No target headers given.".to_string()));
        }
        let outcome = run_batch(
            pages,
            |page| self.cached_extract(&page.bytes, &page.mime, headers),
            on_progress,
        )?;
        self.record_history(&outcome.result);
        Ok(outcome)
    }

    /// Extract from pasted text: tabular data is parsed locally, only
    /// unstructured text goes to the provider.
    pub fn scan_text(&self, raw_text: &str, headers: &[String]) -> Result<ScanResult> {
        if raw_text.trim().is_empty() {
            return Err(ScanError::InvalidInput("No text to extract from.".to_string()));
        }
        if headers.is_empty() {
            return Err(ScanError::InvalidInput("No target headers given.".to_string()));
        }
        let result = match parse_delimited(raw_text, headers, &self.aliases) {
            Some(result) => result,
            None => self.provider.extract_text(raw_text, headers)?,
        };
        self.record_history(&result);
        Ok(result)
    }

    /// Provider calls made today, for the rate-limit display.
    pub fn usage_today(&self) -> u32 {
        match self.store.count_for(&today()) {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "usage read failed");
                0
            }
        }
    }

    pub fn remaining_today(&self) -> u32 {
        DAILY_LIMIT.saturating_sub(self.usage_today())
    }

    /// Cache-aware single-image extraction. Cache traffic is
    /// best-effort: a failing store degrades to a plain provider call.
    fn cached_extract(&self, bytes: &[u8], mime: &str, headers: &[String]) -> Result<ScanResult> {
        if bytes.is_empty() {
            return Err(ScanError::InvalidInput("No image data.".to_string()));
        }
        let key = content_key(bytes);
        match self.store.get(&key) {
            Ok(Some(hit)) => {
                debug!(%key, "cache hit, skipping provider call");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => debug!(%key, error = %e, "cache read failed"),
        }

        let result = self.provider.extract_image(bytes, mime, headers)?;

        if let Err(e) = self.store.put(&key, &result) {
            debug!(%key, error = %e, "cache write failed");
        }
        if let Err(e) = self.store.record(&today()) {
            warn!(error = %e, "usage counter write failed");
        }
        Ok(result)
    }

    fn record_history(&self, result: &ScanResult) {
        let entry = HistoryEntry {
            id: next_entry_id(),
            created_at: chrono::Utc::now().to_rfc3339(),
            document_type: result.document_type.clone(),
            row_count: result.rows.len(),
            result: result.clone(),
            preview: preview_of(result),
        };
        if let Err(e) = self.store.append(entry) {
            warn!(error = %e, "history write failed");
        }
    }
}
