//! Survey Scanner core: sends scanned survey sheets to a
//! vision-capable language model and reconciles the loosely-structured
//! reply against the caller's column schema.
//!
//! The crate provides:
//! - tiered row normalization with header-echo rejection
//! - sequential multi-page batch aggregation with partial-failure
//!   tolerance
//! - a content-addressed result cache and a bounded history log
//!   (in-memory or SQLite-backed)
//! - spreadsheet export and English-to-Devanagari script conversion

pub mod batch;
pub mod db;
pub mod error;
pub mod excel;
pub mod normalize;
pub mod provider;
pub mod scanner;
pub mod store;
pub mod text;
pub mod transliterate;
pub mod types;

pub use batch::{run_batch, NARRATIVE_SEPARATOR};
pub use db::Db;
pub use error::{Result, ScanError};
pub use normalize::{normalize_rows, HeaderAliases};
pub use provider::{ExtractionProvider, VisionClient};
pub use scanner::{Scanner, DAILY_LIMIT};
pub use store::{content_key, HistoryStore, MemoryStore, ResultCache, UsageStore, HISTORY_LIMIT};
pub use text::parse_delimited;
pub use transliterate::{
    contains_devanagari, convert_rows, text_columns, ScriptConversion, Transliterator,
};
pub use types::{
    BatchOutcome, HistoryEntry, PageImage, RowCell, ScanResult, TableRow,
};
