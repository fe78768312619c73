//! Drives extraction across multiple pages and folds the results into
//! one. Pages run strictly one at a time: the provider rate-limits
//! aggressively, so the serialization is deliberate, not incidental.

use tracing::warn;

use crate::error::{Result, ScanError};
use crate::types::{BatchOutcome, PageImage, ScanResult};

/// Joins per-page narrative text in the combined result.
pub const NARRATIVE_SEPARATOR: &str = "\n\n---\n\n";

/// Run `extract` over every page in input order, one call in flight at
/// a time. A failing page is logged and skipped - the batch never
/// aborts on a single bad page. `on_progress` fires once per page with
/// `(index + 1, total)` before that page's attempt.
pub fn run_batch<E, F>(
    pages: &[PageImage],
    mut extract: E,
    mut on_progress: F,
) -> Result<BatchOutcome>
where
    E: FnMut(&PageImage) -> Result<ScanResult>,
    F: FnMut(usize, usize),
{
    if pages.is_empty() {
        return Err(ScanError::InvalidInput("No pages to scan.".to_string()));
    }

    let total = pages.len();
    let mut rows = Vec::new();
    let mut narratives: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut document_type = String::new();
    let mut processed = 0usize;
    let mut failed = 0usize;

    for (index, page) in pages.iter().enumerate() {
        on_progress(index + 1, total);
        match extract(page) {
            Ok(result) => {
                processed += 1;
                rows.extend(result.rows);
                if !result.narrative.trim().is_empty() {
                    narratives.push(result.narrative);
                }
                if !result.document_type.trim().is_empty() {
                    document_type = result.document_type;
                }
                warnings.extend(result.warnings);
            }
            Err(e) => {
                failed += 1;
                warn!(page = %page.name, error = %e, "page skipped");
            }
        }
    }

    warnings.push(format!("Processed {} of {} page(s)", processed, total));

    Ok(BatchOutcome {
        result: ScanResult {
            document_type,
            narrative: narratives.join(NARRATIVE_SEPARATOR),
            rows,
            warnings,
        },
        pages_processed: processed,
        pages_failed: failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TableRow;
    use pretty_assertions::assert_eq;

    fn page(name: &str) -> PageImage {
        PageImage {
            name: name.to_string(),
            bytes: name.as_bytes().to_vec(),
            mime: "image/png".to_string(),
        }
    }

    fn result_for(name: &str) -> ScanResult {
        let headers = vec!["Name".to_string()];
        let mut row = TableRow::blank(&headers);
        row.set("Name", name);
        ScanResult {
            document_type: format!("form-{}", name),
            narrative: format!("narrative {}", name),
            rows: vec![row],
            warnings: vec![],
        }
    }

    #[test]
    fn a_failing_page_does_not_abort_the_batch() {
        let pages = vec![page("a"), page("b"), page("c")];
        let mut progress = Vec::new();
        let outcome = run_batch(
            &pages,
            |p| {
                if p.name == "b" {
                    Err(ScanError::Provider("boom".to_string()))
                } else {
                    Ok(result_for(&p.name))
                }
            },
            |current, total| progress.push((current, total)),
        )
        .unwrap();

        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(outcome.pages_processed, 2);
        assert_eq!(outcome.pages_failed, 1);
        assert_eq!(outcome.result.rows.len(), 2);
        assert_eq!(outcome.result.rows[0].get("Name"), Some("a"));
        assert_eq!(outcome.result.rows[1].get("Name"), Some("c"));
        assert_eq!(
            outcome.result.narrative,
            format!("narrative a{}narrative c", NARRATIVE_SEPARATOR)
        );
        assert_eq!(
            outcome.result.warnings,
            vec!["Processed 2 of 3 page(s)".to_string()]
        );
    }

    #[test]
    fn latest_non_empty_document_type_wins() {
        let pages = vec![page("a"), page("b")];
        let outcome = run_batch(
            &pages,
            |p| {
                let mut r = result_for(&p.name);
                if p.name == "b" {
                    r.document_type = String::new();
                }
                Ok(r)
            },
            |_, _| {},
        )
        .unwrap();
        assert_eq!(outcome.result.document_type, "form-a");
    }

    #[test]
    fn zero_pages_is_rejected_before_any_call() {
        let mut calls = 0;
        let err = run_batch(
            &[],
            |_| {
                calls += 1;
                Ok(result_for("x"))
            },
            |_, _| {},
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::InvalidInput(_)));
        assert_eq!(calls, 0);
    }

    #[test]
    fn per_page_warnings_accumulate() {
        let pages = vec![page("a")];
        let outcome = run_batch(
            &pages,
            |p| {
                let mut r = result_for(&p.name);
                r.warnings.push("smudged cell".to_string());
                Ok(r)
            },
            |_, _| {},
        )
        .unwrap();
        assert_eq!(
            outcome.result.warnings,
            vec![
                "smudged cell".to_string(),
                "Processed 1 of 1 page(s)".to_string()
            ]
        );
    }
}
