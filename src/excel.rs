//! Spreadsheet export: one sheet, the session headers as the first
//! row, one data row per table row.

use rust_xlsxwriter::{Format, Workbook, XlsxError};
use std::path::PathBuf;

use crate::error::{Result, ScanError};
use crate::types::TableRow;

const SHEET_NAME: &str = "Extracted";
const COLUMN_WIDTH: f64 = 20.0;

/// Remove or replace characters that can corrupt the sheet XML and
/// make Excel report "unreadable content". Drops control chars
/// (except tab, newline, CR), replaces & < > so raw XML never breaks.
fn sanitize_cell(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let u = c as u32;
        if c == '\t' || c == '\n' || c == '\r' {
            out.push(c);
        } else if u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF {
            // skip control and invalid
        } else {
            match c {
                '&' => out.push_str(" and "),
                '<' => out.push(' '),
                '>' => out.push(' '),
                _ => out.push(c),
            }
        }
    }
    out
}

/// Pick an output path: the caller's choice with an enforced .xlsx
/// extension, or a timestamped file in Downloads (Desktop fallback)
/// with a counter when the name is taken.
fn resolve_path(path_override: Option<&str>) -> Result<PathBuf> {
    if let Some(p) = path_override {
        let p = p.trim();
        if !p.is_empty() {
            let mut pb = PathBuf::from(p);
            if pb.extension().map(|e| e.to_str()) != Some(Some("xlsx")) {
                pb.set_extension("xlsx");
            }
            return Ok(pb);
        }
    }
    let dir = dirs::download_dir()
        .or_else(dirs::desktop_dir)
        .ok_or_else(|| {
            ScanError::Export("Could not find Downloads or Desktop folder.".to_string())
        })?;
    let now = chrono::Local::now();
    let mut path = dir.join(format!("Extractions_{}.xlsx", now.format("%Y%m%d_%H%M%S")));
    let mut counter = 2u32;
    while path.exists() {
        path = dir.join(format!(
            "Extractions_{}_{}.xlsx",
            now.format("%Y%m%d_%H%M%S"),
            counter
        ));
        counter += 1;
    }
    Ok(path)
}

/// Write `rows` to a new workbook and return the file path.
pub fn export_rows(
    headers: &[String],
    rows: &[TableRow],
    path_override: Option<&str>,
) -> Result<String> {
    let path = resolve_path(path_override)?;
    let path_str = path
        .to_str()
        .ok_or_else(|| ScanError::Export("Invalid path characters.".to_string()))?
        .to_string();

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name(SHEET_NAME)
        .map_err(|e: XlsxError| ScanError::Export(e.to_string()))?;

    let header_format = Format::new()
        .set_bold()
        .set_background_color(rust_xlsxwriter::Color::RGB(0x2563EB))
        .set_font_color(rust_xlsxwriter::Color::RGB(0xFFFFFF));
    let text_format = Format::new().set_text_wrap();

    for (col, header) in headers.iter().enumerate() {
        worksheet
            .set_column_width(col as u16, COLUMN_WIDTH)
            .map_err(|e: XlsxError| ScanError::Export(e.to_string()))?;
        worksheet
            .write_string_with_format(0, col as u16, sanitize_cell(header), &header_format)
            .map_err(|e: XlsxError| ScanError::Export(e.to_string()))?;
    }

    for (row_idx, row) in rows.iter().enumerate() {
        for (col, header) in headers.iter().enumerate() {
            let value = row.get(header).unwrap_or("");
            worksheet
                .write_string_with_format(
                    (row_idx + 1) as u32,
                    col as u16,
                    sanitize_cell(value),
                    &text_format,
                )
                .map_err(|e: XlsxError| ScanError::Export(e.to_string()))?;
        }
    }

    let _ = worksheet.set_freeze_panes(1, 0);
    workbook
        .save(&path)
        .map_err(|e: XlsxError| ScanError::Export(e.to_string()))?;
    Ok(path_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_strips_control_chars_and_xml_metacharacters() {
        assert_eq!(sanitize_cell("a\u{0}b"), "ab");
        assert_eq!(sanitize_cell("x & y"), "x  and  y");
        assert_eq!(sanitize_cell("<tag>"), " tag ");
        assert_eq!(sanitize_cell("line1\nline2"), "line1\nline2");
        assert_eq!(sanitize_cell("सुनीता राय"), "सुनीता राय");
    }

    #[test]
    fn export_writes_a_workbook() {
        let headers = vec!["Name".to_string(), "Village".to_string()];
        let mut row = TableRow::blank(&headers);
        row.set("Name", "Sunita Rai");
        row.set("Village", "Pokhara");

        let path = std::env::temp_dir().join("survey_scanner_export_test.xlsx");
        let _ = std::fs::remove_file(&path);
        let written =
            export_rows(&headers, &[row], Some(path.to_str().unwrap())).unwrap();
        assert_eq!(written, path.to_str().unwrap());
        let size = std::fs::metadata(&path).unwrap().len();
        assert!(size > 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn extension_is_enforced() {
        let base = std::env::temp_dir().join("survey_scanner_export_noext");
        let _ = std::fs::remove_file(base.with_extension("xlsx"));
        let written = export_rows(
            &["Name".to_string()],
            &[],
            Some(base.to_str().unwrap()),
        )
        .unwrap();
        assert!(written.ends_with(".xlsx"));
        let _ = std::fs::remove_file(base.with_extension("xlsx"));
    }
}
