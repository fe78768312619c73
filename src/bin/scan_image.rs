//! Scan one or more images from the command line and print the
//! reconciled table.
//!
//! Usage: scan_image <header,header,...> <image> [image...] [--export [path]]

use std::process::ExitCode;

use survey_scanner::{excel, Db, PageImage, Scanner, VisionClient};

fn mime_for(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

fn run() -> Result<(), String> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut export_path: Option<Option<String>> = None;
    if let Some(pos) = args.iter().position(|a| a == "--export") {
        args.remove(pos);
        if pos < args.len() && !args[pos].starts_with("--") {
            export_path = Some(Some(args.remove(pos)));
        } else {
            export_path = Some(None);
        }
    }

    if args.len() < 2 {
        return Err(
            "Usage: scan_image <header,header,...> <image> [image...] [--export [path]]"
                .to_string(),
        );
    }

    let headers: Vec<String> = args[0]
        .split(',')
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();

    let provider = VisionClient::from_env().map_err(|e| e.to_string())?;
    let db = Db::open_default().map_err(|e| e.to_string())?;
    let scanner = Scanner::new(provider, db);

    let mut pages = Vec::new();
    for path in &args[1..] {
        let bytes = std::fs::read(path).map_err(|e| format!("Could not read {}: {}", path, e))?;
        pages.push(PageImage {
            name: path.clone(),
            bytes,
            mime: mime_for(path).to_string(),
        });
    }

    let outcome = scanner
        .scan_pages(&pages, &headers, |current, total| {
            eprintln!("Scanning page {} of {}...", current, total);
        })
        .map_err(|e| e.to_string())?;

    let result = &outcome.result;
    println!("Document type: {}", result.document_type);
    if !result.narrative.is_empty() {
        println!("\n{}\n", result.narrative);
    }
    println!("{}", headers.join(" | "));
    for row in &result.rows {
        let cells: Vec<&str> = headers
            .iter()
            .map(|h| row.get(h).unwrap_or(""))
            .collect();
        println!("{}", cells.join(" | "));
    }
    for warning in &result.warnings {
        eprintln!("Warning: {}", warning);
    }
    eprintln!(
        "{} used of {} scans today",
        scanner.usage_today(),
        survey_scanner::DAILY_LIMIT
    );

    if let Some(path) = export_path {
        let written = excel::export_rows(&headers, &result.rows, path.as_deref())
            .map_err(|e| e.to_string())?;
        eprintln!("Exported to {}", written);
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
