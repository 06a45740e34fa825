//! Multi-format text extraction for uploaded and indexed files.
//!
//! Callers supply bytes plus a declared or sniffed [`FileKind`]; this module
//! returns an [`UploadedFile`] whose `extracted_text` is what the rest of the
//! pipeline sees. Extraction never fails outward: a corrupt file becomes a
//! record carrying a "could not parse" marker so multi-file uploads keep one
//! record per selected file.
//!
//! Tabular files (CSV, every worksheet of an xlsx) are rendered as three
//! sections: a complete raw reproduction, a fixed-width preview of the first
//! rows, and per-column numeric statistics. Cells are always kept as strings.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{FileKind, SheetData, UploadedFile};

/// Rows shown in the fixed-width preview (not counting the header).
pub const PREVIEW_ROWS: usize = 20;
/// Widest a preview column may grow before its cells are clipped.
const PREVIEW_MAX_COL_WIDTH: usize = 32;
/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 200_000;
/// Widest worksheet Excel allows (column `XFD`).
const XLSX_MAX_COLUMNS: usize = 16_384;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("CSV parsing failed: {0}")]
    Csv(String),
    #[error("spreadsheet extraction failed: {0}")]
    Spreadsheet(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Guesses a file's kind from its extension, falling back to magic bytes.
pub fn detect_kind(filename: &str, bytes: &[u8]) -> FileKind {
    let ext = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "csv" => FileKind::Csv,
        "xlsx" | "xlsm" => FileKind::Excel,
        "pdf" => FileKind::Pdf,
        "txt" | "md" | "json" | "log" | "tsv" => FileKind::Text,
        _ if bytes.starts_with(b"%PDF") => FileKind::Pdf,
        _ if bytes.starts_with(b"PK\x03\x04") => FileKind::Excel,
        _ => FileKind::Text,
    }
}

/// Builds an [`UploadedFile`] from raw bytes. Never returns an error.
pub fn extract_upload(filename: &str, bytes: Vec<u8>, declared: Option<FileKind>) -> UploadedFile {
    let kind = declared.unwrap_or_else(|| detect_kind(filename, &bytes));
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let content_hash = format!("{:x}", hasher.finalize());

    let result = match kind {
        FileKind::Text => Ok((decode_text(&bytes), Vec::new())),
        FileKind::Csv => parse_csv(&bytes).map(|sheet| {
            let text = render_sheet(&sheet);
            (text, vec![sheet])
        }),
        FileKind::Excel => extract_xlsx(&bytes).map(|sheets| {
            let text = sheets
                .iter()
                .map(|s| format!("=== SHEET: {} ===\n{}", s.name, render_sheet(s)))
                .collect::<Vec<_>>()
                .join("\n");
            (text, sheets)
        }),
        FileKind::Pdf => extract_pdf(&bytes).map(|text| (text, Vec::new())),
    };

    let (extracted_text, sheets, parse_error) = match result {
        Ok((text, sheets)) => (text, sheets, None),
        Err(e) => {
            warn!(filename, kind = kind.as_str(), error = %e, "file could not be parsed");
            (
                format!("[could not parse {}: {}]", filename, e),
                Vec::new(),
                Some(e.to_string()),
            )
        }
    };

    debug!(
        filename,
        kind = kind.as_str(),
        bytes = bytes.len(),
        "extracted upload"
    );

    UploadedFile {
        filename: filename.to_string(),
        kind,
        size_bytes: bytes.len(),
        char_count: extracted_text.chars().count(),
        content_hash,
        raw: bytes,
        extracted_text,
        sheets,
        parse_error,
    }
}

/// Reads a file from disk and extracts it like an upload.
pub fn extract_file(path: &Path) -> std::io::Result<UploadedFile> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(extract_upload(&name, bytes, None))
}

/// UTF-8 decode, replacing undecodable bytes rather than failing.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.strip_prefix('\u{feff}').unwrap_or(s).to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Parses CSV bytes with every field kept verbatim as a string.
pub fn parse_csv(bytes: &[u8]) -> Result<SheetData, ExtractError> {
    let text = decode_text(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(SheetData {
        name: "csv".to_string(),
        rows,
    })
}

/// Renders a table as raw data, preview, and column statistics.
pub fn render_sheet(sheet: &SheetData) -> String {
    let columns = sheet.rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = format!(
        "=== RAW DATA ({} rows, {} columns) ===\n",
        sheet.rows.len(),
        columns
    );
    out.push_str(&raw_csv(&sheet.rows));
    if !out.ends_with('\n') {
        out.push('\n');
    }

    out.push_str(&format!("\n=== PREVIEW (first {} rows) ===\n", PREVIEW_ROWS));
    out.push_str(&preview_table(&sheet.rows, PREVIEW_ROWS));

    let stats = column_stats(&sheet.rows);
    if !stats.is_empty() {
        out.push_str("\n=== COLUMN STATISTICS ===\n");
        for s in &stats {
            out.push_str(&format!(
                "{}: count={}, min={:.2}, max={:.2}, mean={:.2}, stddev={:.2}\n",
                s.column, s.count, s.min, s.max, s.mean, s.stddev
            ));
        }
    }
    out
}

fn raw_csv(rows: &[Vec<String>]) -> String {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    for row in rows {
        if writer.write_record(row).is_err() {
            break;
        }
    }
    match writer.into_inner() {
        Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => rows
            .iter()
            .map(|r| r.join(","))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Fixed-width table of the header plus the first `limit` data rows.
pub fn preview_table(rows: &[Vec<String>], limit: usize) -> String {
    let shown: Vec<&Vec<String>> = rows.iter().take(limit + 1).collect();
    let columns = shown.iter().map(|r| r.len()).max().unwrap_or(0);
    if columns == 0 {
        return "(empty)\n".to_string();
    }

    let mut widths = vec![0usize; columns];
    for row in &shown {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count().min(PREVIEW_MAX_COL_WIDTH));
        }
    }

    let mut out = String::new();
    for (row_idx, row) in shown.iter().enumerate() {
        let cells: Vec<String> = (0..columns)
            .map(|i| {
                let cell = row.get(i).map(String::as_str).unwrap_or("");
                pad(&clip(cell, PREVIEW_MAX_COL_WIDTH), widths[i])
            })
            .collect();
        out.push_str(cells.join(" | ").trim_end());
        out.push('\n');
        if row_idx == 0 {
            let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            out.push_str(&rule.join("-+-"));
            out.push('\n');
        }
    }
    if rows.len() > shown.len() {
        out.push_str(&format!("... {} more rows\n", rows.len() - shown.len()));
    }
    out
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut clipped: String = s.chars().take(max.saturating_sub(1)).collect();
        clipped.push('~');
        clipped
    }
}

fn pad(s: &str, width: usize) -> String {
    let len = s.chars().count();
    format!("{}{}", s, " ".repeat(width.saturating_sub(len)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
}

/// Statistics for columns whose every non-empty data cell is numeric.
///
/// The first row is treated as the header. Currency symbols, thousands
/// separators and a trailing `%` are ignored when parsing.
pub fn column_stats(rows: &[Vec<String>]) -> Vec<ColumnStats> {
    let Some((header, data)) = rows.split_first() else {
        return Vec::new();
    };
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);

    let mut stats = Vec::new();
    'col: for col in 0..columns {
        let mut values = Vec::new();
        for row in data {
            let cell = row.get(col).map(|c| c.trim()).unwrap_or("");
            if cell.is_empty() {
                continue;
            }
            match parse_number(cell) {
                Some(v) => values.push(v),
                None => continue 'col,
            }
        }
        if values.is_empty() {
            continue;
        }

        let count = values.len();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

        let name = header
            .get(col)
            .filter(|h| !h.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("column {}", col + 1));

        stats.push(ColumnStats {
            column: name,
            count,
            min,
            max,
            mean,
            stddev: variance.sqrt(),
        });
    }
    stats
}

fn parse_number(cell: &str) -> Option<f64> {
    let cleaned: String = cell
        .trim()
        .trim_start_matches("Rs.")
        .chars()
        .filter(|c| !matches!(c, ',' | '₹' | '$' | '%' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Spreadsheet(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Spreadsheet(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Extracts every worksheet of an xlsx workbook, in workbook order.
pub fn extract_xlsx(bytes: &[u8]) -> Result<Vec<SheetData>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;

    let shared_strings = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheets = list_worksheets(&mut archive)?;
    if sheets.is_empty() {
        return Err(ExtractError::Spreadsheet(
            "workbook contains no worksheets".to_string(),
        ));
    }

    let mut out = Vec::new();
    for (name, entry) in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &entry, MAX_XML_ENTRY_BYTES)?;
        let rows = read_sheet_rows(&xml, &shared_strings)?;
        out.push(SheetData { name, rows });
    }
    Ok(out)
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == local {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(current.take().unwrap_or_default()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Spreadsheet(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Returns `(sheet name, zip entry)` pairs in workbook order.
///
/// Uses `xl/workbook.xml` and its relationships when present; otherwise
/// falls back to numbering the `sheetN.xml` entries.
fn list_worksheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ExtractError> {
    use quick_xml::events::Event;

    let mut fallback: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    fallback.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let has_workbook = archive.by_name("xl/workbook.xml").is_ok();
    let has_rels = archive.by_name("xl/_rels/workbook.xml.rels").is_ok();
    if !has_workbook || !has_rels {
        return Ok(fallback
            .into_iter()
            .enumerate()
            .map(|(i, entry)| (format!("Sheet{}", i + 1), entry))
            .collect());
    }

    let rels_xml = read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", MAX_XML_ENTRY_BYTES)?;
    let mut targets: HashMap<String, String> = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(rels_xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr_value(&e, b"Id"), attr_value(&e, b"Target"))
                {
                    let entry = match target.strip_prefix('/') {
                        Some(abs) => abs.to_string(),
                        None => format!("xl/{}", target),
                    };
                    targets.insert(id, entry);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Spreadsheet(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let wb_xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
    let mut sheets = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(wb_xml.as_slice());
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = attr_value(&e, b"name").unwrap_or_default();
                if let Some(entry) = attr_value(&e, b"id").and_then(|id| targets.get(&id).cloned())
                {
                    sheets.push((name, entry));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Spreadsheet(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if sheets.is_empty() {
        return Ok(fallback
            .into_iter()
            .enumerate()
            .map(|(i, entry)| (format!("Sheet{}", i + 1), entry))
            .collect());
    }
    Ok(sheets)
}

/// Zero-based column index from a cell reference such as `"AB12"`.
/// References past column `XFD` are rejected.
fn column_index(cell_ref: &str) -> Result<Option<usize>, ExtractError> {
    let mut idx = 0usize;
    let mut seen = false;
    for c in cell_ref.chars() {
        if !c.is_ascii_alphabetic() {
            break;
        }
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        idx = idx
            .checked_mul(26)
            .and_then(|v| v.checked_add(digit))
            .filter(|v| *v <= XLSX_MAX_COLUMNS)
            .ok_or_else(|| {
                ExtractError::Spreadsheet(format!(
                    "cell reference {} is beyond column XFD",
                    cell_ref
                ))
            })?;
        seen = true;
    }
    Ok(seen.then(|| idx - 1))
}

fn read_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, ExtractError> {
    use quick_xml::events::Event;

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row: Vec<String> = Vec::new();
    let mut in_row = false;
    let mut cell_type = String::new();
    let mut cell_col: Option<usize> = None;
    let mut cell_value = String::new();
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    in_row = true;
                    row.clear();
                }
                b"c" => {
                    cell_type = attr_value(&e, b"t").unwrap_or_default();
                    cell_col = match attr_value(&e, b"r") {
                        Some(r) => column_index(&r)?,
                        None => None,
                    };
                    cell_value.clear();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => {
                rows.push(Vec::new());
            }
            Ok(Event::Text(te)) if in_value => {
                cell_value.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" if in_row => {
                    let text = match cell_type.as_str() {
                        "s" => cell_value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or_default(),
                        "b" => match cell_value.trim() {
                            "1" => "TRUE".to_string(),
                            "0" => "FALSE".to_string(),
                            other => other.to_string(),
                        },
                        _ => cell_value.clone(),
                    };
                    let col = cell_col.unwrap_or(row.len());
                    if col >= XLSX_MAX_COLUMNS {
                        return Err(ExtractError::Spreadsheet(
                            "row has more than 16384 cells".to_string(),
                        ));
                    }
                    if row.len() <= col {
                        // Padding counts against the cell budget too.
                        cell_count += col - row.len();
                        row.resize(col + 1, String::new());
                    }
                    row[col] = text;
                    cell_count += 1;
                }
                b"row" => {
                    in_row = false;
                    rows.push(std::mem::take(&mut row));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Spreadsheet(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
