//! Cross-file value matching.
//!
//! Runs a fixed battery of regular expressions over each file's extracted
//! text, then reports every `(kind, value)` pair that occurs in at least two
//! distinct files. Values are normalised before comparison (currency symbols
//! and grouping removed, e-mails lower-cased, dates reduced to ISO form) so
//! that `₹1,00,000` in one file matches `Rs. 100000` in another.
//!
//! Tabular files are matched cell by cell (see [`match_text`]): the raw CSV
//! dump joins neighbouring cells with commas, which would otherwise read as
//! digit grouping.

use regex::Regex;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::models::{CrossReference, ExtractedPattern, PatternKind, UploadedFile};

/// Separator placed between cells; no pattern in the battery can span it.
const CELL_SEPARATOR: &str = " | ";

static PREFIXED_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]+)[-_ ]?(\d+)$").unwrap());

static PATTERNS: LazyLock<Vec<(PatternKind, Regex)>> = LazyLock::new(|| {
    vec![
        (
            PatternKind::StoreId,
            Regex::new(r"\b(?:[A-Z]{2,4}_[A-Z]{2,4}_\d{2,4}|STORE[-_ ]?\d{1,5})\b").unwrap(),
        ),
        (
            PatternKind::ProductId,
            Regex::new(r"\b(?:PRD|PROD|SKU|P)[-_]?\d{3,}\b").unwrap(),
        ),
        (
            PatternKind::Date,
            Regex::new(r"\b(?:\d{4}-\d{2}-\d{2}|\d{2}[/-]\d{2}[/-]\d{4})\b").unwrap(),
        ),
        (
            PatternKind::Amount,
            Regex::new(
                r"(?:(?:₹|Rs\.?|INR|\$)\s?\d[\d,]*(?:\.\d+)?|\b\d{1,3}(?:,\d{2,3})+(?:\.\d+)?\b)",
            )
            .unwrap(),
        ),
        (
            PatternKind::Percentage,
            Regex::new(r"\b\d+(?:\.\d+)?\s?%").unwrap(),
        ),
        (
            PatternKind::Phone,
            Regex::new(r"(?:\+91[-\s]?)?\b[6-9]\d{9}\b").unwrap(),
        ),
        (
            PatternKind::Email,
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
        ),
        (
            PatternKind::EmployeeId,
            Regex::new(r"\bEMP[-_]?\d{2,}\b").unwrap(),
        ),
        (PatternKind::OrderId, Regex::new(r"\bORD[-_]?\d{2,}\b").unwrap()),
        (
            PatternKind::InvoiceId,
            Regex::new(r"\bINV[-_]?\d{2,}\b").unwrap(),
        ),
    ]
});

/// Canonical form used for comparison across files.
fn normalize(kind: PatternKind, raw: &str) -> String {
    let raw = raw.trim();
    match kind {
        PatternKind::Amount => {
            let digits: String = raw
                .trim_start_matches("Rs.")
                .trim_start_matches("Rs")
                .trim_start_matches("INR")
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            match digits.split_once('.') {
                Some((int, frac)) if frac.chars().all(|c| c == '0') => int.to_string(),
                _ => digits,
            }
        }
        PatternKind::Percentage => raw.replace(' ', ""),
        PatternKind::Phone => {
            let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
            digits[digits.len().saturating_sub(10)..].to_string()
        }
        PatternKind::Email => raw.to_ascii_lowercase(),
        PatternKind::Date => {
            // DD/MM/YYYY and DD-MM-YYYY become YYYY-MM-DD.
            let parts: Vec<&str> = raw.split(['/', '-']).collect();
            if parts.len() == 3 && parts[2].len() == 4 {
                format!("{}-{}-{}", parts[2], parts[1], parts[0])
            } else {
                raw.to_string()
            }
        }
        PatternKind::StoreId
        | PatternKind::ProductId
        | PatternKind::EmployeeId
        | PatternKind::OrderId
        | PatternKind::InvoiceId => canonical_id(raw),
    }
}

/// Canonical form of an identifier: upper-cased, and a single prefix joined
/// to its number by `-` (`STORE12`, `store_12` and `STORE 12` are all
/// `STORE-12`). Structured ids such as `VM_DL_001` keep their underscores.
pub fn canonical_id(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    match PREFIXED_ID.captures(&upper) {
        Some(caps) => format!("{}-{}", &caps[1], &caps[2]),
        None => upper.replace(' ', "_"),
    }
}

/// Text the battery runs over for one file. Parsed tables are rendered one
/// row per line with cells kept apart; everything else is the extracted text.
pub fn match_text(file: &UploadedFile) -> Cow<'_, str> {
    if file.sheets.is_empty() {
        return Cow::Borrowed(&file.extracted_text);
    }
    let mut out = String::new();
    for sheet in &file.sheets {
        for row in &sheet.rows {
            out.push_str(&row.join(CELL_SEPARATOR));
            out.push('\n');
        }
    }
    Cow::Owned(out)
}

/// Cross-references a set of extracted files by filename.
pub fn cross_reference_files(files: &[UploadedFile]) -> Vec<CrossReference> {
    let inputs: Vec<(&str, Cow<'_, str>)> = files
        .iter()
        .map(|f| (f.filename.as_str(), match_text(f)))
        .collect();
    find_cross_references(&inputs)
}

/// Every pattern occurrence in `text`, in battery order then position.
pub fn extract_patterns(text: &str) -> Vec<ExtractedPattern> {
    let mut found = Vec::new();
    for (kind, re) in PATTERNS.iter() {
        for m in re.find_iter(text) {
            let value = normalize(*kind, m.as_str());
            if value.is_empty() {
                continue;
            }
            found.push(ExtractedPattern { kind: *kind, value });
        }
    }
    found
}

/// Occurrence counts per `(kind, value)` for a single file.
pub fn pattern_counts(text: &str) -> HashMap<ExtractedPattern, usize> {
    let mut counts = HashMap::new();
    for p in extract_patterns(text) {
        *counts.entry(p).or_insert(0) += 1;
    }
    counts
}

/// Finds values shared by at least two distinct files.
///
/// `files` is a list of `(name, text)`. Inputs sharing a name are merged.
/// Ordering: total count descending, then value, then kind.
pub fn find_cross_references<S: AsRef<str>, T: AsRef<str>>(
    files: &[(S, T)],
) -> Vec<CrossReference> {
    if files.len() < 2 {
        return Vec::new();
    }

    let mut index: BTreeMap<ExtractedPattern, BTreeMap<String, usize>> = BTreeMap::new();
    for (name, text) in files {
        for (pattern, count) in pattern_counts(text.as_ref()) {
            *index
                .entry(pattern)
                .or_default()
                .entry(name.as_ref().to_string())
                .or_insert(0) += count;
        }
    }

    let mut refs: Vec<CrossReference> = index
        .into_iter()
        .filter(|(_, per_file)| per_file.len() >= 2)
        .map(|(pattern, per_file)| CrossReference {
            kind: pattern.kind,
            value: pattern.value,
            files: per_file,
        })
        .collect();

    refs.sort_by(|a, b| {
        b.total_count()
            .cmp(&a.total_count())
            .then_with(|| a.value.cmp(&b.value))
            .then_with(|| a.kind.cmp(&b.kind))
    });
    refs
}

/// Human-readable report grouped by pattern kind.
pub fn render_report(refs: &[CrossReference]) -> String {
    if refs.is_empty() {
        return "No cross-references found.\n".to_string();
    }

    let mut out = String::new();
    for kind in PatternKind::ALL {
        let group: Vec<&CrossReference> = refs.iter().filter(|r| r.kind == kind).collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("## {} ({})\n", kind, group.len()));
        for r in group {
            let files: Vec<&str> = r.files.keys().map(String::as_str).collect();
            out.push_str(&format!(
                "{}: {} ({} matches) [{}]\n",
                kind,
                files.join(" ↔ "),
                r.total_count(),
                r.value
            ));
        }
    }
    out
}
