//! Core data models used throughout storelens.
//!
//! These types represent the uploaded files, configured paths, cross
//! references, composed context, and formatted answers that flow through the
//! question-answering pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared or sniffed kind of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Text,
    Csv,
    Excel,
    Pdf,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Text => "text",
            FileKind::Csv => "csv",
            FileKind::Excel => "excel",
            FileKind::Pdf => "pdf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Some(FileKind::Text),
            "csv" => Some(FileKind::Csv),
            "excel" | "xlsx" => Some(FileKind::Excel),
            "pdf" => Some(FileKind::Pdf),
            _ => None,
        }
    }
}

/// One worksheet (or the single table of a CSV) with every cell kept as text.
#[derive(Debug, Clone, Serialize)]
pub struct SheetData {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl SheetData {
    pub fn headers(&self) -> &[String] {
        self.rows.first().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A file uploaded during a session. Never persisted.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub kind: FileKind,
    pub raw: Vec<u8>,
    pub content_hash: String,
    pub extracted_text: String,
    pub sheets: Vec<SheetData>,
    pub size_bytes: usize,
    pub char_count: usize,
    pub parse_error: Option<String>,
}

impl UploadedFile {
    pub fn row_count(&self) -> usize {
        self.sheets.iter().map(|s| s.rows.len()).sum()
    }

    pub fn is_parsed(&self) -> bool {
        self.parse_error.is_none()
    }
}

/// A user-declared filesystem root, persisted in the path record store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfiguredPath {
    pub id: String,
    pub name: String,
    pub location: String,
    pub description: Option<String>,
    pub file_count: i64,
    pub total_size: i64,
    pub last_scanned: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Result of a non-mutating check on a filesystem location.
#[derive(Debug, Clone, Serialize)]
pub struct PathValidation {
    pub location: String,
    pub exists: bool,
    pub readable: bool,
    pub is_dir: bool,
    pub is_file: bool,
    pub file_count: Option<u64>,
    pub message: String,
}

impl PathValidation {
    pub fn is_valid(&self) -> bool {
        self.exists && self.readable
    }
}

/// A file found under a configured path during the last scan.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexedFile {
    pub path_id: String,
    pub rel_path: String,
    pub size: i64,
    pub modified: i64,
}

/// A filename or content match returned by a path search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path_id: String,
    pub path_name: String,
    pub file: String,
    pub line: Option<usize>,
    pub context: String,
}

/// Structured value classes recognised by the cross-reference matcher.
///
/// Declaration order is the order used when grouping report lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    StoreId,
    ProductId,
    Date,
    Amount,
    Percentage,
    Phone,
    Email,
    EmployeeId,
    OrderId,
    InvoiceId,
}

impl PatternKind {
    pub const ALL: [PatternKind; 10] = [
        PatternKind::StoreId,
        PatternKind::ProductId,
        PatternKind::Date,
        PatternKind::Amount,
        PatternKind::Percentage,
        PatternKind::Phone,
        PatternKind::Email,
        PatternKind::EmployeeId,
        PatternKind::OrderId,
        PatternKind::InvoiceId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::StoreId => "store-id",
            PatternKind::ProductId => "product-id",
            PatternKind::Date => "date",
            PatternKind::Amount => "amount",
            PatternKind::Percentage => "percentage",
            PatternKind::Phone => "phone",
            PatternKind::Email => "email",
            PatternKind::EmployeeId => "employee-id",
            PatternKind::OrderId => "order-id",
            PatternKind::InvoiceId => "invoice-id",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ExtractedPattern {
    pub kind: PatternKind,
    pub value: String,
}

/// A structured value occurring in at least two distinct files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossReference {
    pub kind: PatternKind,
    pub value: String,
    /// Per-file occurrence counts, keyed by file name.
    pub files: BTreeMap<String, usize>,
}

impl CrossReference {
    pub fn total_count(&self) -> usize {
        self.files.values().sum()
    }
}

/// Where a block of composed context came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    ConfiguredPath,
    Upload,
    ExternalApi,
}

impl ContextSource {
    pub fn tag(&self) -> &'static str {
        match self {
            ContextSource::ConfiguredPath => "CONFIGURED PATH",
            ContextSource::Upload => "UPLOADED FILE",
            ContextSource::ExternalApi => "EXTERNAL DATA",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextBlock {
    pub source: ContextSource,
    pub label: String,
    pub text: String,
    pub truncated: bool,
    /// Set for blocks that carry a whole file; used for cross-referencing.
    #[serde(skip)]
    pub file_text: Option<String>,
}

impl ContextBlock {
    pub fn new(source: ContextSource, label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source,
            label: label.into(),
            text: text.into(),
            truncated: false,
            file_text: None,
        }
    }

    pub fn with_file_text(mut self, text: impl Into<String>) -> Self {
        self.file_text = Some(text.into());
        self
    }

    pub fn render(&self) -> String {
        format!("### [{}] {}\n{}\n", self.source.tag(), self.label, self.text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposedContext {
    pub blocks: Vec<ContextBlock>,
    pub text: String,
}

impl ComposedContext {
    pub fn labels(&self) -> Vec<(ContextSource, String)> {
        self.blocks
            .iter()
            .map(|b| (b.source, b.label.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub source: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Currency,
    Percentage,
    Quantity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub value: String,
    pub unit: UnitKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormattedAnswer {
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub citations: Vec<Citation>,
    pub data_points: Vec<DataPoint>,
}
