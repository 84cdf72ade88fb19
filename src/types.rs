//! Core data model shared by the parse units, the cleaner and the pool.
//!
//! Everything that crosses the unit boundary is plain data and derives `serde` so it can be
//! moved to another thread (or serialized) without sharing live references.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A single raw cell produced by one of the parsing strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// Missing/empty cell.
    Null,
    /// Integer cell.
    Int(i64),
    /// Floating point cell.
    Float(f64),
    /// Boolean cell.
    Bool(bool),
    /// Text cell (every delimited-text cell starts out as text).
    Text(String),
}

impl Cell {
    /// True for `Null` and for text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// True for numeric cells and for text that trims to a finite number.
    pub fn looks_numeric(&self) -> bool {
        match self {
            Cell::Int(_) => true,
            Cell::Float(f) => f.is_finite(),
            Cell::Text(s) => {
                let t = s.trim();
                !t.is_empty() && t.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false)
            }
            Cell::Null | Cell::Bool(_) => false,
        }
    }

    /// Render the cell as the string stored in cleaned rows.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Cell::Bool(b) => b.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }
}

/// Row-major cell grid plus the facts a strategy learned while reading it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGrid {
    /// Row-major cells; rows may have different widths.
    pub rows: Vec<Vec<Cell>>,
    /// Row count reported by the source.
    pub total_rows: usize,
    /// Column count reported by the source.
    pub total_columns: usize,
    /// Encoding used to decode delimited text.
    pub encoding: Option<String>,
    /// Sheet names of the workbook, in workbook order.
    pub sheet_names: Option<Vec<String>>,
}

/// Which parsing strategy handles a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Spreadsheet workbooks (`.xlsx`, `.xls`).
    Tabular,
    /// Delimited text (CSV, TSV and friends).
    Delimited,
}

impl FileKind {
    /// Pick the strategy from a file name's extension (case-insensitive).
    ///
    /// Only `.xlsx` and `.xls` are tabular; anything else is treated as delimited text.
    pub fn from_file_name(file_name: &str) -> Self {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());
        match ext.as_deref() {
            Some("xlsx") | Some("xls") => FileKind::Tabular,
            _ => FileKind::Delimited,
        }
    }
}

/// Caller-provided knobs for one parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseOptions {
    /// Worksheet to read; defaults to the first sheet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    /// Encoding label (e.g. `"utf-8"`, `"gbk"`); auto-detected when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Field delimiter; auto-detected when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    /// Records between incremental progress reports for delimited text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

/// Immutable description of one parse job as sent to a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    /// Raw file contents; shared read-only so retries do not copy the payload.
    pub bytes: Arc<[u8]>,
    pub file_name: String,
    pub file_kind: FileKind,
    #[serde(default)]
    pub options: ParseOptions,
}

impl ParseRequest {
    /// Build a request, choosing the strategy from the file name.
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>, options: ParseOptions) -> Self {
        let file_name = file_name.into();
        Self {
            file_kind: FileKind::from_file_name(&file_name),
            bytes: bytes.into(),
            file_name,
            options,
        }
    }
}

/// Pipeline phase a progress event belongs to, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Reading,
    Parsing,
    Validating,
    Formatting,
}

/// Progress report emitted by a unit while a job runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    /// 0..=100, non-decreasing within a job.
    pub percent: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_row: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<usize>,
}

impl ProgressEvent {
    pub fn new(phase: ProgressPhase, percent: u8, message: impl Into<String>) -> Self {
        Self {
            phase,
            percent: percent.min(100),
            message: message.into(),
            current_row: None,
            total_rows: None,
        }
    }

    pub fn with_rows(mut self, current_row: usize, total_rows: Option<usize>) -> Self {
        self.current_row = Some(current_row);
        self.total_rows = total_rows;
        self
    }
}

/// Facts about a parsed file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseMetadata {
    pub file_name: String,
    pub file_size: usize,
    /// Number of cleaned data rows.
    pub total_rows: usize,
    /// Number of columns (equal to the header count).
    pub total_columns: usize,
    pub parse_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_names: Option<Vec<String>>,
}

/// Terminal outcome of a parse job.
///
/// Rows are positional: `rows[i][j]` belongs to `headers[j]`, and every row has exactly
/// `headers.len()` values. Use [`ParseResult::records`] for keyed access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub success: bool,
    pub rows: Vec<Vec<String>>,
    pub headers: Vec<String>,
    pub metadata: ParseMetadata,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ParseResult {
    /// Result reported by a unit that cannot parse in this environment.
    pub fn unsupported(file_name: impl Into<String>, file_size: usize, message: impl Into<String>) -> Self {
        Self {
            success: false,
            rows: Vec::new(),
            headers: Vec::new(),
            metadata: ParseMetadata {
                file_name: file_name.into(),
                file_size,
                ..Default::default()
            },
            errors: vec![message.into()],
            warnings: Vec::new(),
        }
    }

    /// Number of data rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Iterate rows as `(header, value)` pairs in column order.
    pub fn records(&self) -> impl Iterator<Item = Vec<(&str, &str)>> + '_ {
        self.rows.iter().map(|row| {
            self.headers
                .iter()
                .map(String::as_str)
                .zip(row.iter().map(String::as_str))
                .collect()
        })
    }

    /// Value of column `header` in row `row`, if both exist.
    pub fn get(&self, row: usize, header: &str) -> Option<&str> {
        let col = self.headers.iter().position(|h| h == header)?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }
}
