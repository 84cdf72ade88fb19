//! Unified parse entrypoint run inside each parse unit.
//!
//! [`run_parse`] takes a [`ParseRequest`], picks the tabular or delimited strategy from
//! [`ParseRequest::file_kind`], cleans the resulting grid and builds the [`ParseResult`].
//! Progress is reported at fixed checkpoints:
//!
//! | phase        | percent | when                                   |
//! |--------------|---------|----------------------------------------|
//! | `reading`    | 10      | the byte buffer is available           |
//! | `parsing`    | 30..50  | inside the format-specific strategy    |
//! | `validating` | 70      | before header detection and cleaning   |
//! | `formatting` | 90      | before the result is assembled         |
//!
//! 100% is implied by the terminal message.

use std::time::Instant;

use tracing::debug;

use crate::error::IngestionResult;
use crate::types::{FileKind, ParseMetadata, ParseRequest, ParseResult, ProgressEvent, ProgressPhase, RawGrid};

use super::cleaning::clean_grid;
use super::delimited::{detect_delimiter, parse_delimited, resolve_delimiter, DEFAULT_CHUNK_SIZE};
use super::encoding::detect_and_decode;

/// Wraps a progress sink and keeps phases and percentages from ever moving backwards.
pub struct ProgressReporter<'a> {
    sink: &'a mut dyn FnMut(ProgressEvent),
    last_phase: ProgressPhase,
    last_percent: u8,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a mut dyn FnMut(ProgressEvent)) -> Self {
        Self {
            sink,
            last_phase: ProgressPhase::Reading,
            last_percent: 0,
        }
    }

    /// Forward `event`, clamping its phase and percent to the last values reported.
    pub fn report(&mut self, mut event: ProgressEvent) {
        event.phase = event.phase.max(self.last_phase);
        event.percent = event.percent.clamp(self.last_percent, 100);
        self.last_phase = event.phase;
        self.last_percent = event.percent;
        (self.sink)(event);
    }
}

/// Run the full parse pipeline for one request.
///
/// # Examples
///
/// ```rust
/// use ingest_pool::ingestion::run_parse;
/// use ingest_pool::types::{ParseOptions, ParseRequest};
///
/// let request = ParseRequest::new("scores.csv", b"name,score\nAlice,90\n".to_vec(), ParseOptions::default());
/// let result = run_parse(&request, &mut |_progress| {}).unwrap();
/// assert_eq!(result.headers, vec!["name", "score"]);
/// assert_eq!(result.get(0, "score"), Some("90"));
/// ```
pub fn run_parse(request: &ParseRequest, sink: &mut dyn FnMut(ProgressEvent)) -> IngestionResult<ParseResult> {
    let start = Instant::now();
    let mut progress = ProgressReporter::new(sink);

    progress.report(ProgressEvent::new(
        ProgressPhase::Reading,
        10,
        format!("Read {} bytes from {}", request.bytes.len(), request.file_name),
    ));

    let grid = match request.file_kind {
        FileKind::Tabular => parse_tabular(request, &mut progress)?,
        FileKind::Delimited => parse_text(request, &mut progress)?,
    };

    progress.report(
        ProgressEvent::new(ProgressPhase::Validating, 70, "Validating rows")
            .with_rows(0, Some(grid.rows.len())),
    );
    let cleaned = clean_grid(&grid.rows)?;

    progress.report(
        ProgressEvent::new(ProgressPhase::Formatting, 90, "Formatting result")
            .with_rows(cleaned.rows.len(), Some(cleaned.rows.len())),
    );

    let parse_time_ms = start.elapsed().as_millis().min(u64::MAX as u128) as u64;
    debug!(
        file_name = %request.file_name,
        rows = cleaned.rows.len(),
        columns = cleaned.headers.len(),
        warnings = cleaned.warnings.len(),
        parse_time_ms,
        "parsed file"
    );

    Ok(ParseResult {
        success: true,
        metadata: ParseMetadata {
            file_name: request.file_name.clone(),
            file_size: request.bytes.len(),
            total_rows: cleaned.rows.len(),
            total_columns: cleaned.headers.len(),
            parse_time_ms,
            encoding: grid.encoding,
            sheet_names: grid.sheet_names,
        },
        rows: cleaned.rows,
        headers: cleaned.headers,
        errors: cleaned.errors,
        warnings: cleaned.warnings,
    })
}

fn parse_text(request: &ParseRequest, progress: &mut ProgressReporter<'_>) -> IngestionResult<RawGrid> {
    let (text, encoding) = detect_and_decode(&request.bytes, request.options.encoding.as_deref())?;
    progress.report(ProgressEvent::new(
        ProgressPhase::Parsing,
        30,
        format!("Decoded text as {encoding}"),
    ));

    let delimiter = match request.options.delimiter.as_deref() {
        Some(raw) => resolve_delimiter(raw)?,
        None => detect_delimiter(&text),
    };
    let chunk_size = request.options.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
    let total_bytes = text.len().max(1);

    let mut grid = parse_delimited(&text, delimiter, chunk_size, |rows, position| {
        let percent = 30 + (position.min(total_bytes) * 20 / total_bytes) as u8;
        progress.report(
            ProgressEvent::new(ProgressPhase::Parsing, percent, format!("Parsed {rows} rows"))
                .with_rows(rows, None),
        );
    })?;

    progress.report(
        ProgressEvent::new(
            ProgressPhase::Parsing,
            50,
            format!("Parsed {} rows (delimiter {:?})", grid.total_rows, delimiter as char),
        )
        .with_rows(grid.total_rows, Some(grid.total_rows)),
    );

    grid.encoding = Some(encoding.to_string());
    Ok(grid)
}

fn parse_tabular(request: &ParseRequest, progress: &mut ProgressReporter<'_>) -> IngestionResult<RawGrid> {
    #[cfg(feature = "excel")]
    {
        progress.report(ProgressEvent::new(ProgressPhase::Parsing, 30, "Loading workbook"));
        let grid = super::excel::parse_workbook(&request.bytes, request.options.sheet_name.as_deref())?;
        progress.report(
            ProgressEvent::new(
                ProgressPhase::Parsing,
                50,
                format!("Loaded sheet ({} x {})", grid.total_rows, grid.total_columns),
            )
            .with_rows(grid.total_rows, Some(grid.total_rows)),
        );
        Ok(grid)
    }

    #[cfg(not(feature = "excel"))]
    {
        let _ = (request, progress);
        Err(crate::error::IngestionError::UnsupportedFormat {
            message: "workbook parsing not enabled (enable cargo feature 'excel')".to_string(),
        })
    }
}
