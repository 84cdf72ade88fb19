use thiserror::Error;

use crate::ingestion::IngestionSeverity;

/// Convenience result type for ingestion and pool operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Error type returned by the parsing pipeline and the unit pool.
///
/// A single enum is shared by every stage so that a job's failure can travel from a parse
/// unit to the caller without re-wrapping.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Underlying I/O error (e.g. the input file could not be read).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Delimited-text parsing error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "excel")]
    /// Workbook parsing error (feature-gated behind `excel`).
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    /// The caller asked for a text encoding that has no known decoder.
    #[error("unknown text encoding '{label}'")]
    Encoding { label: String },

    /// The requested worksheet does not exist in the workbook.
    #[error("sheet '{requested}' not found; available sheets: {}", available.join(", "))]
    SheetNotFound {
        requested: String,
        available: Vec<String>,
    },

    /// The source produced no rows at all.
    #[error("no data found in file")]
    NoDataFound,

    /// Every row was dropped during cleaning.
    #[error("no valid data rows after cleaning")]
    NoValidData,

    /// The request cannot be parsed with the available strategies or options.
    #[error("unsupported format: {message}")]
    UnsupportedFormat { message: String },

    /// The job ran on a degraded unit that cannot parse anything.
    #[error("unsupported environment for '{file_name}': {}", errors.join("; "))]
    UnsupportedEnvironment {
        file_name: String,
        errors: Vec<String>,
    },

    /// The pool is at capacity and configured to reject instead of queue.
    #[error("all {max_units} parse units are busy; try again later")]
    PoolSaturated { max_units: usize },

    /// The job did not reach a terminal message in time.
    #[error("job {job_id} timed out after {timeout_ms}ms")]
    Timeout { job_id: u64, timeout_ms: u64 },

    /// The unit running the job crashed or stopped answering.
    #[error("parse unit {unit_id} failed: {message}")]
    UnitFault { unit_id: u64, message: String },

    /// A unit reported that the input could not be parsed.
    #[error("failed to parse '{file_name}': {message}")]
    Parse { file_name: String, message: String },

    /// The pool was disposed before the job finished.
    #[error("pool disposed")]
    Disposed,

    /// A message could not be encoded or decoded.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl IngestionError {
    /// Classify the error for observers and alert thresholds.
    ///
    /// Infrastructure failures are `Critical`; load-related outcomes (timeouts, saturation,
    /// shutdown) are `Warning`; problems with the input itself are `Error`.
    pub fn severity(&self) -> IngestionSeverity {
        match self {
            IngestionError::Io(_) => IngestionSeverity::Critical,
            IngestionError::Csv(err) => match err.kind() {
                csv::ErrorKind::Io(_) => IngestionSeverity::Critical,
                _ => IngestionSeverity::Error,
            },
            #[cfg(feature = "excel")]
            IngestionError::Excel(_) => IngestionSeverity::Error,
            IngestionError::UnitFault { .. } | IngestionError::Protocol { .. } => {
                IngestionSeverity::Critical
            }
            IngestionError::Timeout { .. }
            | IngestionError::PoolSaturated { .. }
            | IngestionError::Disposed => IngestionSeverity::Warning,
            IngestionError::Encoding { .. }
            | IngestionError::SheetNotFound { .. }
            | IngestionError::NoDataFound
            | IngestionError::NoValidData
            | IngestionError::UnsupportedFormat { .. }
            | IngestionError::UnsupportedEnvironment { .. }
            | IngestionError::Parse { .. } => IngestionSeverity::Error,
        }
    }
}
