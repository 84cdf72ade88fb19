//! Parsing engine and data cleaner.
//!
//! Everything here runs inside a parse unit. Most callers go through the pool
//! ([`crate::execution::Pool`]); [`run_parse`] (from [`unified`]) is the synchronous pipeline a
//! unit executes for one job:
//!
//! - decodes delimited text ([`encoding`]) and infers its delimiter ([`delimited`]), or loads a
//!   workbook sheet (`excel`, behind the `excel` feature)
//! - detects the header row and normalises rows ([`cleaning`])
//! - reports progress through a caller-provided sink
//!
//! [`observability`] holds the observer hooks the pool reports job outcomes to.

pub mod cleaning;
pub mod delimited;
pub mod encoding;
#[cfg(feature = "excel")]
pub mod excel;
pub mod observability;
pub mod unified;

pub use cleaning::{clean_grid, CleanedData};
pub use observability::{
    CompositeObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats, TracingObserver,
};
pub use unified::{run_parse, ProgressReporter};
