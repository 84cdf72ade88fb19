//! `ingest-pool` parses large spreadsheet and delimited-text uploads on a bounded pool of
//! isolated parse units, streaming progress back to the caller and returning cleaned,
//! header-aligned rows.
//!
//! The primary entrypoint is [`execution::Pool`]: submit a [`execution::FileConfig`] with
//! [`execution::Pool::process_file`] (or several with [`execution::Pool::process_files`]) and await
//! the [`types::ParseResult`].
//!
//! ## What you can parse
//!
//! **File formats (picked by extension):**
//!
//! - **Workbooks** (requires the Cargo feature `excel`, on by default): `.xlsx`, `.xls`
//! - **Delimited text**: anything else; the delimiter (`,` `\t` `;` `|`) and text encoding
//!   (UTF-8, UTF-16 with BOM, GBK) are detected unless given in [`types::ParseOptions`]
//!
//! **Cleaning:**
//!
//! - The first row is the header row, unless it looks numeric, in which case headers are
//!   generated as `Column 1`, `Column 2`, ...
//! - Blank rows are dropped; every remaining row has exactly one value per header
//! - Large datasets, duplicate headers and ragged rows produce warnings, never failures
//!
//! ## Quick example
//!
//! ```no_run
//! use ingest_pool::execution::{FileConfig, Pool, PoolOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), ingest_pool::IngestionError> {
//! let pool = Pool::new(PoolOptions {
//!     max_units: 2,
//!     ..Default::default()
//! });
//!
//! let config = FileConfig::new(std::path::PathBuf::from("uploads/sales.xlsx"))
//!     .on_progress(|p| println!("{:?} {}% {}", p.phase, p.percent, p.message));
//! let result = pool.process_file(config).await?;
//! println!("rows={} headers={:?}", result.row_count(), result.headers);
//!
//! pool.dispose();
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`execution`]: the pool, its parse units and metrics
//! - [`ingestion`]: the parse pipeline a unit runs (decoding, delimiter detection, workbook
//!   loading, cleaning) and job outcome observers
//! - [`protocol`]: messages exchanged between the pool and its units
//! - [`types`]: requests, progress events and results
//! - [`error`]: the error type shared by every stage

pub mod error;
pub mod execution;
pub mod ingestion;
pub mod protocol;
pub mod types;

pub use error::{IngestionError, IngestionResult};
pub use execution::{FileConfig, FileSource, Pool, PoolOptions, PoolStatus};
