//! Pool manager: runs parse jobs on a bounded set of isolated parse units.
//!
//! This module sits "above" [`crate::ingestion`] and provides:
//!
//! - A bounded set of [`unit::ExecutionUnit`]s created lazily, one job per unit at a time
//! - FIFO queueing (or immediate rejection) when every unit is busy
//! - Per-job timeouts, unit-fault detection and optional retries
//! - Real-time metrics + observer hooks for monitoring
//!
//! A [`Pool`] is a cheap, cloneable handle to a control task running on the current tokio
//! runtime. That task is the only owner of the units and job tables; handles talk to it
//! through a channel.

mod dispatcher;
pub mod metrics;
pub mod unit;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{IngestionError, IngestionResult};
use crate::ingestion::{CompositeObserver, IngestionContext, IngestionObserver, IngestionSeverity, TracingObserver};
use crate::types::{FileKind, ParseOptions, ParseRequest, ParseResult, ProgressEvent};

use dispatcher::{Callbacks, Channels, Command, Dispatcher, Submission};

pub use metrics::{PoolMetrics, PoolMetricsSnapshot};
pub use unit::{
    default_handler, ExecutionUnit, NullUnit, NullUnitFactory, ParseHandler, ThreadUnit, ThreadUnitFactory,
    UnitEvent, UnitFactory, UnitId,
};

/// Inputs at or below this size are cheap enough to parse inline. See [`Pool::should_offload`].
pub const DEFAULT_OFFLOAD_THRESHOLD_BYTES: u64 = 1024 * 1024;

/// What the pool does with a job when every unit is busy and the pool is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaturationPolicy {
    /// Hold the job and dispatch it, in submission order, when a unit frees up.
    #[default]
    Queue,
    /// Fail the job immediately with [`IngestionError::PoolSaturated`].
    Reject,
}

/// Which kind of unit the pool starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// One OS thread per unit.
    #[default]
    Thread,
    /// Degraded units that answer every job with an "unsupported environment" result.
    Null,
}

impl UnitKind {
    pub fn factory(self) -> Arc<dyn UnitFactory> {
        match self {
            UnitKind::Thread => Arc::new(ThreadUnitFactory::default()),
            UnitKind::Null => Arc::new(NullUnitFactory),
        }
    }
}

/// Configuration for a [`Pool`].
///
/// Every field has a default, so a partial config (e.g. `{"maxUnits": 2}`) deserializes.
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolOptions {
    /// Upper bound on live units, and therefore on concurrently running jobs.
    pub max_units: usize,
    /// Time allowed from submission to the terminal message, queueing included.
    pub timeout_ms: u64,
    /// How many times a job is re-dispatched after its unit crashes.
    pub retry_attempts: u32,
    /// Base delay before a retry; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
    pub saturation: SaturationPolicy,
    pub unit_kind: UnitKind,
    /// Failures at or above this severity are also reported via [`IngestionObserver::on_alert`].
    pub alert_at_or_above: IngestionSeverity,
    /// Inputs larger than this are worth sending to a unit rather than parsing inline.
    pub offload_threshold_bytes: u64,
    #[serde(skip)]
    pub observer: Option<Arc<dyn IngestionObserver>>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            max_units: n.min(4),
            timeout_ms: 300_000,
            retry_attempts: 0,
            retry_backoff_ms: 100,
            saturation: SaturationPolicy::Queue,
            unit_kind: UnitKind::Thread,
            alert_at_or_above: IngestionSeverity::Critical,
            offload_threshold_bytes: DEFAULT_OFFLOAD_THRESHOLD_BYTES,
            observer: None,
        }
    }
}

impl PoolOptions {
    /// Attach an observer. A second observer is combined with the first; both see every callback.
    pub fn with_observer(mut self, observer: Arc<dyn IngestionObserver>) -> Self {
        self.observer = Some(match self.observer.take() {
            None => observer,
            Some(existing) => Arc::new(CompositeObserver::new(vec![existing, observer])),
        });
        self
    }

    /// Log every job outcome through `tracing`, alongside any other observer.
    pub fn with_tracing(self) -> Self {
        self.with_observer(Arc::new(TracingObserver))
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("max_units", &self.max_units)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("saturation", &self.saturation)
            .field("unit_kind", &self.unit_kind)
            .field("alert_at_or_above", &self.alert_at_or_above)
            .field("offload_threshold_bytes", &self.offload_threshold_bytes)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Where a job's bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// An in-memory payload.
    Bytes { file_name: String, data: Arc<[u8]> },
    /// A file read with `tokio::fs` before the job is submitted.
    Path(PathBuf),
}

impl FileSource {
    pub fn bytes(file_name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        FileSource::Bytes {
            file_name: file_name.into(),
            data: data.into(),
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            FileSource::Bytes { file_name, .. } => file_name.clone(),
            FileSource::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }

    /// Size of the input in bytes. Path sources are measured without being read.
    pub async fn size(&self) -> IngestionResult<u64> {
        match self {
            FileSource::Bytes { data, .. } => Ok(data.len() as u64),
            FileSource::Path(path) => Ok(tokio::fs::metadata(path).await?.len()),
        }
    }

    async fn load(self) -> IngestionResult<Arc<[u8]>> {
        match self {
            FileSource::Bytes { data, .. } => Ok(data),
            FileSource::Path(path) => Ok(tokio::fs::read(&path).await?.into()),
        }
    }
}

impl From<PathBuf> for FileSource {
    fn from(path: PathBuf) -> Self {
        FileSource::Path(path)
    }
}

/// One file to process, with its options and optional callbacks.
///
/// Callbacks run on the pool's control task. `on_complete` or `on_error` fires exactly once,
/// before the corresponding `process_file` future resolves.
pub struct FileConfig {
    pub source: FileSource,
    pub options: ParseOptions,
    on_progress: Option<Box<dyn FnMut(&ProgressEvent) + Send>>,
    on_complete: Option<Box<dyn FnOnce(&ParseResult) + Send>>,
    on_error: Option<Box<dyn FnOnce(&str) + Send>>,
}

impl FileConfig {
    pub fn new(source: impl Into<FileSource>) -> Self {
        Self {
            source: source.into(),
            options: ParseOptions::default(),
            on_progress: None,
            on_complete: None,
            on_error: None,
        }
    }

    pub fn from_bytes(file_name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(FileSource::bytes(file_name, data))
    }

    pub fn with_options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn on_progress(mut self, f: impl FnMut(&ProgressEvent) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnOnce(&ParseResult) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for FileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileConfig")
            .field("source", &self.source)
            .field("options", &self.options)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Read-only snapshot returned by [`Pool::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub total_units: usize,
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub max_units: usize,
}

/// Handle to a pool of parse units.
///
/// # Examples
///
/// ```rust
/// use ingest_pool::execution::{FileConfig, Pool, PoolOptions};
///
/// # #[tokio::main(flavor = "multi_thread")]
/// # async fn main() -> Result<(), ingest_pool::IngestionError> {
/// let pool = Pool::new(PoolOptions::default());
/// let result = pool
///     .process_file(FileConfig::from_bytes("scores.csv", b"name,score\nAlice,90\n".to_vec()))
///     .await?;
/// assert_eq!(result.headers, vec!["name", "score"]);
/// pool.dispose();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pool {
    commands: mpsc::UnboundedSender<Command>,
    metrics: Arc<PoolMetrics>,
    factory: Arc<dyn UnitFactory>,
    max_units: usize,
    offload_threshold_bytes: u64,
    observer: Option<Arc<dyn IngestionObserver>>,
    alert_at_or_above: IngestionSeverity,
}

impl Pool {
    /// Create a pool using the unit kind selected in `options`.
    ///
    /// # Panics
    ///
    /// Panics if `max_units == 0` or if called outside a tokio runtime.
    pub fn new(options: PoolOptions) -> Self {
        let factory = options.unit_kind.factory();
        Self::with_factory(options, factory)
    }

    /// Create a pool whose units come from `factory`.
    ///
    /// # Panics
    ///
    /// Panics if `max_units == 0` or if called outside a tokio runtime.
    pub fn with_factory(options: PoolOptions, factory: Arc<dyn UnitFactory>) -> Self {
        assert!(options.max_units > 0, "max_units must be > 0");

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();
        let (retries_tx, retries_rx) = mpsc::unbounded_channel();

        let metrics = Arc::new(PoolMetrics::new());
        let max_units = options.max_units;
        let offload_threshold_bytes = options.offload_threshold_bytes;
        let observer = options.observer.clone();
        let alert_at_or_above = options.alert_at_or_above;
        debug!(?options, "starting parse pool");

        let dispatcher = Dispatcher::new(
            options,
            Arc::clone(&factory),
            Arc::clone(&metrics),
            events_tx,
            timers_tx,
            retries_tx,
        );
        tokio::spawn(dispatcher.run(Channels {
            commands: commands_rx,
            events: events_rx,
            timers: timers_rx,
            retries: retries_rx,
        }));

        Self {
            commands: commands_tx,
            metrics,
            factory,
            max_units,
            offload_threshold_bytes,
            observer,
            alert_at_or_above,
        }
    }

    /// Whether this pool's units can actually parse. `false` for degraded pools, whose units
    /// answer every job with [`IngestionError::UnsupportedEnvironment`].
    pub fn is_supported(&self) -> bool {
        self.factory.is_supported()
    }

    /// Whether an input of `len` bytes should go through the pool.
    ///
    /// Small inputs, and any input when units cannot parse, are better handled by calling
    /// [`crate::ingestion::run_parse`] directly.
    pub fn should_offload(&self, len: u64) -> bool {
        len > self.offload_threshold_bytes && self.is_supported()
    }

    /// Parse one file on the next available unit.
    ///
    /// Path sources are read first; a read failure is returned as [`IngestionError::Io`]
    /// without occupying a unit.
    pub async fn process_file(&self, config: FileConfig) -> IngestionResult<ParseResult> {
        let FileConfig {
            source,
            options,
            on_progress,
            on_complete,
            on_error,
        } = config;

        let file_name = source.file_name();
        if self.metrics.is_disposed() {
            return Err(self.reject_early(&file_name, IngestionError::Disposed, on_error));
        }
        let bytes = match source.load().await {
            Ok(bytes) => bytes,
            Err(err) => return Err(self.reject_early(&file_name, err, on_error)),
        };

        let request = ParseRequest::new(file_name, bytes, options);

        let (reply_tx, reply_rx) = oneshot::channel();
        let submission = Submission {
            request,
            callbacks: Callbacks {
                on_progress,
                on_complete,
                on_error,
            },
            reply: reply_tx,
        };
        if let Err(mpsc::error::SendError(Command::Submit(submission))) =
            self.commands.send(Command::Submit(submission))
        {
            let file_name = submission.request.file_name;
            let on_error = submission.callbacks.on_error;
            return Err(self.reject_early(&file_name, IngestionError::Disposed, on_error));
        }

        reply_rx.await.unwrap_or(Err(IngestionError::Disposed))
    }

    /// Parse several files concurrently.
    ///
    /// Results are returned in input order; one file failing does not affect the others.
    pub async fn process_files(&self, configs: Vec<FileConfig>) -> Vec<IngestionResult<ParseResult>> {
        futures::future::join_all(configs.into_iter().map(|config| self.process_file(config))).await
    }

    /// Fail every pending job with [`IngestionError::Disposed`] and stop all units.
    ///
    /// Later calls, and later submissions, are no-ops that fail fast.
    pub fn dispose(&self) {
        if self.metrics.is_disposed() {
            return;
        }
        self.metrics.mark_disposed();
        let _ = self.commands.send(Command::Dispose);
    }

    pub fn is_disposed(&self) -> bool {
        self.metrics.is_disposed()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            total_units: self.metrics.total_units(),
            active_jobs: self.metrics.active_jobs(),
            queued_jobs: self.metrics.queued_jobs(),
            max_units: self.max_units,
        }
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Report a failure that happened before the job reached the control task.
    ///
    /// Such jobs never get an id; observers see `job_id == 0`.
    fn reject_early(
        &self,
        file_name: &str,
        err: IngestionError,
        on_error: Option<Box<dyn FnOnce(&str) + Send>>,
    ) -> IngestionError {
        if let Some(on_error) = on_error {
            on_error(&err.to_string());
        }
        if let Some(observer) = &self.observer {
            let ctx = IngestionContext {
                job_id: 0,
                file_name: file_name.to_string(),
                file_kind: FileKind::from_file_name(file_name),
            };
            let severity = err.severity();
            observer.on_failure(&ctx, severity, &err);
            if severity >= self.alert_at_or_above {
                observer.on_alert(&ctx, severity, &err);
            }
        }
        err
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: PoolOptions =
            serde_json::from_str(r#"{"maxUnits": 2, "saturation": "reject", "alertAtOrAbove": "error"}"#).unwrap();
        assert_eq!(opts.max_units, 2);
        assert_eq!(opts.saturation, SaturationPolicy::Reject);
        assert_eq!(opts.alert_at_or_above, IngestionSeverity::Error);
        assert_eq!(opts.timeout_ms, 300_000);
        assert_eq!(opts.retry_attempts, 0);
        assert_eq!(opts.unit_kind, UnitKind::Thread);
        assert_eq!(opts.offload_threshold_bytes, DEFAULT_OFFLOAD_THRESHOLD_BYTES);
        assert!(opts.observer.is_none());
    }

    #[test]
    fn second_observer_is_combined_with_the_first() {
        let opts = PoolOptions::default().with_tracing();
        assert!(format!("{opts:?}").contains("observer: true"));
        let opts = opts.with_tracing();
        assert!(opts.observer.is_some());
        assert!(format!("{:?}", PoolOptions::default()).contains("observer: false"));
    }

    #[tokio::test]
    async fn offload_needs_a_large_input_and_working_units() {
        let pool = Pool::new(PoolOptions {
            max_units: 1,
            offload_threshold_bytes: 16,
            ..Default::default()
        });
        assert!(pool.is_supported());
        assert!(!pool.should_offload(16));
        assert!(pool.should_offload(17));

        let degraded = Pool::new(PoolOptions {
            max_units: 1,
            offload_threshold_bytes: 16,
            unit_kind: UnitKind::Null,
            ..Default::default()
        });
        assert!(!degraded.is_supported());
        assert!(!degraded.should_offload(1 << 30));

        let default_pool = Pool::new(PoolOptions::default());
        assert!(!default_pool.should_offload(DEFAULT_OFFLOAD_THRESHOLD_BYTES));
        assert!(default_pool.should_offload(DEFAULT_OFFLOAD_THRESHOLD_BYTES + 1));

        pool.dispose();
        degraded.dispose();
        default_pool.dispose();
    }

    #[tokio::test]
    async fn source_size_does_not_need_the_contents() {
        let source = FileSource::bytes("a.csv", b"a\n1\n".to_vec());
        assert_eq!(source.size().await.unwrap(), 4);

        let path = std::env::temp_dir().join(format!("ingest-pool-size-{}.csv", std::process::id()));
        std::fs::write(&path, b"x,y\n1,2\n").unwrap();
        assert_eq!(FileSource::from(path.clone()).size().await.unwrap(), 8);
        let _ = std::fs::remove_file(&path);

        let missing = FileSource::from(PathBuf::from("/definitely/not/here.csv"));
        assert!(matches!(missing.size().await, Err(IngestionError::Io(_))));
    }

    #[test]
    fn default_max_units_is_bounded() {
        let opts = PoolOptions::default();
        assert!((1..=4).contains(&opts.max_units));
    }

    #[test]
    fn path_sources_use_the_final_component_as_name() {
        let source = FileSource::from(PathBuf::from("/data/in/sales.xlsx"));
        assert_eq!(source.file_name(), "sales.xlsx");
        assert_eq!(FileKind::from_file_name(&source.file_name()), FileKind::Tabular);
    }

    #[tokio::test]
    async fn status_starts_empty_and_dispose_is_idempotent() {
        let pool = Pool::new(PoolOptions {
            max_units: 3,
            ..Default::default()
        });
        assert_eq!(
            pool.status(),
            PoolStatus {
                total_units: 0,
                active_jobs: 0,
                queued_jobs: 0,
                max_units: 3,
            }
        );
        pool.dispose();
        pool.dispose();
        assert!(pool.is_disposed());
        let err = pool
            .process_file(FileConfig::from_bytes("a.csv", b"a\n1\n".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::Disposed));
    }
}
