//! Job outcome observers.
//!
//! The pool reports every job's terminal outcome to an optional [`IngestionObserver`], and
//! additionally calls [`IngestionObserver::on_alert`] when a failure's severity reaches the
//! configured threshold.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::IngestionError;
use crate::protocol::JobId;
use crate::types::FileKind;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal, or caused by load rather than input).
    Warning,
    /// Error-level event (the input could not be parsed).
    Error,
    /// Critical error (I/O failures, crashed units and other infrastructure failures).
    Critical,
}

/// Context about a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionContext {
    pub job_id: JobId,
    pub file_name: String,
    pub file_kind: FileKind,
}

/// Stats reported on successful parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionStats {
    pub rows: usize,
    pub columns: usize,
    pub warnings: usize,
    /// Time from submission to the terminal message, including any queueing.
    pub elapsed: Duration,
}

/// Observer interface for job outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts. Callbacks run on the pool's
/// control task and should return quickly.
pub trait IngestionObserver: Send + Sync {
    /// Called when a job succeeds.
    fn on_success(&self, _ctx: &IngestionContext, _stats: IngestionStats) {}

    /// Called when a job fails.
    fn on_failure(&self, _ctx: &IngestionContext, _severity: IngestionSeverity, _error: &IngestionError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.on_failure(ctx, severity, error)
    }
}

/// Fans every callback out to a list of observers, in insertion order.
///
/// [`crate::execution::PoolOptions::with_observer`] builds one of these when a second observer
/// is attached.
#[derive(Default, Clone)]
pub struct CompositeObserver {
    members: Vec<Arc<dyn IngestionObserver>>,
}

impl CompositeObserver {
    pub fn new(members: Vec<Arc<dyn IngestionObserver>>) -> Self {
        Self { members }
    }

    pub fn push(&mut self, member: Arc<dyn IngestionObserver>) {
        self.members.push(member);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl FromIterator<Arc<dyn IngestionObserver>> for CompositeObserver {
    fn from_iter<I: IntoIterator<Item = Arc<dyn IngestionObserver>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver").field("members", &self.members.len()).finish()
    }
}

impl IngestionObserver for CompositeObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        self.members.iter().for_each(|m| m.on_success(ctx, stats));
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.members.iter().for_each(|m| m.on_failure(ctx, severity, error));
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.members.iter().for_each(|m| m.on_alert(ctx, severity, error));
    }
}

/// Forwards job outcomes to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl IngestionObserver for TracingObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        info!(
            job_id = ctx.job_id,
            file_name = %ctx.file_name,
            kind = ?ctx.file_kind,
            rows = stats.rows,
            columns = stats.columns,
            warnings = stats.warnings,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "parse job completed"
        );
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        warn!(
            job_id = ctx.job_id,
            file_name = %ctx.file_name,
            kind = ?ctx.file_kind,
            ?severity,
            %error,
            "parse job failed"
        );
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        error!(
            job_id = ctx.job_id,
            file_name = %ctx.file_name,
            kind = ?ctx.file_kind,
            ?severity,
            %error,
            "ALERT: parse job failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl IngestionObserver for Recording {
        fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
            self.events.lock().unwrap().push(format!("ok {} rows={}", ctx.job_id, stats.rows));
        }

        fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, _error: &IngestionError) {
            self.events.lock().unwrap().push(format!("fail {} {severity:?}", ctx.job_id));
        }
    }

    fn ctx() -> IngestionContext {
        IngestionContext {
            job_id: 7,
            file_name: "scores.csv".to_string(),
            file_kind: FileKind::Delimited,
        }
    }

    fn stats() -> IngestionStats {
        IngestionStats {
            rows: 2,
            columns: 2,
            warnings: 0,
            elapsed: Duration::from_millis(3),
        }
    }

    #[test]
    fn composite_fans_out_to_every_member() {
        let a = Arc::new(Recording::default());
        let b = Arc::new(Recording::default());
        let composite: CompositeObserver = [a.clone() as Arc<dyn IngestionObserver>, b.clone()]
            .into_iter()
            .collect();
        assert_eq!(composite.len(), 2);

        composite.on_success(&ctx(), stats());
        // Default on_alert forwards to on_failure on each member.
        composite.on_alert(&ctx(), IngestionSeverity::Critical, &IngestionError::Disposed);

        for member in [&a, &b] {
            assert_eq!(
                *member.events.lock().unwrap(),
                vec!["ok 7 rows=2".to_string(), "fail 7 Critical".to_string()]
            );
        }
    }

    #[test]
    fn empty_composite_is_a_no_op() {
        let mut composite = CompositeObserver::default();
        assert!(composite.is_empty());
        composite.on_failure(&ctx(), IngestionSeverity::Error, &IngestionError::NoDataFound);
        composite.push(Arc::new(TracingObserver));
        assert_eq!(composite.len(), 1);
    }

    #[test]
    fn tracing_observer_handles_every_callback() {
        let obs = TracingObserver;
        obs.on_success(&ctx(), stats());
        obs.on_failure(&ctx(), IngestionSeverity::Warning, &IngestionError::Disposed);
        obs.on_alert(
            &ctx(),
            IngestionSeverity::Critical,
            &IngestionError::UnitFault {
                unit_id: 1,
                message: "boom".to_string(),
            },
        );
    }
}
