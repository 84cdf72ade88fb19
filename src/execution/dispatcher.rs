//! The pool's control task.
//!
//! A single tokio task owns every unit, the active-job map, the wait queue and the timeout
//! handles. Callers talk to it through [`Command`]s; units talk to it through
//! [`UnitEvent`]s. Nothing else mutates this state, so no locks are needed.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{IngestionError, IngestionResult};
use crate::ingestion::{IngestionContext, IngestionStats};
use crate::protocol::{JobId, UnitMessage, UnitMessageBody, UnitRequest};
use crate::types::{ParseRequest, ParseResult, ProgressEvent, ProgressPhase};

use super::metrics::PoolMetrics;
use super::unit::{panic_message, ExecutionUnit, NullUnit, UnitEvent, UnitFactory, UnitId};
use super::{PoolOptions, SaturationPolicy};

pub(crate) type ProgressCallback = Box<dyn FnMut(&ProgressEvent) + Send>;
pub(crate) type CompleteCallback = Box<dyn FnOnce(&ParseResult) + Send>;
pub(crate) type ErrorCallback = Box<dyn FnOnce(&str) + Send>;

#[derive(Default)]
pub(crate) struct Callbacks {
    pub on_progress: Option<ProgressCallback>,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

pub(crate) struct Submission {
    pub request: ParseRequest,
    pub callbacks: Callbacks,
    pub reply: oneshot::Sender<IngestionResult<ParseResult>>,
}

pub(crate) enum Command {
    Submit(Submission),
    Dispose,
}

struct Job {
    id: JobId,
    request: ParseRequest,
    callbacks: Callbacks,
    reply: oneshot::Sender<IngestionResult<ParseResult>>,
    submitted_at: Instant,
    attempt: u32,
    timer: Option<JoinHandle<()>>,
    /// Last progress delivered to the caller, kept across retries.
    last_progress: Option<(ProgressPhase, u8)>,
}

impl Job {
    /// Record `event` unless it would move this job's progress backwards.
    fn advance_progress(&mut self, event: &ProgressEvent) -> bool {
        if let Some((phase, percent)) = self.last_progress {
            if event.phase < phase || event.percent < percent {
                return false;
            }
        }
        self.last_progress = Some((event.phase, event.percent));
        true
    }
}

struct ActiveJob {
    unit_id: UnitId,
    job: Job,
}

struct UnitSlot {
    unit: Box<dyn ExecutionUnit>,
    /// Job the unit believes it is running. Stays set after a timeout until the unit answers.
    current: Option<JobId>,
}

pub(crate) struct Channels {
    pub commands: UnboundedReceiver<Command>,
    pub events: UnboundedReceiver<UnitEvent>,
    pub timers: UnboundedReceiver<JobId>,
    pub retries: UnboundedReceiver<JobId>,
}

pub(crate) struct Dispatcher {
    options: PoolOptions,
    factory: Arc<dyn UnitFactory>,
    metrics: Arc<PoolMetrics>,

    units: Vec<UnitSlot>,
    active: HashMap<JobId, ActiveJob>,
    queue: VecDeque<Job>,
    retrying: HashMap<JobId, Job>,

    next_job_id: JobId,
    next_unit_id: UnitId,

    events_tx: UnboundedSender<UnitEvent>,
    timers_tx: UnboundedSender<JobId>,
    retries_tx: UnboundedSender<JobId>,
}

impl Dispatcher {
    pub fn new(
        options: PoolOptions,
        factory: Arc<dyn UnitFactory>,
        metrics: Arc<PoolMetrics>,
        events_tx: UnboundedSender<UnitEvent>,
        timers_tx: UnboundedSender<JobId>,
        retries_tx: UnboundedSender<JobId>,
    ) -> Self {
        Self {
            options,
            factory,
            metrics,
            units: Vec::new(),
            active: HashMap::new(),
            queue: VecDeque::new(),
            retrying: HashMap::new(),
            next_job_id: 1,
            next_unit_id: 1,
            events_tx,
            timers_tx,
            retries_tx,
        }
    }

    pub async fn run(mut self, mut channels: Channels) {
        loop {
            tokio::select! {
                command = channels.commands.recv() => match command {
                    Some(Command::Submit(submission)) => self.submit(submission),
                    Some(Command::Dispose) | None => break,
                },
                Some(event) = channels.events.recv() => self.on_unit_event(event),
                Some(job_id) = channels.timers.recv() => self.on_timeout(job_id),
                Some(job_id) = channels.retries.recv() => self.on_retry(job_id),
            }
            self.publish_gauges();
        }

        self.shutdown();

        // Submissions that raced with disposal never reach a unit.
        channels.commands.close();
        while let Ok(command) = channels.commands.try_recv() {
            if let Command::Submit(submission) = command {
                let job = self.new_job(submission);
                self.metrics.on_submitted();
                self.finish(job, Err(IngestionError::Disposed));
            }
        }
        self.publish_gauges();
    }

    fn new_job(&mut self, submission: Submission) -> Job {
        let id = self.next_job_id;
        self.next_job_id += 1;
        Job {
            id,
            request: submission.request,
            callbacks: submission.callbacks,
            reply: submission.reply,
            submitted_at: Instant::now(),
            attempt: 0,
            timer: None,
            last_progress: None,
        }
    }

    fn submit(&mut self, submission: Submission) {
        let mut job = self.new_job(submission);
        self.metrics.on_submitted();
        job.timer = Some(self.arm_timeout(job.id));
        debug!(
            job_id = job.id,
            file_name = %job.request.file_name,
            size = job.request.bytes.len(),
            "job submitted"
        );

        // Keep FIFO order: nothing overtakes jobs that are already waiting.
        if !self.queue.is_empty() {
            self.enqueue_or_reject(job);
            return;
        }
        match self.acquire_unit() {
            Some(idx) => self.dispatch(idx, job),
            None => self.enqueue_or_reject(job),
        }
    }

    fn arm_timeout(&self, job_id: JobId) -> JoinHandle<()> {
        let tx = self.timers_tx.clone();
        let delay = Duration::from_millis(self.options.timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(job_id);
        })
    }

    fn enqueue_or_reject(&mut self, job: Job) {
        match self.options.saturation {
            SaturationPolicy::Queue => {
                debug!(job_id = job.id, queued = self.queue.len() + 1, "all units busy; job queued");
                self.queue.push_back(job);
            }
            SaturationPolicy::Reject => {
                let max_units = self.options.max_units;
                self.finish(job, Err(IngestionError::PoolSaturated { max_units }));
            }
        }
    }

    /// Index of an idle unit, creating one if the pool is below capacity.
    fn acquire_unit(&mut self) -> Option<usize> {
        if let Some(idx) = self.units.iter().position(|slot| slot.current.is_none()) {
            return Some(idx);
        }
        if self.units.len() < self.options.max_units {
            let slot = self.spawn_unit();
            self.units.push(slot);
            return Some(self.units.len() - 1);
        }
        None
    }

    fn spawn_unit(&mut self) -> UnitSlot {
        let id = self.next_unit_id;
        self.next_unit_id += 1;
        let unit: Box<dyn ExecutionUnit> = match self.factory.spawn(id, self.events_tx.clone()) {
            Ok(unit) => unit,
            Err(err) => {
                warn!(unit_id = id, %err, "cannot start parse unit; using a degraded unit");
                Box::new(NullUnit::new(id, self.events_tx.clone()))
            }
        };
        self.metrics.on_unit_spawned();
        UnitSlot { unit, current: None }
    }

    fn dispatch(&mut self, idx: usize, job: Job) {
        let slot = &mut self.units[idx];
        let unit_id = slot.unit.id();
        slot.current = Some(job.id);
        let request = UnitRequest::ParseFile {
            job_id: job.id,
            request: job.request.clone(),
        };
        let posted = slot.unit.post(request);
        debug!(job_id = job.id, unit_id, attempt = job.attempt, "job dispatched");
        self.active.insert(job.id, ActiveJob { unit_id, job });

        if let Err(err) = posted {
            self.on_unit_fault(unit_id, err.to_string());
        }
    }

    /// Move waiting jobs onto idle units.
    fn pump(&mut self) {
        while !self.queue.is_empty() {
            let Some(idx) = self.acquire_unit() else {
                break;
            };
            let Some(job) = self.queue.pop_front() else {
                break;
            };
            self.dispatch(idx, job);
        }
    }

    fn on_unit_event(&mut self, event: UnitEvent) {
        match event {
            UnitEvent::Message { unit_id, message } => self.on_unit_message(unit_id, message),
            UnitEvent::Fault { unit_id, message } => {
                error!(unit_id, %message, "parse unit faulted");
                self.on_unit_fault(unit_id, message);
            }
        }
    }

    fn on_unit_message(&mut self, unit_id: UnitId, message: UnitMessage) {
        let Some(pos) = self.units.iter().position(|slot| slot.unit.id() == unit_id) else {
            debug!(unit_id, job_id = message.job_id, "message from a removed unit dropped");
            self.metrics.on_message_discarded();
            return;
        };
        if self.units[pos].current != Some(message.job_id) {
            warn!(unit_id, job_id = message.job_id, "message for a job the unit is not running dropped");
            self.metrics.on_message_discarded();
            return;
        }

        let job_id = message.job_id;
        let outcome = match message.body {
            UnitMessageBody::Progress(event) => {
                self.forward_progress(job_id, &event);
                return;
            }
            UnitMessageBody::Complete(result) if result.success => Ok(result),
            UnitMessageBody::Complete(result) => Err(IngestionError::UnsupportedEnvironment {
                file_name: result.metadata.file_name,
                errors: result.errors,
            }),
            UnitMessageBody::Error(payload) => Err(IngestionError::Parse {
                file_name: payload.file_name.unwrap_or_else(|| {
                    self.active
                        .get(&job_id)
                        .map(|active| active.job.request.file_name.clone())
                        .unwrap_or_default()
                }),
                message: payload.error,
            }),
        };

        self.units[pos].current = None;
        match self.active.remove(&job_id) {
            Some(active) => self.finish(active.job, outcome),
            None => {
                debug!(unit_id, job_id, "late result for an abandoned job dropped");
                self.metrics.on_message_discarded();
            }
        }
        self.pump();
    }

    fn forward_progress(&mut self, job_id: JobId, event: &ProgressEvent) {
        let Some(active) = self.active.get_mut(&job_id) else {
            self.metrics.on_message_discarded();
            return;
        };
        let job = &mut active.job;
        // A retried job replays its early phases; the caller only sees forward movement.
        if !job.advance_progress(event) {
            debug!(job_id, phase = ?event.phase, percent = event.percent, "stale progress dropped");
            return;
        }
        let panicked = match job.callbacks.on_progress.as_mut() {
            Some(on_progress) => !guarded(job_id, "on_progress", || on_progress(event)),
            None => false,
        };
        if panicked {
            job.callbacks.on_progress = None;
        }
    }

    fn on_unit_fault(&mut self, unit_id: UnitId, message: String) {
        let Some(pos) = self.units.iter().position(|slot| slot.unit.id() == unit_id) else {
            return;
        };
        let mut slot = self.units.remove(pos);
        slot.unit.terminate();
        self.metrics.on_unit_fault();

        if let Some(active) = slot.current.and_then(|job_id| self.active.remove(&job_id)) {
            let job = active.job;
            if job.attempt < self.options.retry_attempts {
                self.schedule_retry(job);
            } else {
                self.finish(job, Err(IngestionError::UnitFault { unit_id, message }));
            }
        }
        self.pump();
    }

    fn schedule_retry(&mut self, mut job: Job) {
        job.attempt += 1;
        let delay = Duration::from_millis(self.options.retry_backoff_ms.saturating_mul(u64::from(job.attempt)));
        info!(job_id = job.id, attempt = job.attempt, delay_ms = delay.as_millis() as u64, "retrying job after unit fault");
        self.metrics.on_retried();

        let job_id = job.id;
        self.retrying.insert(job_id, job);
        let tx = self.retries_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(job_id);
        });
    }

    fn on_retry(&mut self, job_id: JobId) {
        if let Some(job) = self.retrying.remove(&job_id) {
            self.queue.push_front(job);
            self.pump();
        }
    }

    fn on_timeout(&mut self, job_id: JobId) {
        let job = if let Some(active) = self.active.remove(&job_id) {
            // The unit keeps `current` pointing at this job; its eventual answer is dropped.
            warn!(job_id, unit_id = active.unit_id, "job timed out while running");
            Some(active.job)
        } else if let Some(pos) = self.queue.iter().position(|job| job.id == job_id) {
            warn!(job_id, "job timed out while queued");
            self.queue.remove(pos)
        } else {
            self.retrying.remove(&job_id)
        };

        if let Some(mut job) = job {
            job.timer = None;
            self.metrics.on_timed_out();
            let timeout_ms = self.options.timeout_ms;
            self.finish(job, Err(IngestionError::Timeout { job_id, timeout_ms }));
        }
    }

    /// Deliver a job's single terminal outcome.
    fn finish(&mut self, mut job: Job, outcome: IngestionResult<ParseResult>) {
        if let Some(timer) = job.timer.take() {
            timer.abort();
        }

        let ctx = IngestionContext {
            job_id: job.id,
            file_name: job.request.file_name.clone(),
            file_kind: job.request.file_kind,
        };
        match &outcome {
            Ok(result) => {
                self.metrics.on_completed();
                if let Some(on_complete) = job.callbacks.on_complete.take() {
                    guarded(job.id, "on_complete", || on_complete(result));
                }
                if let Some(observer) = &self.options.observer {
                    let stats = IngestionStats {
                        rows: result.rows.len(),
                        columns: result.headers.len(),
                        warnings: result.warnings.len(),
                        elapsed: job.submitted_at.elapsed(),
                    };
                    guarded(job.id, "observer", || observer.on_success(&ctx, stats));
                }
            }
            Err(err) => {
                self.metrics.on_failed();
                if let Some(on_error) = job.callbacks.on_error.take() {
                    guarded(job.id, "on_error", || on_error(&err.to_string()));
                }
                if let Some(observer) = &self.options.observer {
                    let severity = err.severity();
                    let alert = severity >= self.options.alert_at_or_above;
                    guarded(job.id, "observer", || {
                        observer.on_failure(&ctx, severity, err);
                        if alert {
                            observer.on_alert(&ctx, severity, err);
                        }
                    });
                }
            }
        }

        // Status read right after the caller wakes must already reflect this job.
        self.publish_gauges();
        // The caller may have stopped waiting; that is not an error here.
        let _ = job.reply.send(outcome);
    }

    fn shutdown(&mut self) {
        self.metrics.mark_disposed();
        info!(
            units = self.units.len(),
            active = self.active.len(),
            queued = self.queue.len() + self.retrying.len(),
            "disposing parse pool"
        );

        let mut pending: Vec<Job> = self.active.drain().map(|(_, active)| active.job).collect();
        pending.extend(self.queue.drain(..));
        pending.extend(self.retrying.drain().map(|(_, job)| job));
        pending.sort_by_key(|job| job.id);
        for job in pending {
            self.finish(job, Err(IngestionError::Disposed));
        }

        for slot in &mut self.units {
            slot.unit.terminate();
        }
        self.units.clear();
    }

    fn publish_gauges(&self) {
        self.metrics.set_gauges(
            self.units.len(),
            self.active.len(),
            self.queue.len() + self.retrying.len(),
        );
    }
}

/// Run caller-supplied code on the control task. A panic is logged and stays with the job.
fn guarded(job_id: JobId, hook: &'static str, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            error!(job_id, hook, message = %panic_message(payload.as_ref()), "callback panicked");
            false
        }
    }
}
