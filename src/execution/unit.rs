//! Parse units: the isolated runtimes the pool hands jobs to.
//!
//! A unit receives [`UnitRequest`]s and answers on the pool's shared event channel with
//! [`UnitEvent`]s. Units never share mutable state with the control task; requests and
//! answers are moved across the boundary.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error};

use crate::error::{IngestionError, IngestionResult};
use crate::ingestion::run_parse;
use crate::protocol::{UnitMessage, UnitRequest};
use crate::types::{ParseRequest, ParseResult, ProgressEvent};

/// Pool-assigned unit identifier.
pub type UnitId = u64;

/// What a unit reports back to the control task.
#[derive(Debug)]
pub enum UnitEvent {
    /// A protocol message for one of the unit's jobs.
    Message { unit_id: UnitId, message: UnitMessage },
    /// The unit crashed and will not answer again.
    Fault { unit_id: UnitId, message: String },
}

/// The work a [`ThreadUnit`] performs for each request.
pub type ParseHandler =
    Arc<dyn Fn(&ParseRequest, &mut dyn FnMut(ProgressEvent)) -> IngestionResult<ParseResult> + Send + Sync>;

/// The real parse pipeline ([`run_parse`]).
pub fn default_handler() -> ParseHandler {
    Arc::new(|request: &ParseRequest, sink: &mut dyn FnMut(ProgressEvent)| run_parse(request, sink))
}

/// Capability set shared by every kind of unit.
pub trait ExecutionUnit: Send {
    fn id(&self) -> UnitId;

    /// Hand a request to the unit. Fails if the unit can no longer accept work.
    fn post(&mut self, request: UnitRequest) -> IngestionResult<()>;

    /// Stop accepting work. Work already running is not interrupted.
    fn terminate(&mut self);
}

/// Creates units for the pool.
pub trait UnitFactory: Send + Sync {
    /// Start a unit that reports on `events`.
    ///
    /// An `Err` means the preferred execution mechanism is unavailable; the pool then falls
    /// back to a [`NullUnit`].
    fn spawn(&self, id: UnitId, events: UnboundedSender<UnitEvent>) -> io::Result<Box<dyn ExecutionUnit>>;

    /// Whether units from this factory can parse at all.
    fn is_supported(&self) -> bool {
        true
    }
}

/// A unit backed by a dedicated OS thread.
///
/// The thread runs one job at a time. A panic while parsing is reported as
/// [`UnitEvent::Fault`] and ends the thread.
pub struct ThreadUnit {
    id: UnitId,
    requests: Option<std_mpsc::Sender<UnitRequest>>,
}

impl ThreadUnit {
    pub fn spawn(id: UnitId, events: UnboundedSender<UnitEvent>, handler: ParseHandler) -> io::Result<Self> {
        let (tx, rx) = std_mpsc::channel::<UnitRequest>();
        thread::Builder::new()
            .name(format!("parse-unit-{id}"))
            .spawn(move || unit_main(id, rx, events, handler))?;
        debug!(unit_id = id, "parse unit started");
        Ok(Self {
            id,
            requests: Some(tx),
        })
    }
}

impl ExecutionUnit for ThreadUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn post(&mut self, request: UnitRequest) -> IngestionResult<()> {
        let tx = self.requests.as_ref().ok_or_else(|| IngestionError::UnitFault {
            unit_id: self.id,
            message: "unit was terminated".to_string(),
        })?;
        tx.send(request).map_err(|_| IngestionError::UnitFault {
            unit_id: self.id,
            message: "unit thread is no longer running".to_string(),
        })
    }

    fn terminate(&mut self) {
        // Dropping the sender ends the thread's receive loop after its current job.
        self.requests = None;
    }
}

fn unit_main(
    id: UnitId,
    requests: std_mpsc::Receiver<UnitRequest>,
    events: UnboundedSender<UnitEvent>,
    handler: ParseHandler,
) {
    while let Ok(UnitRequest::ParseFile { job_id, request }) = requests.recv() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut sink = |event: ProgressEvent| {
                let _ = events.send(UnitEvent::Message {
                    unit_id: id,
                    message: UnitMessage::progress(job_id, event),
                });
            };
            handler(&request, &mut sink)
        }));

        let message = match outcome {
            Ok(Ok(result)) => UnitMessage::complete(job_id, result),
            Ok(Err(err)) => UnitMessage::error(job_id, err.to_string(), Some(request.file_name.clone())),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(unit_id = id, job_id, %message, "parse unit panicked");
                let _ = events.send(UnitEvent::Fault { unit_id: id, message });
                return;
            }
        };

        if events.send(UnitEvent::Message { unit_id: id, message }).is_err() {
            // The pool is gone.
            return;
        }
    }
    debug!(unit_id = id, "parse unit stopped");
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit panicked".to_string()
    }
}

/// Degraded unit used when no real unit can be started.
///
/// It honours the protocol but never parses: every request is answered with a
/// `PARSE_COMPLETE` carrying `success: false` and an explanation.
pub struct NullUnit {
    id: UnitId,
    events: Option<UnboundedSender<UnitEvent>>,
}

impl NullUnit {
    pub const UNSUPPORTED_MESSAGE: &'static str =
        "parallel parsing is unavailable in this environment; no data was parsed";

    pub fn new(id: UnitId, events: UnboundedSender<UnitEvent>) -> Self {
        Self {
            id,
            events: Some(events),
        }
    }
}

impl ExecutionUnit for NullUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn post(&mut self, request: UnitRequest) -> IngestionResult<()> {
        let UnitRequest::ParseFile { job_id, request } = request;
        let events = self.events.as_ref().ok_or_else(|| IngestionError::UnitFault {
            unit_id: self.id,
            message: "unit was terminated".to_string(),
        })?;
        let result = ParseResult::unsupported(&request.file_name, request.bytes.len(), Self::UNSUPPORTED_MESSAGE);
        events
            .send(UnitEvent::Message {
                unit_id: self.id,
                message: UnitMessage::complete(job_id, result),
            })
            .map_err(|_| IngestionError::UnitFault {
                unit_id: self.id,
                message: "pool event channel closed".to_string(),
            })
    }

    fn terminate(&mut self) {
        self.events = None;
    }
}

/// Starts a [`ThreadUnit`] per request, running `handler`.
#[derive(Clone)]
pub struct ThreadUnitFactory {
    handler: ParseHandler,
}

impl ThreadUnitFactory {
    pub fn new(handler: ParseHandler) -> Self {
        Self { handler }
    }
}

impl Default for ThreadUnitFactory {
    fn default() -> Self {
        Self::new(default_handler())
    }
}

impl UnitFactory for ThreadUnitFactory {
    fn spawn(&self, id: UnitId, events: UnboundedSender<UnitEvent>) -> io::Result<Box<dyn ExecutionUnit>> {
        Ok(Box::new(ThreadUnit::spawn(id, events, Arc::clone(&self.handler))?))
    }
}

/// Always produces [`NullUnit`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullUnitFactory;

impl UnitFactory for NullUnitFactory {
    fn spawn(&self, id: UnitId, events: UnboundedSender<UnitEvent>) -> io::Result<Box<dyn ExecutionUnit>> {
        Ok(Box::new(NullUnit::new(id, events)))
    }

    fn is_supported(&self) -> bool {
        false
    }
}
