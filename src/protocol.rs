//! Messages exchanged between the pool's control task and its parse units.
//!
//! The control side sends [`UnitRequest`]s; units answer with [`UnitMessage`]s. Every
//! message carries the id of the job it belongs to, so a late answer for an abandoned job
//! can be recognised and dropped instead of being attributed to whatever the unit runs next.
//!
//! In-process units ([`crate::execution::ThreadUnit`]) move these values through channels as
//! typed Rust values and never serialize them. A unit living across a process or host boundary
//! would exchange each message as a `{ "type": ..., "payload": ... }` object; [`encode`] and
//! [`decode`] produce and read that JSON form, and report malformed input as
//! [`IngestionError::Protocol`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, IngestionResult};
use crate::types::{ParseRequest, ParseResult, ProgressEvent};

/// Pool-assigned job identifier.
pub type JobId = u64;

/// Control → unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum UnitRequest {
    #[serde(rename = "PARSE_FILE", rename_all = "camelCase")]
    ParseFile { job_id: JobId, request: ParseRequest },
}

impl UnitRequest {
    pub fn job_id(&self) -> JobId {
        match self {
            UnitRequest::ParseFile { job_id, .. } => *job_id,
        }
    }
}

/// Unit → control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitMessage {
    pub job_id: JobId,
    #[serde(flatten)]
    pub body: UnitMessageBody,
}

/// Payload of a [`UnitMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum UnitMessageBody {
    /// Zero or more per job, always before the terminal message.
    #[serde(rename = "PARSE_PROGRESS")]
    Progress(ProgressEvent),
    /// Terminal.
    #[serde(rename = "PARSE_COMPLETE")]
    Complete(ParseResult),
    /// Terminal.
    #[serde(rename = "PARSE_ERROR")]
    Error(ErrorPayload),
}

impl UnitMessageBody {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnitMessageBody::Progress(_))
    }
}

/// Body of a `PARSE_ERROR` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl UnitMessage {
    pub fn progress(job_id: JobId, event: ProgressEvent) -> Self {
        Self {
            job_id,
            body: UnitMessageBody::Progress(event),
        }
    }

    pub fn complete(job_id: JobId, result: ParseResult) -> Self {
        Self {
            job_id,
            body: UnitMessageBody::Complete(result),
        }
    }

    pub fn error(job_id: JobId, error: impl Into<String>, file_name: Option<String>) -> Self {
        Self {
            job_id,
            body: UnitMessageBody::Error(ErrorPayload {
                error: error.into(),
                file_name,
            }),
        }
    }
}

/// Serialize a message to its JSON wire form.
pub fn encode<T: Serialize>(message: &T) -> IngestionResult<String> {
    serde_json::to_string(message).map_err(|e| IngestionError::Protocol {
        message: format!("failed to encode message: {e}"),
    })
}

/// Parse a message from its JSON wire form.
pub fn decode<T: DeserializeOwned>(raw: &str) -> IngestionResult<T> {
    serde_json::from_str(raw).map_err(|e| IngestionError::Protocol {
        message: format!("malformed message: {e}"),
    })
}
