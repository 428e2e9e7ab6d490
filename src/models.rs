// Status models for document-processing jobs
// Wire shapes follow the backend's SSE broadcasts and document list responses.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of a job as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// File is still being stored; reported by the upload endpoint
    Uploading,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// `completed` and `failed` end a job; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStatus::Uploading => write!(f, "uploading"),
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Completed => write!(f, "completed"),
            ProcessingStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A status payload, either pushed on the stream or read from the REST API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub processing_status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<u32>,
    /// Broadcast time, as sent by the server (naive UTC ISO-8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: ProcessingStatus) -> Self {
        Self {
            document_id: None,
            processing_status: status,
            processing_step: None,
            processing_progress: None,
            error_message: None,
            chunk_count: None,
            timestamp: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.processing_status.is_terminal()
    }

    /// Progress percentage, clamped to 0..=100
    pub fn progress(&self) -> Option<u8> {
        self.processing_progress.map(|p| p.min(100))
    }

    /// Parsed broadcast time. The backend emits naive UTC; RFC 3339 is accepted too.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp.as_deref()?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Error raised when a `data:` payload is not a recognised event
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// One discrete message received on a job's status channel
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Channel established
    Connected,
    /// Status change for the job
    Status(StatusUpdate),
    /// Server closed the stream cleanly
    Done,
    /// Server-reported fault
    Error { message: String },
}

impl StatusEvent {
    /// Parse the JSON payload of a `data:` frame.
    ///
    /// Payloads carrying a `type` field are control events; anything else must be
    /// a status object with at least `processing_status`.
    pub fn parse(payload: &str) -> Result<Self, EventParseError> {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        let object = value.as_object().ok_or(EventParseError::NotAnObject)?;

        match object.get("type").and_then(|t| t.as_str()) {
            Some("connected") => Ok(StatusEvent::Connected),
            Some("done") => Ok(StatusEvent::Done),
            Some("error") => {
                let message = object
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("Unknown server error")
                    .to_string();
                Ok(StatusEvent::Error { message })
            }
            Some(other) => Err(EventParseError::UnknownType(other.to_string())),
            None => Ok(StatusEvent::Status(serde_json::from_value(value)?)),
        }
    }
}

/// How a subscription ended. Delivered once per subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    /// The job reached `completed`
    Completed(StatusUpdate),
    /// The job reached `failed`, or the server sent an `error` event
    Failed { message: String },
    /// Reconnect budget exhausted; the user has to refresh manually
    ConnectionLost { attempts: u32 },
    /// The job no longer exists on the server (deleted while disconnected)
    Removed,
}

impl TerminalOutcome {
    /// Outcome for a job observed in a terminal status
    pub fn from_status(update: StatusUpdate) -> Self {
        match update.processing_status {
            ProcessingStatus::Failed => TerminalOutcome::Failed {
                message: update
                    .error_message
                    .unwrap_or_else(|| "Document processing failed".to_string()),
            },
            _ => TerminalOutcome::Completed(update),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TerminalOutcome::Completed(_))
    }
}

impl std::fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalOutcome::Completed(update) => match update.chunk_count {
                Some(chunks) => write!(f, "completed ({} chunks)", chunks),
                None => write!(f, "completed"),
            },
            TerminalOutcome::Failed { message } => write!(f, "failed: {}", message),
            TerminalOutcome::ConnectionLost { attempts } => write!(
                f,
                "connection lost after {} reconnect attempts, please refresh",
                attempts
            ),
            TerminalOutcome::Removed => write!(f, "removed"),
        }
    }
}

// API response types (document list endpoint)

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub filename: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub uploader_name: Option<String>,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    pub processing_status: ProcessingStatus,
    #[serde(default)]
    pub processing_step: Option<String>,
    #[serde(default)]
    pub processing_progress: Option<u8>,
    #[serde(default)]
    pub chunk_count: Option<u32>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl DocumentRecord {
    /// Current status of the document in stream-update form
    pub fn status(&self) -> StatusUpdate {
        StatusUpdate {
            document_id: Some(self.document_id.clone()),
            processing_status: self.processing_status,
            processing_step: self.processing_step.clone(),
            processing_progress: self.processing_progress,
            error_message: self.error_message.clone(),
            chunk_count: self.chunk_count,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}
