use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error taxonomy as seen by state observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Transport,
    CommandInFlight,
    Unconfirmed,
    ResourceInvalidated,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self.kind, ErrorKind::Unconfirmed)
    }
}
