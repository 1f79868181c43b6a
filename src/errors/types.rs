use serde::{Deserialize, Serialize};

/// Failure classification used across the crate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Transport or connectivity failure
    Network,
    /// Server-side rejection, version conflict or malformed batch result
    Sync,
    /// Local persistence failure
    Storage,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Sync => "sync",
            ErrorKind::Storage => "storage",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "network" => ErrorKind::Network,
            "sync" => ErrorKind::Sync,
            "storage" => ErrorKind::Storage,
            _ => ErrorKind::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that carry their own machine-readable classification.
///
/// Implemented by every error type that can end up in the reporter, so
/// callers never have to guess a kind from message text.
pub trait Classify {
    fn kind(&self) -> ErrorKind;

    /// Whether repeating the same operation could succeed
    fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Network
    }
}

/// One recorded failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    /// Display form of the originating failure, if any
    pub cause: Option<String>,
    pub timestamp: i64,
    /// Structured details (document ids, attempt counts, ...)
    pub context: Option<serde_json::Value>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            context: None,
        }
    }

    pub fn with_cause(mut self, cause: &dyn std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Look up a string field in the context object
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.as_ref()?.get(key)?.as_str()
    }
}
