use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::errors::{Classify, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// No response: connection refused, DNS, timeout
    Network,
    /// The server answered with a non-success status
    Status(u16),
    /// The response body could not be understood
    Decode,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Network,
            message: message.into(),
        }
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Status(code),
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Decode,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self.kind {
            TransportErrorKind::Status(code) => Some(code),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }
}

impl Classify for TransportError {
    fn kind(&self) -> ErrorKind {
        match self.kind {
            TransportErrorKind::Network => ErrorKind::Network,
            TransportErrorKind::Status(_) | TransportErrorKind::Decode => ErrorKind::Sync,
        }
    }

    fn is_retryable(&self) -> bool {
        match self.kind {
            TransportErrorKind::Network => true,
            TransportErrorKind::Status(code) => code >= 500 || code == 408 || code == 429,
            TransportErrorKind::Decode => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Version conflict on document {id}")]
    VersionConflict { id: String },
    #[error("Malformed server response: {0}")]
    Malformed(String),
    #[error("Client is offline")]
    Offline,
}

impl Classify for SyncError {
    fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport(e) => e.kind(),
            SyncError::VersionConflict { .. } | SyncError::Malformed(_) => ErrorKind::Sync,
            SyncError::Offline => ErrorKind::Network,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl SyncError {
    pub fn is_conflict(&self) -> bool {
        match self {
            SyncError::VersionConflict { .. } => true,
            SyncError::Transport(e) => e.is_conflict(),
            _ => false,
        }
    }
}

fn conflict_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\b409\b|\bconflict\b|version[ _-]?conflict|version mismatch").ok())
        .as_ref()
}

/// Whether free-form error text describes a version conflict.
///
/// Only used for batch results that carry no machine-readable code.
pub fn looks_like_conflict(message: &str) -> bool {
    match conflict_pattern() {
        Some(pattern) => pattern.is_match(message),
        None => message.contains("409") || message.to_lowercase().contains("conflict"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert_eq!(TransportError::network("Failed to fetch").kind(), ErrorKind::Network);
        assert!(TransportError::network("timeout").is_retryable());

        let conflict = TransportError::status(409, "Conflict");
        assert_eq!(conflict.kind(), ErrorKind::Sync);
        assert!(conflict.is_conflict());
        assert!(!conflict.is_retryable());

        assert!(TransportError::status(503, "unavailable").is_retryable());
        assert!(TransportError::status(429, "slow down").is_retryable());
        assert!(!TransportError::status(404, "not found").is_retryable());
        assert!(!TransportError::decode("bad json").is_retryable());
    }

    #[test]
    fn test_sync_error_classification() {
        let err = SyncError::from(TransportError::network("Network Error"));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Network Error");

        let conflict = SyncError::VersionConflict { id: "a".to_string() };
        assert_eq!(conflict.kind(), ErrorKind::Sync);
        assert!(conflict.is_conflict());
        assert!(!conflict.is_retryable());

        assert_eq!(SyncError::Offline.kind(), ErrorKind::Network);
        assert!(!SyncError::Offline.is_retryable());
    }

    #[test]
    fn test_looks_like_conflict() {
        assert!(looks_like_conflict("HTTP 409"));
        assert!(looks_like_conflict("Version conflict: expected 3"));
        assert!(looks_like_conflict("VERSION_CONFLICT"));
        assert!(looks_like_conflict("Conflict"));
        assert!(!looks_like_conflict("Document not found"));
        assert!(!looks_like_conflict("id 14090 missing"));
    }
}
