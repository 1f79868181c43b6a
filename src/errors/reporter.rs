use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, warn};

use crate::errors::types::{Classify, ErrorKind, ErrorRecord};

/// Records kept before trimming kicks in
const MAX_RECORDS: usize = 100;

/// Records kept after a trim
const TRIM_TO: usize = 50;

/// Default number of records returned by [`ErrorReporter::recent_default`]
const DEFAULT_RECENT: usize = 10;

pub type ErrorListener = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;

/// Handle returned by [`ErrorReporter::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Bounded, append-only log of classified failures.
///
/// One instance is created at startup and shared (`Arc`) by every component
/// that records failures. Listeners are called synchronously for each new
/// record, outside the internal lock.
pub struct ErrorReporter {
    records: Mutex<Vec<ErrorRecord>>,
    listeners: Mutex<Vec<(ListenerId, ErrorListener)>>,
    next_listener_id: AtomicU64,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::with_capacity(MAX_RECORDS + 1)),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Record a failure. Never panics, even if a listener does.
    pub fn log_error(
        &self,
        kind: ErrorKind,
        message: impl Into<String>,
        cause: Option<&dyn std::fmt::Display>,
        context: Option<serde_json::Value>,
    ) {
        let mut record = ErrorRecord::new(kind, message);
        if let Some(cause) = cause {
            record = record.with_cause(cause);
        }
        if let Some(context) = context {
            record = record.with_context(context);
        }
        self.push(record);
    }

    /// Record a classified error, taking the kind from the error itself
    pub fn report<E>(&self, message: impl Into<String>, err: &E, context: Option<serde_json::Value>)
    where
        E: Classify + std::fmt::Display,
    {
        self.log_error(err.kind(), message, Some(err), context);
    }

    /// Append a prepared record
    pub fn push(&self, record: ErrorRecord) {
        error!(
            kind = record.kind.as_str(),
            cause = record.cause.as_deref().unwrap_or(""),
            context = ?record.context,
            "{}",
            record.message
        );

        {
            let mut records = lock(&self.records);
            records.push(record.clone());
            if records.len() > MAX_RECORDS {
                let excess = records.len() - TRIM_TO;
                records.drain(..excess);
            }
        }

        let listeners: Vec<ErrorListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&record))).is_err() {
                warn!("Error listener panicked while handling a {} record", record.kind);
            }
        }
    }

    /// Register a listener notified on every new record
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ErrorRecord) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Unregister a listener. Returns false if it was already gone.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Most recent `limit` records, oldest first
    pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        let records = lock(&self.records);
        let start = records.len().saturating_sub(limit);
        records[start..].to_vec()
    }

    pub fn recent_default(&self) -> Vec<ErrorRecord> {
        self.recent(DEFAULT_RECENT)
    }

    /// All retained records of one kind, oldest first
    pub fn by_kind(&self, kind: ErrorKind) -> Vec<ErrorRecord> {
        lock(&self.records)
            .iter()
            .filter(|record| record.kind == kind)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<ErrorRecord> {
        lock(&self.records).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.records).clear();
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}

// A poisoned log is still a usable log.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
