//! Classified failure log shared by the store and the sync engine.
//!
//! Components never crash their callers on failure; they record an
//! [`ErrorRecord`] through the shared [`ErrorReporter`] and degrade to
//! "stay dirty, retry later".

pub mod types;
pub mod reporter;

pub use types::*;
pub use reporter::*;
