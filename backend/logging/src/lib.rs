//! Structured logging for afkwarden.
//!
//! Console plus rolling NDJSON file output, token redaction, and a logger for
//! the watchdog's advisory events.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{EventLogEntry, EventLogger};
pub use logger::init_logger;
pub use redact::redact_sensitive_data;
