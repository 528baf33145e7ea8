//! Named error kinds that cross module boundaries.
//!
//! Per the error handling design, every failure that needs to be matched on
//! (rather than just logged and forgotten) carries one of these kinds. Errors
//! that never leave the function that produced them use plain `anyhow::Error`
//! with `.context(...)`, following the teacher's convention.

use std::fmt;

/// A named error kind, wrapping the underlying cause.
#[derive(Debug)]
pub enum RtdsError {
    /// Malformed source string, unknown tag type, unknown connector kind,
    /// missing DB URL. Fatal at startup, recoverable on RELOAD.
    Config(anyhow::Error),
    /// Connector open/read/write failure, DB session failure, bus send
    /// failure. Logged and retried on the next cycle.
    Transient(anyhow::Error),
    /// A `TagValue` doesn't match its tag's declared type.
    Schema(anyhow::Error),
    /// A supervised worker died. The scan loop terminates cleanly.
    Fatal(anyhow::Error),
}

impl fmt::Display for RtdsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtdsError::Config(e) => write!(f, "config error: {e}"),
            RtdsError::Transient(e) => write!(f, "transient error: {e}"),
            RtdsError::Schema(e) => write!(f, "schema error: {e}"),
            RtdsError::Fatal(e) => write!(f, "fatal error: {e}"),
        }
    }
}

impl std::error::Error for RtdsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RtdsError::Config(e) | RtdsError::Transient(e) | RtdsError::Schema(e) | RtdsError::Fatal(e) => {
                e.source()
            }
        }
    }
}

impl RtdsError {
    pub fn config(msg: impl Into<String>) -> Self {
        RtdsError::Config(anyhow::anyhow!(msg.into()))
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        RtdsError::Schema(anyhow::anyhow!(msg.into()))
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        RtdsError::Fatal(anyhow::anyhow!(msg.into()))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RtdsError::Fatal(_))
    }
}
