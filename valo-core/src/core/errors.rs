//! Engine error taxonomy.
//!
//! Per-record errors never propagate past the record boundary: intake and the
//! tickers classify them, route the record to the DLQ where the kind calls
//! for it, and keep going. Only `Fatal` crosses into process exit.

use rust_decimal::Decimal;
use thiserror::Error;

/// Process exit codes.
pub mod exit_codes {
    /// Normal shutdown.
    pub const OK: i32 = 0;
    /// Fatal configuration error.
    pub const CONFIG: i32 = 1;
    /// Grace period exceeded, pools terminated forcibly.
    pub const FORCED_SHUTDOWN: i32 = 2;
    /// Broker unreachable at startup after the retry window.
    pub const BROKER_UNREACHABLE: i32 = 3;
}

/// Classified engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed record; DLQ'd, acknowledged, never retried in place.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structurally valid but semantically rejected (unknown asset class,
    /// negative rate, bad currency code).
    #[error("validation error: {0}")]
    Validation(String),

    /// Transient downstream failure (cold-store append, subscriber emit);
    /// retried with backoff, then DLQ'd.
    #[error("processing error: {0}")]
    Processing(String),

    /// Account falls outside this shard's ownership range.
    #[error("account {account_id} not owned by this shard")]
    ShardRejection { account_id: u64 },

    /// Rate limiter or pool saturated; the work is dropped and counted.
    #[error("resource exhausted: {0}")]
    ResourceExhaustion(&'static str),

    /// Unrecoverable; the process exits with code 1.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    /// DLQ kind for this error, if it is DLQ-routable.
    pub fn dlq_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Parse(_) => Some(ErrorKind::Parse),
            Self::Validation(_) => Some(ErrorKind::Validation),
            Self::Processing(_) => Some(ErrorKind::Processing),
            _ => None,
        }
    }
}

/// DLQ record kinds, spelled the way the DLQ topic expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    Validation,
    Processing,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "parse-error",
            Self::Validation => "validation-error",
            Self::Processing => "processing-error",
        }
    }
}

impl serde::Serialize for ErrorKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Errors from Decimal <-> fixed-point conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FixedPointError {
    #[error("value {value} does not fit in i64 fixed-point at scale 10^6")]
    OutOfRange { value: Decimal },
}
