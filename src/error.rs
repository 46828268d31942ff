//! Error taxonomy for the relay engine
//!
//! Every failure the core can produce is one of these variants. The split
//! matters to callers: configuration and persistence failures abort an
//! invocation, RPC failures are absorbed by the scanner/submitter budgets, and
//! decode/revert failures only affect the event they belong to.

use alloy::primitives::B256;
use thiserror::Error;

use crate::retry::{classify_error, ErrorClass};

/// Result alias used throughout the library
pub type RelayResult<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Bad or missing metadata, unsupported chain role, unreachable RPC at connect time
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Provider signalled rate limiting (429, "limit exceeded", ...)
    #[error("rpc throttled: {0}")]
    RpcThrottled(String),

    /// Network failure, timeout, or any other non-throttling RPC error
    #[error("rpc error: {0}")]
    RpcTransient(String),

    /// An event whose argument names match none of the known aliases
    #[error("could not decode {event_id}: unrecognized event fields {fields:?}")]
    EventDecode { event_id: String, fields: Vec<String> },

    /// Receipt came back with status 0
    #[error("transaction {tx_hash} reverted")]
    TransactionReverted {
        tx_hash: B256,
        block_height: Option<u64>,
    },

    /// Generic retries exhausted without a confirmation
    #[error("failed to send transaction after {attempts} attempts: {cause}")]
    SubmissionFailed { attempts: u32, cause: String },

    /// Cursor or dedup state could not be read or durably written
    #[error("state persistence error: {0}")]
    StatePersistence(String),
}

impl RelayError {
    /// Map a transport-level failure into the throttled/transient split.
    pub fn from_rpc(err: impl std::fmt::Display) -> Self {
        let message = err.to_string();
        match classify_error(&message) {
            ErrorClass::Throttled => RelayError::RpcThrottled(message),
            _ => RelayError::RpcTransient(message),
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, RelayError::RpcThrottled(_))
    }

    /// Fatal errors abort the whole invocation instead of a single event.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Configuration(_) | RelayError::StatePersistence(_)
        )
    }
}
