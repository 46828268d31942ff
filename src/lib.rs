//! Bridge Warden - Library interface
//!
//! Re-exports internal modules for use by the binary and integration tests.

pub mod config;
pub mod error;
pub mod evm;
pub mod metrics;
pub mod normalizer;
pub mod redact;
pub mod relay;
pub mod retry;
pub mod scanner;
pub mod server;
pub mod state;
pub mod submitter;
pub mod types;

pub use error::{RelayError, RelayResult};
pub use relay::{RelayConfig, RelayReport, Relayer};
