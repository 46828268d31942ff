//! EVM chain access: endpoints, contract metadata, and warden keys

pub mod contracts;
pub mod endpoint;
pub mod keys;
pub mod rpc_fallback;

pub use contracts::{load_contract_metadata, ContractInfo, ContractMetadata};
pub use endpoint::{decode_log, ChainEndpoint, EvmEndpoint};
pub use keys::{KeyProvider, LocalKeyProvider};
