//! Contract metadata file
//!
//! A JSON document with one entry per chain role:
//!
//! ```json
//! { "source": { "address": "0x...", "abi": [ ... ] },
//!   "destination": { "address": "0x...", "abi": [ ... ] } }
//! ```

use std::path::Path;

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use serde::Deserialize;

use crate::error::{RelayError, RelayResult};
use crate::types::ChainRole;

/// Deployed bridge contract on one chain
#[derive(Debug, Clone)]
pub struct ContractInfo {
    pub address: Address,
    pub abi: JsonAbi,
}

#[derive(Debug, Clone)]
pub struct ContractMetadata {
    pub source: ContractInfo,
    pub destination: ContractInfo,
}

#[derive(Deserialize)]
struct RawContractInfo {
    address: String,
    abi: JsonAbi,
}

#[derive(Deserialize)]
struct RawMetadata {
    source: Option<RawContractInfo>,
    destination: Option<RawContractInfo>,
}

impl ContractMetadata {
    pub fn for_role(&self, role: ChainRole) -> &ContractInfo {
        match role {
            ChainRole::Source => &self.source,
            ChainRole::Destination => &self.destination,
        }
    }

    /// Parse the metadata document
    pub fn from_json(json: &str) -> RelayResult<Self> {
        let raw: RawMetadata = serde_json::from_str(json)
            .map_err(|e| RelayError::Configuration(format!("invalid contract metadata: {}", e)))?;

        Ok(Self {
            source: convert(ChainRole::Source, raw.source)?,
            destination: convert(ChainRole::Destination, raw.destination)?,
        })
    }
}

fn convert(role: ChainRole, raw: Option<RawContractInfo>) -> RelayResult<ContractInfo> {
    let raw = raw.ok_or_else(|| {
        RelayError::Configuration(format!("contract metadata missing '{}' entry", role))
    })?;
    let address = raw.address.trim().parse::<Address>().map_err(|e| {
        RelayError::Configuration(format!(
            "invalid {} contract address '{}': {}",
            role, raw.address, e
        ))
    })?;
    Ok(ContractInfo {
        address,
        abi: raw.abi,
    })
}

/// Load `{source, destination}` contract info from a file
pub fn load_contract_metadata(path: &Path) -> RelayResult<ContractMetadata> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        RelayError::Configuration(format!(
            "failed to read contract metadata {}: {}",
            path.display(),
            e
        ))
    })?;
    ContractMetadata::from_json(&json)
}
