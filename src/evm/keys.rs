//! Warden key management
//!
//! The relay core only needs two capabilities from key material: derive the
//! warden address and sign a transaction. [`KeyProvider`] is that seam; the
//! production implementation wraps alloy's `PrivateKeySigner`.

use std::path::Path;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::info;

use crate::error::{RelayError, RelayResult};
use crate::redact::Redacted;

/// Signing identity of the warden
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Address derived from the key
    fn address(&self) -> Address;

    /// Sign a fully populated transaction request, returning EIP-2718 bytes
    async fn sign(&self, tx: TransactionRequest) -> RelayResult<Bytes>;
}

/// Key held in process memory
pub struct LocalKeyProvider {
    address: Address,
    wallet: EthereumWallet,
}

impl LocalKeyProvider {
    /// Parse a hex private key, with or without `0x`
    pub fn from_hex(private_key: &str) -> RelayResult<Self> {
        let signer: PrivateKeySigner = private_key.trim().parse().map_err(|_| {
            RelayError::Configuration(format!("invalid warden key {}", Redacted(private_key)))
        })?;
        let address = signer.address();
        Ok(Self {
            address,
            wallet: EthereumWallet::from(signer),
        })
    }

    /// Read the key from the first line of a file
    pub fn from_file(path: &Path) -> RelayResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Configuration(format!(
                "failed to read key file {}: {}",
                path.display(),
                e
            ))
        })?;
        let first_line = contents.lines().next().unwrap_or_default().trim();
        if first_line.is_empty() {
            return Err(RelayError::Configuration(format!(
                "key file {} is empty",
                path.display()
            )));
        }
        Self::from_hex(first_line)
    }

    /// Resolve the key from an env value if present, otherwise from the key file
    pub fn resolve(env_key: Option<&str>, key_file: &Path) -> RelayResult<Self> {
        let provider = match env_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => Self::from_hex(key)?,
            None => Self::from_file(key_file)?,
        };
        info!(warden = %provider.address, "Warden key loaded");
        Ok(provider)
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, tx: TransactionRequest) -> RelayResult<Bytes> {
        let envelope = <TransactionRequest as TransactionBuilder<Ethereum>>::build(tx, &self.wallet)
            .await
            .map_err(|e| RelayError::Configuration(format!("failed to sign transaction: {}", e)))?;
        Ok(envelope.encoded_2718().into())
    }
}
