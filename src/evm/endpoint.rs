//! Chain endpoint: one chain's RPC connection plus the bridge contract on it
//!
//! [`ChainEndpoint`] is the read/write surface the scanner, submitter and
//! orchestrator are written against. [`EvmEndpoint`] implements it over an
//! alloy HTTP provider.

use std::time::Duration;

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::{Event, Function, JsonAbi};
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, TransactionRequest};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::ChainConfig;
use crate::error::{RelayError, RelayResult};
use crate::evm::contracts::ContractInfo;
use crate::evm::rpc_fallback::create_provider;
use crate::redact::redact_url;
use crate::types::{ChainRole, RawLog, TransactionOutcome};

/// How often a pending transaction's receipt is polled
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read/write primitives over one chain
#[async_trait]
pub trait ChainEndpoint: Send + Sync {
    fn role(&self) -> ChainRole;

    fn contract_address(&self) -> Address;

    fn abi(&self) -> &JsonAbi;

    /// Look up an event in the contract ABI
    fn event(&self, name: &str) -> RelayResult<&Event> {
        self.abi()
            .event(name)
            .and_then(|events| events.first())
            .ok_or_else(|| {
                RelayError::Configuration(format!("{} ABI missing '{}' event", self.role(), name))
            })
    }

    /// Look up a function in the contract ABI
    fn function(&self, name: &str) -> RelayResult<&Function> {
        self.abi()
            .function(name)
            .and_then(|functions| functions.first())
            .ok_or_else(|| {
                RelayError::Configuration(format!(
                    "{} ABI missing '{}' function",
                    self.role(),
                    name
                ))
            })
    }

    async fn head_height(&self) -> RelayResult<u64>;

    /// Logs of `event` emitted by the contract in `[from, to]`, in chain order
    async fn get_logs(&self, from: u64, to: u64, event: &Event) -> RelayResult<Vec<RawLog>>;

    async fn nonce_of(&self, address: Address) -> RelayResult<u64>;

    async fn gas_price(&self) -> RelayResult<u128>;

    async fn chain_id(&self) -> RelayResult<u64>;

    /// Gas estimate for calling the contract with `calldata` from `from`
    async fn estimate_gas(&self, from: Address, calldata: Bytes) -> RelayResult<u64>;

    async fn send_raw(&self, raw: Bytes) -> RelayResult<B256>;

    /// Poll for a receipt until it appears or `wait` passes
    async fn wait_for_receipt(&self, tx_hash: B256, wait: Duration)
        -> RelayResult<TransactionOutcome>;
}

/// Decode a log's topics and data against an ABI event.
///
/// Indexed values are paired with the indexed inputs and body values with the
/// rest, by name. A payload that does not decode yields a log with no fields.
pub fn decode_log(
    event: &Event,
    tx_hash: B256,
    log_index: u64,
    block_height: u64,
    topics: &[B256],
    data: &[u8],
) -> RawLog {
    let fields = match event.decode_log_parts(topics.iter().copied(), data, false) {
        Ok(decoded) => {
            let indexed_names = event.inputs.iter().filter(|p| p.indexed).map(|p| &p.name);
            let body_names = event.inputs.iter().filter(|p| !p.indexed).map(|p| &p.name);
            indexed_names
                .zip(decoded.indexed)
                .chain(body_names.zip(decoded.body))
                .map(|(name, value)| (name.clone(), value))
                .collect::<Vec<(String, DynSolValue)>>()
        }
        Err(e) => {
            warn!(
                tx_hash = %tx_hash,
                log_index = log_index,
                error = %e,
                "Failed to decode {} log", event.name
            );
            Vec::new()
        }
    };

    RawLog {
        tx_hash,
        log_index,
        block_height,
        fields,
    }
}

/// Chain endpoint over an alloy HTTP provider
pub struct EvmEndpoint {
    role: ChainRole,
    provider: RootProvider<Http<Client>>,
    rpc_url: String,
    contract: ContractInfo,
    poa: bool,
}

impl EvmEndpoint {
    /// Connect to the first RPC URL that answers, checking the chain id.
    pub async fn connect(config: &ChainConfig, contract: ContractInfo) -> RelayResult<Self> {
        let mut last_error = String::from("no RPC URL configured");

        for url in config.all_rpc_urls() {
            let provider = create_provider(&url)?;
            let chain_id = match timeout(CONNECT_TIMEOUT, provider.get_chain_id()).await {
                Ok(Ok(id)) => id,
                Ok(Err(e)) => {
                    warn!(role = %config.role, rpc = %redact_url(&url), error = %e, "RPC not reachable");
                    last_error = e.to_string();
                    continue;
                }
                Err(_) => {
                    warn!(role = %config.role, rpc = %redact_url(&url), "RPC connect timed out");
                    last_error = "connect timed out".to_string();
                    continue;
                }
            };

            if let Some(expected) = config.chain_id {
                if expected != chain_id {
                    return Err(RelayError::Configuration(format!(
                        "{} RPC {} reports chain id {}, expected {}",
                        config.role,
                        redact_url(&url),
                        chain_id,
                        expected
                    )));
                }
            }

            let endpoint = Self {
                role: config.role,
                provider,
                rpc_url: url,
                contract,
                poa: config.poa,
            };

            if endpoint.poa {
                endpoint.probe_poa_header().await?;
            }

            info!(
                role = %endpoint.role,
                rpc = %redact_url(&endpoint.rpc_url),
                chain_id = chain_id,
                contract = %endpoint.contract.address,
                poa = endpoint.poa,
                "Connected to chain"
            );
            return Ok(endpoint);
        }

        Err(RelayError::Configuration(format!(
            "{} RPC unreachable: {}",
            config.role, last_error
        )))
    }

    /// Read the latest header as raw JSON, extracting only its number.
    ///
    /// POA headers carry oversized `extraData` and validator fields, so they
    /// are never decoded into a typed header.
    async fn probe_poa_header(&self) -> RelayResult<u64> {
        let block: serde_json::Value = self
            .provider
            .raw_request("eth_getBlockByNumber".into(), ("latest", false))
            .await
            .map_err(|e| {
                RelayError::Configuration(format!("{} header probe failed: {}", self.role, e))
            })?;

        let number = block
            .get("number")
            .and_then(|n| n.as_str())
            .and_then(|n| u64::from_str_radix(n.trim_start_matches("0x"), 16).ok())
            .ok_or_else(|| {
                RelayError::Configuration(format!(
                    "{} header probe returned no block number",
                    self.role
                ))
            })?;

        debug!(role = %self.role, block = number, "POA header probe ok");
        Ok(number)
    }
}

#[async_trait]
impl ChainEndpoint for EvmEndpoint {
    fn role(&self) -> ChainRole {
        self.role
    }

    fn contract_address(&self) -> Address {
        self.contract.address
    }

    fn abi(&self) -> &JsonAbi {
        &self.contract.abi
    }

    async fn head_height(&self) -> RelayResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(RelayError::from_rpc)
    }

    async fn get_logs(&self, from: u64, to: u64, event: &Event) -> RelayResult<Vec<RawLog>> {
        let filter = Filter::new()
            .address(self.contract.address)
            .event_signature(event.selector())
            .from_block(from)
            .to_block(to);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(RelayError::from_rpc)?;

        let mut decoded = Vec::with_capacity(logs.len());
        for log in logs {
            let (Some(tx_hash), Some(log_index), Some(block_height)) =
                (log.transaction_hash, log.log_index, log.block_number)
            else {
                // Pending logs have no position yet
                debug!(role = %self.role, "Skipping log without block position");
                continue;
            };
            decoded.push(decode_log(
                event,
                tx_hash,
                log_index,
                block_height,
                log.topics(),
                &log.data().data,
            ));
        }

        decoded.sort_by_key(|l| (l.block_height, l.log_index));
        Ok(decoded)
    }

    async fn nonce_of(&self, address: Address) -> RelayResult<u64> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(RelayError::from_rpc)
    }

    async fn gas_price(&self) -> RelayResult<u128> {
        self.provider
            .get_gas_price()
            .await
            .map_err(RelayError::from_rpc)
    }

    async fn chain_id(&self) -> RelayResult<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(RelayError::from_rpc)
    }

    async fn estimate_gas(&self, from: Address, calldata: Bytes) -> RelayResult<u64> {
        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(self.contract.address)
            .with_input(calldata);

        self.provider
            .estimate_gas(&tx)
            .await
            .map_err(RelayError::from_rpc)
    }

    async fn send_raw(&self, raw: Bytes) -> RelayResult<B256> {
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(RelayError::from_rpc)?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        wait: Duration,
    ) -> RelayResult<TransactionOutcome> {
        let start = Instant::now();

        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    let block_height = receipt.block_number;
                    return Ok(if receipt.status() {
                        TransactionOutcome::success(tx_hash, block_height)
                    } else {
                        TransactionOutcome::reverted(tx_hash, block_height)
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(tx_hash = %tx_hash, error = %e, "Receipt poll failed");
                }
            }

            if start.elapsed() >= wait {
                warn!(
                    tx_hash = %tx_hash,
                    waited_secs = wait.as_secs(),
                    "Transaction not confirmed before timeout"
                );
                return Ok(TransactionOutcome::timed_out(tx_hash));
            }

            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
