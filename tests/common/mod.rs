//! In-memory chain and harness for relay tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::dyn_abi::{DynSolValue, JsonAbiExt};
use alloy::eips::eip2718::Decodable2718;
use alloy::json_abi::{Event, JsonAbi};
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;

use warden::evm::{decode_log, ChainEndpoint, KeyProvider, LocalKeyProvider};
use warden::metrics::Metrics;
use warden::state::{JsonStateStore, StateStore};
use warden::types::{ChainRole, RawLog, TransactionOutcome};
use warden::{RelayConfig, RelayError, RelayResult, Relayer};

// Well-known anvil account #0
pub const WARDEN_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub const SOURCE_ABI: &str = r#"[
    {"type":"event","name":"Deposit","anonymous":false,"inputs":[
        {"name":"token","type":"address","indexed":true},
        {"name":"recipient","type":"address","indexed":true},
        {"name":"amount","type":"uint256","indexed":false}]},
    {"type":"function","name":"withdraw","stateMutability":"nonpayable","outputs":[],"inputs":[
        {"name":"_token","type":"address"},
        {"name":"_recipient","type":"address"},
        {"name":"_amount","type":"uint256"}]}
]"#;

pub const DESTINATION_ABI: &str = r#"[
    {"type":"event","name":"Unwrap","anonymous":false,"inputs":[
        {"name":"underlying_token","type":"address","indexed":true},
        {"name":"wrapped_token","type":"address","indexed":true},
        {"name":"frm","type":"address","indexed":false},
        {"name":"to","type":"address","indexed":false},
        {"name":"amount","type":"uint256","indexed":false}]},
    {"type":"function","name":"wrap","stateMutability":"nonpayable","outputs":[],"inputs":[
        {"name":"_underlying_token","type":"address"},
        {"name":"_recipient","type":"address"},
        {"name":"_amount","type":"uint256"}]}
]"#;

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn tx_hash(block: u64, log_index: u64) -> B256 {
    keccak256(format!("{}:{}", block, log_index))
}

/// How the next receipt wait resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptBehavior {
    Success,
    Reverted,
    Pending,
}

/// A transaction as decoded from the broadcast bytes
#[derive(Debug, Clone, PartialEq)]
pub struct SentTx {
    pub hash: B256,
    pub function: String,
    pub args: Vec<DynSolValue>,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
}

struct StoredLog {
    block: u64,
    log_index: u64,
    tx_hash: B256,
    topics: Vec<B256>,
    data: Vec<u8>,
}

type LogFailure = Box<dyn Fn(u64, u64) -> Option<String> + Send>;

pub struct MockState {
    pub head: u64,
    logs: Vec<StoredLog>,
    log_failure: Option<LogFailure>,
    /// Failure messages returned by the next head reads
    pub head_failures: VecDeque<String>,
    pub get_logs_calls: Vec<(u64, u64)>,
    pub nonce: u64,
    pub gas_price: u128,
    pub chain_id: u64,
    /// `None` makes estimation fail
    pub gas_estimate: Option<u64>,
    /// Failure messages for the next broadcasts
    pub send_failures: VecDeque<String>,
    pub receipts: VecDeque<ReceiptBehavior>,
    /// Every broadcast, including rejected ones
    pub broadcasts: Vec<SentTx>,
    /// Broadcasts the chain accepted
    pub landed: Vec<SentTx>,
}

pub struct MockChain {
    role: ChainRole,
    address: Address,
    abi: JsonAbi,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(role: ChainRole, abi_json: &str) -> Self {
        let (address, chain_id) = match role {
            ChainRole::Source => (addr(0x51), 43113),
            ChainRole::Destination => (addr(0xd5), 97),
        };
        Self {
            role,
            address,
            abi: serde_json::from_str(abi_json).expect("test ABI parses"),
            state: Mutex::new(MockState {
                head: 0,
                logs: Vec::new(),
                log_failure: None,
                head_failures: VecDeque::new(),
                get_logs_calls: Vec::new(),
                nonce: 0,
                gas_price: 1_000_000_000,
                chain_id,
                gas_estimate: Some(60_000),
                send_failures: VecDeque::new(),
                receipts: VecDeque::new(),
                broadcasts: Vec::new(),
                landed: Vec::new(),
            }),
        }
    }

    pub fn source() -> Self {
        Self::new(ChainRole::Source, SOURCE_ABI)
    }

    pub fn destination() -> Self {
        Self::new(ChainRole::Destination, DESTINATION_ABI)
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state lock")
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    /// Fail log queries for which `f(from, to)` returns a message
    pub fn fail_logs_when<F>(&self, f: F)
    where
        F: Fn(u64, u64) -> Option<String> + Send + 'static,
    {
        self.state().log_failure = Some(Box::new(f));
    }

    /// Emit an event log with values in ABI input order
    pub fn emit(&self, event_name: &str, block: u64, log_index: u64, values: Vec<DynSolValue>) {
        let event = self.abi_event(event_name);
        let mut topics = vec![event.selector()];
        let mut body = Vec::new();
        for (param, value) in event.inputs.iter().zip(values) {
            if param.indexed {
                topics.push(value.as_word().expect("indexed test values are words"));
            } else {
                body.push(value);
            }
        }
        let data = DynSolValue::Tuple(body).abi_encode_params();
        self.emit_raw(event_name, block, log_index, topics[1..].to_vec(), data);
    }

    /// Emit a log with arbitrary non-selector topics and data
    pub fn emit_raw(
        &self,
        event_name: &str,
        block: u64,
        log_index: u64,
        extra_topics: Vec<B256>,
        data: Vec<u8>,
    ) {
        let mut topics = vec![self.abi_event(event_name).selector()];
        topics.extend(extra_topics);
        self.state().logs.push(StoredLog {
            block,
            log_index,
            tx_hash: tx_hash(block, log_index),
            topics,
            data,
        });
    }

    pub fn emit_deposit(&self, block: u64, log_index: u64, token: Address, recipient: Address, amount: u64) {
        self.emit(
            "Deposit",
            block,
            log_index,
            vec![
                DynSolValue::Address(token),
                DynSolValue::Address(recipient),
                DynSolValue::Uint(U256::from(amount), 256),
            ],
        );
    }

    pub fn emit_unwrap(&self, block: u64, log_index: u64, token: Address, recipient: Address, amount: u64) {
        self.emit(
            "Unwrap",
            block,
            log_index,
            vec![
                DynSolValue::Address(token),
                DynSolValue::Address(addr(0xee)),
                DynSolValue::Address(addr(0xcc)),
                DynSolValue::Address(recipient),
                DynSolValue::Uint(U256::from(amount), 256),
            ],
        );
    }

    pub fn landed(&self) -> Vec<SentTx> {
        self.state().landed.clone()
    }

    pub fn broadcasts(&self) -> Vec<SentTx> {
        self.state().broadcasts.clone()
    }

    pub fn get_logs_calls(&self) -> Vec<(u64, u64)> {
        self.state().get_logs_calls.clone()
    }

    fn abi_event(&self, name: &str) -> Event {
        self.abi
            .event(name)
            .and_then(|events| events.first())
            .cloned()
            .expect("event in test ABI")
    }

    fn decode_tx(&self, raw: &[u8]) -> SentTx {
        let envelope = TxEnvelope::decode_2718(&mut &raw[..]).expect("broadcast decodes");
        let input = envelope.input().clone();
        let function = self
            .abi
            .functions()
            .find(|f| f.selector().as_slice() == &input[..4])
            .expect("calldata matches an ABI function");
        let args = function
            .abi_decode_input(&input[4..], true)
            .expect("calldata decodes");
        SentTx {
            hash: keccak256(raw),
            function: function.name.clone(),
            args,
            nonce: envelope.nonce(),
            gas_price: envelope.gas_price().unwrap_or_default(),
            gas_limit: envelope.gas_limit(),
        }
    }
}

#[async_trait]
impl ChainEndpoint for MockChain {
    fn role(&self) -> ChainRole {
        self.role
    }

    fn contract_address(&self) -> Address {
        self.address
    }

    fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    async fn head_height(&self) -> RelayResult<u64> {
        let mut state = self.state();
        match state.head_failures.pop_front() {
            Some(message) => Err(RelayError::from_rpc(message)),
            None => Ok(state.head),
        }
    }

    async fn get_logs(&self, from: u64, to: u64, event: &Event) -> RelayResult<Vec<RawLog>> {
        let mut state = self.state();
        state.get_logs_calls.push((from, to));
        if let Some(message) = state.log_failure.as_ref().and_then(|f| f(from, to)) {
            return Err(RelayError::from_rpc(message));
        }

        let mut logs: Vec<RawLog> = state
            .logs
            .iter()
            .filter(|log| log.block >= from && log.block <= to)
            .filter(|log| log.topics.first() == Some(&event.selector()))
            .map(|log| {
                decode_log(
                    event,
                    log.tx_hash,
                    log.log_index,
                    log.block,
                    &log.topics,
                    &log.data,
                )
            })
            .collect();
        logs.sort_by_key(|log| (log.block_height, log.log_index));
        Ok(logs)
    }

    async fn nonce_of(&self, _address: Address) -> RelayResult<u64> {
        Ok(self.state().nonce)
    }

    async fn gas_price(&self) -> RelayResult<u128> {
        Ok(self.state().gas_price)
    }

    async fn chain_id(&self) -> RelayResult<u64> {
        Ok(self.state().chain_id)
    }

    async fn estimate_gas(&self, _from: Address, _calldata: Bytes) -> RelayResult<u64> {
        self.state()
            .gas_estimate
            .ok_or_else(|| RelayError::RpcTransient("gas required exceeds allowance".to_string()))
    }

    async fn send_raw(&self, raw: Bytes) -> RelayResult<B256> {
        let sent = self.decode_tx(&raw);
        let mut state = self.state();
        state.broadcasts.push(sent.clone());
        if let Some(message) = state.send_failures.pop_front() {
            return Err(RelayError::from_rpc(message));
        }
        state.nonce += 1;
        let hash = sent.hash;
        state.landed.push(sent);
        Ok(hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256, wait: Duration) -> RelayResult<TransactionOutcome> {
        let (behavior, head) = {
            let mut state = self.state();
            (
                state.receipts.pop_front().unwrap_or(ReceiptBehavior::Success),
                state.head,
            )
        };
        match behavior {
            ReceiptBehavior::Success => Ok(TransactionOutcome::success(tx_hash, Some(head))),
            ReceiptBehavior::Reverted => Ok(TransactionOutcome::reverted(tx_hash, Some(head))),
            ReceiptBehavior::Pending => {
                tokio::time::sleep(wait).await;
                Ok(TransactionOutcome::timed_out(tx_hash))
            }
        }
    }
}

/// Two mock chains, a file-backed store in a temp dir, and the warden key
pub struct Harness {
    pub source: Arc<MockChain>,
    pub destination: Arc<MockChain>,
    pub store: Arc<JsonStateStore>,
    pub keys: Arc<LocalKeyProvider>,
    pub metrics: Arc<Metrics>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Arc::new(open_store(dir.path(), "bridge_state.json"));
        Self {
            source: Arc::new(MockChain::source()),
            destination: Arc::new(MockChain::destination()),
            store,
            keys: Arc::new(LocalKeyProvider::from_hex(WARDEN_KEY).expect("test key")),
            metrics: Arc::new(Metrics::new()),
            dir,
        }
    }

    pub fn warden(&self) -> Address {
        self.keys.address()
    }

    pub fn relayer(&self) -> Relayer {
        self.relayer_with(self.store.clone(), RelayConfig::default())
    }

    pub fn relayer_with(&self, store: Arc<dyn StateStore>, config: RelayConfig) -> Relayer {
        Relayer::new(
            self.source.clone(),
            self.destination.clone(),
            store,
            self.keys.clone(),
            self.metrics.clone(),
            config,
        )
        .expect("roles line up")
    }

    pub async fn cursor(&self, role: ChainRole) -> u64 {
        self.store.load_cursor(role).await.expect("cursor readable")
    }

    pub async fn set_cursor(&self, role: ChainRole, height: u64) {
        self.store
            .save_cursor(role, height)
            .await
            .expect("cursor writable");
    }
}

pub fn open_store(dir: &Path, state_file: &str) -> JsonStateStore {
    JsonStateStore::open(dir.join(state_file), dir.join("processed_events.json"))
        .expect("store opens")
}
