//! Core types for the warden relay
//!
//! Chain roles, relay directions, decoded logs, and the records that flow
//! between the scanner, normalizer, submitter and orchestrator.

use std::fmt;
use std::str::FromStr;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, B256, U256};

use crate::error::RelayError;

/// Which side of the bridge a chain plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChainRole {
    Source,
    Destination,
}

impl ChainRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainRole::Source => "source",
            ChainRole::Destination => "destination",
        }
    }
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainRole {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "source" => Ok(ChainRole::Source),
            "destination" => Ok(ChainRole::Destination),
            other => Err(RelayError::Configuration(format!(
                "invalid chain '{}', use 'source' or 'destination'",
                other
            ))),
        }
    }
}

/// One direction of the bridge, named after the chain whose events are scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Deposit on source -> wrap on destination
    SourceToDestination,
    /// Unwrap on destination -> withdraw on source
    DestinationToSource,
}

impl Direction {
    pub fn origin(&self) -> ChainRole {
        match self {
            Direction::SourceToDestination => ChainRole::Source,
            Direction::DestinationToSource => ChainRole::Destination,
        }
    }

    pub fn target(&self) -> ChainRole {
        match self {
            Direction::SourceToDestination => ChainRole::Destination,
            Direction::DestinationToSource => ChainRole::Source,
        }
    }

    pub fn event_kind(&self) -> EventKind {
        match self {
            Direction::SourceToDestination => EventKind::Deposit,
            Direction::DestinationToSource => EventKind::Unwrap,
        }
    }

    pub fn counterpart(&self) -> BridgeFunction {
        self.event_kind().counterpart()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.origin(), self.target())
    }
}

impl FromStr for Direction {
    type Err = RelayError;

    /// Parses the chain to scan: `source` or `destination`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<ChainRole>()? {
            ChainRole::Source => Direction::SourceToDestination,
            ChainRole::Destination => Direction::DestinationToSource,
        })
    }
}

/// Canonical bridge event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Deposit,
    Unwrap,
}

impl EventKind {
    /// Event name as it appears in the contract ABI
    pub fn event_name(&self) -> &'static str {
        match self {
            EventKind::Deposit => "Deposit",
            EventKind::Unwrap => "Unwrap",
        }
    }

    pub fn counterpart(&self) -> BridgeFunction {
        match self {
            EventKind::Deposit => BridgeFunction::Wrap,
            EventKind::Unwrap => BridgeFunction::Withdraw,
        }
    }
}

/// Counterpart contract calls issued by the warden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeFunction {
    Wrap,
    Withdraw,
}

impl BridgeFunction {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeFunction::Wrap => "wrap",
            BridgeFunction::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for BridgeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dedup key of a settled event: `{tx_hash hex, no 0x}:{log_index}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(String);

impl EventId {
    pub fn new(tx_hash: B256, log_index: u64) -> Self {
        Self(format!("{}:{}", hex::encode(tx_hash.as_slice()), log_index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A log decoded against its ABI event, with named arguments
#[derive(Debug, Clone, PartialEq)]
pub struct RawLog {
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_height: u64,
    /// (argument name, value), indexed arguments first; empty if decoding failed
    pub fields: Vec<(String, DynSolValue)>,
}

impl RawLog {
    pub fn event_id(&self) -> EventId {
        EventId::new(self.tx_hash, self.log_index)
    }

    pub fn field(&self, name: &str) -> Option<&DynSolValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Canonical bridge event after argument normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    pub kind: EventKind,
    pub event_id: EventId,
    pub token: Address,
    pub recipient: Address,
    pub amount: U256,
    pub block_height: u64,
    pub log_index: u64,
}

/// A counterpart call to make on the target chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub target: ChainRole,
    pub function: BridgeFunction,
    pub token: Address,
    pub recipient: Address,
    pub amount: U256,
    pub sender: Address,
}

impl TransactionIntent {
    pub fn for_event(event: &BridgeEvent, target: ChainRole, sender: Address) -> Self {
        Self {
            target,
            function: event.kind.counterpart(),
            token: event.token,
            recipient: event.recipient,
            amount: event.amount,
            sender,
        }
    }

    /// ABI arguments `(token, recipient, amount)`
    pub fn call_args(&self) -> Vec<DynSolValue> {
        vec![
            DynSolValue::Address(self.token),
            DynSolValue::Address(self.recipient),
            DynSolValue::Uint(self.amount, 256),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    ConfirmedSuccess,
    ConfirmedReverted,
    TimedOut,
    SubmitFailed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::ConfirmedSuccess => "confirmed_success",
            OutcomeStatus::ConfirmedReverted => "confirmed_reverted",
            OutcomeStatus::TimedOut => "timed_out",
            OutcomeStatus::SubmitFailed => "submit_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    /// Hash of the last broadcast, if any broadcast succeeded
    pub tx_hash: Option<B256>,
    pub status: OutcomeStatus,
    pub block_height: Option<u64>,
}

impl TransactionOutcome {
    pub fn success(tx_hash: B256, block_height: Option<u64>) -> Self {
        Self {
            tx_hash: Some(tx_hash),
            status: OutcomeStatus::ConfirmedSuccess,
            block_height,
        }
    }

    pub fn reverted(tx_hash: B256, block_height: Option<u64>) -> Self {
        Self {
            tx_hash: Some(tx_hash),
            status: OutcomeStatus::ConfirmedReverted,
            block_height,
        }
    }

    pub fn timed_out(tx_hash: B256) -> Self {
        Self {
            tx_hash: Some(tx_hash),
            status: OutcomeStatus::TimedOut,
            block_height: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::ConfirmedSuccess
    }
}
