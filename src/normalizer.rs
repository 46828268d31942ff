//! Event normalizer
//!
//! Bridge contracts in the wild name their event arguments differently
//! (`token` vs `underlying`, `recipient` vs `to`, `amount` vs `value`). Each
//! canonical field has an ordered alias list; the first alias present wins.

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, U256};

use crate::error::{RelayError, RelayResult};
use crate::types::{BridgeEvent, EventKind, RawLog};

pub const TOKEN_ALIASES: &[&str] = &["token", "underlying", "underlying_token"];
pub const RECIPIENT_ALIASES: &[&str] = &["recipient", "to"];
pub const AMOUNT_ALIASES: &[&str] = &["amount", "value"];

/// Map a decoded log to the canonical bridge event
pub fn normalize(log: &RawLog, kind: EventKind) -> RelayResult<BridgeEvent> {
    let token = lookup(log, TOKEN_ALIASES).and_then(as_address);
    let recipient = lookup(log, RECIPIENT_ALIASES).and_then(as_address);
    let amount = lookup(log, AMOUNT_ALIASES).and_then(as_amount);

    match (token, recipient, amount) {
        (Some(token), Some(recipient), Some(amount)) => Ok(BridgeEvent {
            kind,
            event_id: log.event_id(),
            token,
            recipient,
            amount,
            block_height: log.block_height,
            log_index: log.log_index,
        }),
        _ => Err(RelayError::EventDecode {
            event_id: log.event_id().to_string(),
            fields: log.field_names(),
        }),
    }
}

fn lookup<'a>(log: &'a RawLog, aliases: &[&str]) -> Option<&'a DynSolValue> {
    aliases.iter().find_map(|alias| log.field(alias))
}

fn as_address(value: &DynSolValue) -> Option<Address> {
    match value {
        DynSolValue::Address(address) => Some(*address),
        // bytes32-padded account
        DynSolValue::FixedBytes(word, 32) if word[..12].iter().all(|b| *b == 0) => {
            Some(Address::from_slice(&word[12..]))
        }
        _ => None,
    }
}

fn as_amount(value: &DynSolValue) -> Option<U256> {
    match value {
        DynSolValue::Uint(amount, _) => Some(*amount),
        _ => None,
    }
}
