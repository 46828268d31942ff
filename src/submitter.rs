//! Transaction submitter
//!
//! Builds, signs, broadcasts and confirms a single counterpart call on the
//! target chain. Every attempt reads a fresh nonce and gas price. A broadcast
//! rejected as underpriced or nonce-conflicting is re-signed once at the same
//! nonce with a bumped gas price before the attempt counts as failed.

use std::time::Duration;

use alloy::dyn_abi::JsonAbiExt;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Bytes, B256};
use alloy::rpc::types::TransactionRequest;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::evm::{ChainEndpoint, KeyProvider};
use crate::retry::{bump_gas_price, classify_error, Backoff, ErrorClass, RetryPolicy};
use crate::types::{OutcomeStatus, TransactionIntent, TransactionOutcome};

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitConfig {
    /// Generic retries after the first attempt
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub receipt_timeout: Duration,
    /// Gas limit used when estimation fails
    pub fallback_gas: u64,
    /// Added to the estimate (or the fallback)
    pub gas_buffer: u64,
    /// Gas price bump for the same-nonce re-sign
    pub gas_bump_percent: u32,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(180),
            fallback_gas: 300_000,
            gas_buffer: 20_000,
            gas_bump_percent: 20,
        }
    }
}

pub struct TransactionSubmitter<'a> {
    keys: &'a dyn KeyProvider,
    config: SubmitConfig,
    policy: RetryPolicy,
}

impl<'a> TransactionSubmitter<'a> {
    pub fn new(keys: &'a dyn KeyProvider, config: SubmitConfig) -> Self {
        let policy = RetryPolicy::new(
            config.max_retries.saturating_add(1),
            Backoff::Fixed(config.retry_delay),
        );
        Self {
            keys,
            config,
            policy,
        }
    }

    /// Submit `intent` on `endpoint` and wait for its receipt.
    ///
    /// Returns the confirmed outcome, or a timed-out outcome which is not
    /// retried (a fresh nonce could land the call twice). A reverted receipt
    /// is [`RelayError::TransactionReverted`]; running out of attempts is
    /// [`RelayError::SubmissionFailed`].
    pub async fn submit(
        &self,
        endpoint: &dyn ChainEndpoint,
        intent: &TransactionIntent,
    ) -> RelayResult<TransactionOutcome> {
        if intent.sender != self.keys.address() {
            return Err(RelayError::Configuration(format!(
                "intent sender {} does not match warden key {}",
                intent.sender,
                self.keys.address()
            )));
        }

        let function = endpoint.function(intent.function.name())?;
        let calldata: Bytes = function
            .abi_encode_input(&intent.call_args())
            .map_err(|e| {
                RelayError::Configuration(format!(
                    "cannot encode {} call for {} ABI: {}",
                    intent.function,
                    endpoint.role(),
                    e
                ))
            })?
            .into();

        let mut failures = 0u32;
        loop {
            let error = match self.attempt(endpoint, intent, &calldata).await {
                Ok(outcome) if outcome.status == OutcomeStatus::ConfirmedReverted => {
                    let tx_hash = outcome.tx_hash.unwrap_or(B256::ZERO);
                    warn!(
                        tx_hash = %tx_hash,
                        function = %intent.function,
                        "Transaction reverted, not retrying"
                    );
                    return Err(RelayError::TransactionReverted {
                        tx_hash,
                        block_height: outcome.block_height,
                    });
                }
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => e,
            };

            failures += 1;
            warn!(
                function = %intent.function,
                target = %intent.target,
                attempt = failures,
                max_attempts = self.policy.max_attempts,
                error = %error,
                "Submission attempt failed"
            );

            if !self.policy.should_retry(failures) {
                return Err(RelayError::SubmissionFailed {
                    attempts: failures,
                    cause: error.to_string(),
                });
            }
            sleep(self.policy.delay_for(failures)).await;
        }
    }

    async fn attempt(
        &self,
        endpoint: &dyn ChainEndpoint,
        intent: &TransactionIntent,
        calldata: &Bytes,
    ) -> RelayResult<TransactionOutcome> {
        let sender = intent.sender;

        let estimate = match endpoint.estimate_gas(sender, calldata.clone()).await {
            Ok(gas) => gas,
            Err(e) => {
                warn!(
                    function = %intent.function,
                    error = %e,
                    fallback = self.config.fallback_gas,
                    "Gas estimation failed, using fallback"
                );
                self.config.fallback_gas
            }
        };
        let gas_limit = estimate.saturating_add(self.config.gas_buffer);

        let nonce = endpoint.nonce_of(sender).await?;
        let gas_price = endpoint.gas_price().await?;
        let chain_id = endpoint.chain_id().await?;

        let tx = TransactionRequest::default()
            .with_from(sender)
            .with_to(endpoint.contract_address())
            .with_input(calldata.clone())
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_gas_price(gas_price)
            .with_chain_id(chain_id);

        debug!(
            function = %intent.function,
            nonce = nonce,
            gas_limit = gas_limit,
            gas_price = gas_price,
            "Broadcasting transaction"
        );

        let raw = self.keys.sign(tx.clone()).await?;
        let tx_hash = match endpoint.send_raw(raw).await {
            Ok(hash) => hash,
            Err(e) => match classify_error(&e.to_string()) {
                ErrorClass::Underpriced | ErrorClass::NonceTooLow => {
                    let bumped = bump_gas_price(gas_price, self.config.gas_bump_percent);
                    info!(
                        nonce = nonce,
                        gas_price = gas_price,
                        bumped_gas_price = bumped,
                        error = %e,
                        "Re-signing at the same nonce with a higher gas price"
                    );
                    let raw = self.keys.sign(tx.with_gas_price(bumped)).await?;
                    endpoint.send_raw(raw).await?
                }
                _ => return Err(e),
            },
        };

        info!(
            tx_hash = %tx_hash,
            function = %intent.function,
            target = %intent.target,
            nonce = nonce,
            "Transaction sent, waiting for receipt"
        );

        match endpoint
            .wait_for_receipt(tx_hash, self.config.receipt_timeout)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Already broadcast: never fall into a re-send
                warn!(tx_hash = %tx_hash, error = %e, "Receipt wait failed");
                Ok(TransactionOutcome::timed_out(tx_hash))
            }
        }
    }
}
