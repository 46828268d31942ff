//! Relay orchestrator
//!
//! One invocation drives one direction: scan the origin chain for its bridge
//! event, skip ids already settled, normalize, submit the counterpart call on
//! the target chain, and record the id only once the call is confirmed. The
//! cursor is committed last, held back before the first event whose call
//! timed out or could not be sent so that event is seen again on the next run.
//! A reverted call does not hold the cursor, and neither does an event that
//! has fallen more than the safety margin behind the scanned height.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::evm::{ChainEndpoint, KeyProvider};
use crate::metrics::Metrics;
use crate::normalizer::normalize;
use crate::scanner::{EventScanner, ScanConfig, ScanState};
use crate::state::StateStore;
use crate::submitter::{SubmitConfig, TransactionSubmitter};
use crate::types::{ChainRole, Direction, OutcomeStatus, TransactionIntent};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayConfig {
    pub scan: ScanConfig,
    pub submit: SubmitConfig,
    pub source_finality: u64,
    pub destination_finality: u64,
}

impl RelayConfig {
    /// Scanner settings for a chain, with its confirmation depth applied
    pub fn scan_for(&self, role: ChainRole) -> ScanConfig {
        let finality_blocks = match role {
            ChainRole::Source => self.source_finality,
            ChainRole::Destination => self.destination_finality,
        };
        ScanConfig {
            finality_blocks,
            ..self.scan.clone()
        }
    }
}

/// What one invocation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub direction: Direction,
    /// Matching logs returned by the scan
    pub scanned: usize,
    /// Counterpart calls confirmed and recorded
    pub relayed: usize,
    pub already_processed: usize,
    pub decode_failures: usize,
    /// Submissions that reverted, timed out or ran out of retries
    pub failed_submissions: usize,
    /// Unconfirmed events left behind the rescan window
    pub abandoned: usize,
    pub scan_state: ScanState,
    /// Cursor after the commit, if one was written
    pub committed_cursor: Option<u64>,
}

pub struct Relayer {
    source: Arc<dyn ChainEndpoint>,
    destination: Arc<dyn ChainEndpoint>,
    store: Arc<dyn StateStore>,
    keys: Arc<dyn KeyProvider>,
    metrics: Arc<Metrics>,
    config: RelayConfig,
}

impl Relayer {
    pub fn new(
        source: Arc<dyn ChainEndpoint>,
        destination: Arc<dyn ChainEndpoint>,
        store: Arc<dyn StateStore>,
        keys: Arc<dyn KeyProvider>,
        metrics: Arc<Metrics>,
        config: RelayConfig,
    ) -> RelayResult<Self> {
        for (endpoint, expected) in [
            (&source, ChainRole::Source),
            (&destination, ChainRole::Destination),
        ] {
            if endpoint.role() != expected {
                return Err(RelayError::Configuration(format!(
                    "{} endpoint configured in the {} slot",
                    endpoint.role(),
                    expected
                )));
            }
        }

        Ok(Self {
            source,
            destination,
            store,
            keys,
            metrics,
            config,
        })
    }

    fn endpoint(&self, role: ChainRole) -> &dyn ChainEndpoint {
        match role {
            ChainRole::Source => self.source.as_ref(),
            ChainRole::Destination => self.destination.as_ref(),
        }
    }

    /// Relay one direction and return the number of events settled
    pub async fn scan(&self, direction: Direction) -> RelayResult<usize> {
        self.relay(direction).await.map(|report| report.relayed)
    }

    /// Relay both directions concurrently
    pub async fn relay_all(&self) -> Vec<(Direction, RelayResult<RelayReport>)> {
        let (forward, backward) = tokio::join!(
            self.relay(Direction::SourceToDestination),
            self.relay(Direction::DestinationToSource)
        );
        vec![
            (Direction::SourceToDestination, forward),
            (Direction::DestinationToSource, backward),
        ]
    }

    pub async fn relay(&self, direction: Direction) -> RelayResult<RelayReport> {
        let origin = self.endpoint(direction.origin());
        let target = self.endpoint(direction.target());
        let kind = direction.event_kind();

        let event = origin.event(kind.event_name())?.clone();
        target.function(direction.counterpart().name())?;

        let scan_config = self.config.scan_for(direction.origin());
        let safety_margin = scan_config.safety_margin;
        let scanner = EventScanner::new(origin, self.store.as_ref(), scan_config);
        let submitter = TransactionSubmitter::new(self.keys.as_ref(), self.config.submit.clone());

        let outcome = scanner.scan(&event, &[]).await?;
        self.metrics.record_scan(&outcome);

        let mut report = RelayReport {
            direction,
            scanned: outcome.logs.len(),
            relayed: 0,
            already_processed: 0,
            decode_failures: 0,
            failed_submissions: 0,
            abandoned: 0,
            scan_state: outcome.state,
            committed_cursor: None,
        };
        // Highest height the cursor may move to
        let mut hold_back = u64::MAX;
        // Unconfirmed events below this height no longer hold the cursor
        let rescan_floor = outcome
            .last_completed
            .map_or(0, |height| height.saturating_sub(safety_margin));

        for log in &outcome.logs {
            let event_id = log.event_id();

            if self.store.is_processed(&event_id).await? {
                report.already_processed += 1;
                self.metrics.record_skip(direction, "already_processed");
                continue;
            }

            let bridge_event = match normalize(log, kind) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        direction = %direction,
                        event_id = %event_id,
                        block = log.block_height,
                        error = %e,
                        "Skipping undecodable event"
                    );
                    report.decode_failures += 1;
                    self.metrics.record_skip(direction, "decode_failed");
                    continue;
                }
            };

            let intent =
                TransactionIntent::for_event(&bridge_event, direction.target(), self.keys.address());

            info!(
                direction = %direction,
                event_id = %event_id,
                block = bridge_event.block_height,
                token = %intent.token,
                recipient = %intent.recipient,
                amount = %intent.amount,
                function = %intent.function,
                "Relaying event"
            );

            let status = match submitter.submit(target, &intent).await {
                Ok(tx) if tx.is_success() => {
                    self.store.mark_processed(&event_id).await?;
                    report.relayed += 1;
                    info!(
                        direction = %direction,
                        event_id = %event_id,
                        tx_hash = ?tx.tx_hash,
                        block = ?tx.block_height,
                        "Event relayed"
                    );
                    tx.status
                }
                Ok(tx) => {
                    warn!(
                        direction = %direction,
                        event_id = %event_id,
                        tx_hash = ?tx.tx_hash,
                        status = tx.status.as_str(),
                        "Relay not confirmed, leaving event unprocessed"
                    );
                    tx.status
                }
                Err(e) if e.is_fatal() => {
                    error!(direction = %direction, event_id = %event_id, error = %e, "Relay aborted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        direction = %direction,
                        event_id = %event_id,
                        error = %e,
                        "Relay failed, leaving event unprocessed"
                    );
                    match e {
                        RelayError::TransactionReverted { .. } => OutcomeStatus::ConfirmedReverted,
                        _ => OutcomeStatus::SubmitFailed,
                    }
                }
            };

            self.metrics.record_submission(direction, status);
            match status {
                OutcomeStatus::ConfirmedSuccess => {}
                OutcomeStatus::ConfirmedReverted => {
                    // Deterministic for the current chain state
                    report.failed_submissions += 1;
                }
                _ if bridge_event.block_height < rescan_floor => {
                    report.failed_submissions += 1;
                    report.abandoned += 1;
                    self.metrics.record_skip(direction, "abandoned");
                    error!(
                        direction = %direction,
                        event_id = %event_id,
                        block = bridge_event.block_height,
                        rescan_floor = rescan_floor,
                        "Event still unconfirmed past the rescan window, abandoning"
                    );
                }
                _ => {
                    report.failed_submissions += 1;
                    hold_back = hold_back.min(bridge_event.block_height.saturating_sub(1));
                }
            }
        }

        report.committed_cursor = scanner.commit(&outcome, hold_back).await?;

        let processed = self.store.processed_count().await?;
        self.metrics.record_report(&report, processed);

        info!(
            direction = %direction,
            scanned = report.scanned,
            relayed = report.relayed,
            already_processed = report.already_processed,
            decode_failures = report.decode_failures,
            failed = report.failed_submissions,
            abandoned = report.abandoned,
            scan_state = report.scan_state.as_str(),
            cursor = ?report.committed_cursor,
            "Relay pass finished"
        );

        Ok(report)
    }
}
