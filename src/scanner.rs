//! Event scanner
//!
//! Walks a chain from the stored cursor to the head in chunked `eth_getLogs`
//! queries. Failed ranges are retried with a halved chunk; a single block that
//! still fails is skipped. Throttling errors back off exponentially and never
//! skip a block.
//! The scan stops early once the error or wall-clock budget is spent and
//! reports how far it actually got, so the cursor is never moved past a block
//! whose logs were not retrieved.

use std::time::Duration;

use alloy::dyn_abi::DynSolValue;
use alloy::json_abi::Event;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::evm::ChainEndpoint;
use crate::retry::{Backoff, RetryPolicy};
use crate::state::StateStore;
use crate::types::{ChainRole, RawLog};

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    /// Largest block span per log query
    pub base_chunk: u64,
    /// How far behind the head a first scan (no cursor) starts
    pub safety_margin: u64,
    /// Abort after this many RPC errors
    pub max_errors: u32,
    /// Abort after this much wall-clock time; `None` disables the cap
    pub max_duration: Option<Duration>,
    /// Time unit of the throttling backoff
    pub backoff_unit: Duration,
    /// Confirmation depth subtracted from the head
    pub finality_blocks: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base_chunk: 500,
            safety_margin: 200,
            max_errors: 25,
            max_duration: Some(Duration::from_secs(25)),
            backoff_unit: Duration::from_secs(1),
            finality_blocks: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    ErrorBudget,
    TimeBudget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Success,
    Aborted(AbortReason),
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Success => "success",
            ScanState::Aborted(AbortReason::ErrorBudget) => "aborted_errors",
            ScanState::Aborted(AbortReason::TimeBudget) => "aborted_time",
        }
    }
}

/// Only keep logs whose decoded argument `name` equals `value`
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentFilter {
    pub name: String,
    pub value: DynSolValue,
}

impl ArgumentFilter {
    pub fn new(name: impl Into<String>, value: DynSolValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn matches(&self, log: &RawLog) -> bool {
        log.field(&self.name) == Some(&self.value)
    }
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub role: ChainRole,
    /// Matching logs in (block, log index) order
    pub logs: Vec<RawLog>,
    pub state: ScanState,
    /// First height of the scanned range
    pub start: u64,
    /// Height scanned up to; `None` if the head could not be read
    pub head: Option<u64>,
    /// Highest height whose logs were retrieved or explicitly skipped
    pub last_completed: Option<u64>,
    pub skipped_blocks: Vec<u64>,
    pub errors: u32,
}

impl ScanOutcome {
    fn empty(role: ChainRole, state: ScanState, start: u64, head: Option<u64>, errors: u32) -> Self {
        Self {
            role,
            logs: Vec::new(),
            state,
            start,
            head,
            last_completed: None,
            skipped_blocks: Vec::new(),
            errors,
        }
    }
}

/// Scans one chain's contract for one event
pub struct EventScanner<'a> {
    endpoint: &'a dyn ChainEndpoint,
    store: &'a dyn StateStore,
    config: ScanConfig,
    policy: RetryPolicy,
}

impl<'a> EventScanner<'a> {
    pub fn new(endpoint: &'a dyn ChainEndpoint, store: &'a dyn StateStore, config: ScanConfig) -> Self {
        let policy = RetryPolicy::new(config.max_errors, Backoff::throttle(config.backoff_unit));
        Self {
            endpoint,
            store,
            config,
            policy,
        }
    }

    fn time_exhausted(&self, started: Instant) -> bool {
        self.config
            .max_duration
            .is_some_and(|max| started.elapsed() >= max)
    }

    /// Sleep, but never past the wall-clock budget
    async fn pause(&self, delay: Duration, started: Instant) {
        let delay = match self.config.max_duration {
            Some(max) => delay.min(max.saturating_sub(started.elapsed())),
            None => delay,
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    /// Read the head, retrying within the scan budgets
    async fn fetch_head(&self, started: Instant, errors: &mut u32) -> Result<u64, AbortReason> {
        loop {
            if self.time_exhausted(started) {
                return Err(AbortReason::TimeBudget);
            }
            match self.endpoint.head_height().await {
                Ok(head) => return Ok(head),
                Err(e) => {
                    *errors += 1;
                    warn!(
                        role = %self.endpoint.role(),
                        error = %e,
                        errors = *errors,
                        max_errors = self.config.max_errors,
                        "Failed to read head height"
                    );
                    if !self.policy.should_retry(*errors) {
                        return Err(AbortReason::ErrorBudget);
                    }
                    let delay = if e.is_throttled() {
                        self.policy.delay_for(*errors)
                    } else {
                        self.config.backoff_unit
                    };
                    self.pause(delay, started).await;
                }
            }
        }
    }

    /// Collect `event` logs from the cursor up to the head.
    ///
    /// Only cursor reads touch the store; [`EventScanner::commit`] writes it.
    pub async fn scan(&self, event: &Event, filters: &[ArgumentFilter]) -> RelayResult<ScanOutcome> {
        let role = self.endpoint.role();
        let started = Instant::now();
        let mut errors = 0u32;

        let cursor = self.store.load_cursor(role).await?;

        let chain_head = match self.fetch_head(started, &mut errors).await {
            Ok(head) => head,
            Err(reason) => {
                warn!(role = %role, errors = errors, "Scan aborted before reading the head");
                return Ok(ScanOutcome::empty(
                    role,
                    ScanState::Aborted(reason),
                    cursor + 1,
                    None,
                    errors,
                ));
            }
        };
        let head = chain_head.saturating_sub(self.config.finality_blocks);

        let start = if cursor == 0 {
            head.saturating_sub(self.config.safety_margin) + 1
        } else {
            cursor + 1
        };

        if start > head {
            debug!(role = %role, start = start, head = head, "Nothing new to scan");
            return Ok(ScanOutcome::empty(
                role,
                ScanState::Success,
                start,
                Some(head),
                errors,
            ));
        }

        info!(
            role = %role,
            event = %event.name,
            from = start,
            to = head,
            "Scanning for events"
        );

        let base_chunk = self.config.base_chunk.max(1);
        let mut chunk = base_chunk;
        let mut cur = start;
        let mut logs = Vec::new();
        let mut skipped_blocks = Vec::new();
        let mut state = ScanState::Success;

        while cur <= head {
            if self.time_exhausted(started) {
                state = ScanState::Aborted(AbortReason::TimeBudget);
                break;
            }

            let hi = head.min(cur.saturating_add(chunk - 1));
            debug!(role = %role, from = cur, to = hi, chunk = chunk, "Querying logs");

            match self.endpoint.get_logs(cur, hi, event).await {
                Ok(entries) => {
                    logs.extend(
                        entries
                            .into_iter()
                            .filter(|log| filters.iter().all(|f| f.matches(log))),
                    );
                    if chunk < base_chunk {
                        chunk = base_chunk.min(chunk * 2);
                        debug!(role = %role, chunk = chunk, "Chunk grown");
                    }
                    cur = hi + 1;
                }
                Err(e) => {
                    errors += 1;
                    warn!(
                        role = %role,
                        from = cur,
                        to = hi,
                        error = %e,
                        errors = errors,
                        max_errors = self.config.max_errors,
                        "Log query failed"
                    );

                    if !self.policy.should_retry(errors) {
                        state = ScanState::Aborted(AbortReason::ErrorBudget);
                        break;
                    }

                    let throttled = e.is_throttled();
                    if throttled {
                        self.pause(self.policy.delay_for(errors), started).await;
                        if self.time_exhausted(started) {
                            state = ScanState::Aborted(AbortReason::TimeBudget);
                            break;
                        }
                    }

                    if chunk > 1 {
                        chunk = (chunk / 2).max(1);
                        debug!(role = %role, chunk = chunk, "Chunk shrunk");
                    } else if throttled {
                        // Rate limiting says nothing about the block itself
                        debug!(role = %role, block = cur, "Retrying throttled block");
                    } else {
                        warn!(role = %role, block = cur, "Skipping block after repeated failures");
                        skipped_blocks.push(cur);
                        cur += 1;
                    }
                }
            }
        }

        let last_completed = (cur > start).then(|| cur - 1);
        logs.sort_by_key(|log| (log.block_height, log.log_index));

        match state {
            ScanState::Success => info!(
                role = %role,
                from = start,
                to = head,
                events = logs.len(),
                errors = errors,
                skipped = skipped_blocks.len(),
                "Scan complete"
            ),
            ScanState::Aborted(reason) => warn!(
                role = %role,
                from = start,
                reached = ?last_completed,
                head = head,
                events = logs.len(),
                errors = errors,
                reason = ?reason,
                "Scan aborted, returning partial results"
            ),
        }

        Ok(ScanOutcome {
            role,
            logs,
            state,
            start,
            head: Some(head),
            last_completed,
            skipped_blocks,
            errors,
        })
    }

    /// Persist the cursor at `min(height, last completed)`.
    ///
    /// A scan that completed nothing leaves the cursor untouched. Returns the
    /// stored cursor when a write was made.
    pub async fn commit(&self, outcome: &ScanOutcome, height: u64) -> RelayResult<Option<u64>> {
        let Some(last_completed) = outcome.last_completed else {
            return Ok(None);
        };
        if outcome.role != self.endpoint.role() {
            return Err(RelayError::Configuration(format!(
                "cannot commit a {} scan through the {} endpoint",
                outcome.role,
                self.endpoint.role()
            )));
        }

        let target = height.min(last_completed);
        if target == 0 {
            return Ok(None);
        }
        let stored = self.store.save_cursor(outcome.role, target).await?;
        Ok(Some(stored))
    }
}
