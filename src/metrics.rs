//! Prometheus metrics

use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

use crate::relay::RelayReport;
use crate::scanner::ScanOutcome;
use crate::types::{Direction, OutcomeStatus};

pub struct Metrics {
    /// Counterpart calls confirmed, by direction
    pub events_relayed_total: IntCounterVec,
    /// Events not submitted, by direction and reason
    pub events_skipped_total: IntCounterVec,
    /// Submission results, by direction and outcome status
    pub submissions_total: IntCounterVec,
    /// Completed scans, by chain and terminal state
    pub scans_total: IntCounterVec,
    pub scan_rpc_errors_total: IntCounterVec,
    pub scan_skipped_blocks_total: IntCounterVec,
    /// Persisted cursor, by chain
    pub cursor_height: IntGaugeVec,
    pub processed_events: IntGauge,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_relayed_total = IntCounterVec::new(
            Opts::new(
                "warden_events_relayed_total",
                "Bridge events settled on the counterpart chain",
            ),
            &["direction"],
        )
        .expect("constant metric name is valid");

        let events_skipped_total = IntCounterVec::new(
            Opts::new(
                "warden_events_skipped_total",
                "Bridge events not submitted (already processed or undecodable)",
            ),
            &["direction", "reason"],
        )
        .expect("constant metric name is valid");

        let submissions_total = IntCounterVec::new(
            Opts::new(
                "warden_submissions_total",
                "Counterpart transaction submissions by outcome",
            ),
            &["direction", "status"],
        )
        .expect("constant metric name is valid");

        let scans_total = IntCounterVec::new(
            Opts::new("warden_scans_total", "Log scans by terminal state"),
            &["chain", "state"],
        )
        .expect("constant metric name is valid");

        let scan_rpc_errors_total = IntCounterVec::new(
            Opts::new(
                "warden_scan_rpc_errors_total",
                "RPC errors absorbed while scanning",
            ),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let scan_skipped_blocks_total = IntCounterVec::new(
            Opts::new(
                "warden_scan_skipped_blocks_total",
                "Blocks skipped after failing single-block log queries",
            ),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let cursor_height = IntGaugeVec::new(
            Opts::new("warden_cursor_height", "Last persisted scan cursor"),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let processed_events = IntGauge::new(
            "warden_processed_events",
            "Event ids in the processed set",
        )
        .expect("constant metric name is valid");

        registry
            .register(Box::new(events_relayed_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(events_skipped_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(submissions_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(scans_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(scan_rpc_errors_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(scan_skipped_blocks_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(cursor_height.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(processed_events.clone()))
            .expect("metric registration must not be called twice");

        Self {
            events_relayed_total,
            events_skipped_total,
            submissions_total,
            scans_total,
            scan_rpc_errors_total,
            scan_skipped_blocks_total,
            cursor_height,
            processed_events,
            registry,
        }
    }

    pub fn record_scan(&self, outcome: &ScanOutcome) {
        let chain = outcome.role.as_str();
        self.scans_total
            .with_label_values(&[chain, outcome.state.as_str()])
            .inc();
        self.scan_rpc_errors_total
            .with_label_values(&[chain])
            .inc_by(outcome.errors as u64);
        self.scan_skipped_blocks_total
            .with_label_values(&[chain])
            .inc_by(outcome.skipped_blocks.len() as u64);
    }

    pub fn record_submission(&self, direction: Direction, status: OutcomeStatus) {
        let direction = direction.to_string();
        self.submissions_total
            .with_label_values(&[direction.as_str(), status.as_str()])
            .inc();
        if status == OutcomeStatus::ConfirmedSuccess {
            self.events_relayed_total
                .with_label_values(&[direction.as_str()])
                .inc();
        }
    }

    pub fn record_skip(&self, direction: Direction, reason: &str) {
        self.events_skipped_total
            .with_label_values(&[direction.to_string().as_str(), reason])
            .inc();
    }

    pub fn record_report(&self, report: &RelayReport, processed: usize) {
        if let Some(cursor) = report.committed_cursor {
            self.cursor_height
                .with_label_values(&[report.direction.origin().as_str()])
                .set(cursor as i64);
        }
        self.processed_events.set(processed as i64);
    }
}
