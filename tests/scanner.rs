//! Scanner behavior against an in-memory chain
//!
//! Run with: cargo test --test scanner

mod common;

use std::time::Duration;

use alloy::dyn_abi::DynSolValue;
use tokio::time::Instant;

use common::{addr, Harness};
use warden::evm::ChainEndpoint;
use warden::scanner::{AbortReason, ArgumentFilter, EventScanner, ScanConfig, ScanState};
use warden::types::ChainRole;

fn config(base_chunk: u64, max_errors: u32) -> ScanConfig {
    ScanConfig {
        base_chunk,
        max_errors,
        ..ScanConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_scan_collects_events_in_chain_order() {
    let h = Harness::new();
    h.source.set_head(100);
    h.set_cursor(ChainRole::Source, 40).await;
    h.source.emit_deposit(90, 0, addr(0xaa), addr(0xbb), 3);
    h.source.emit_deposit(41, 2, addr(0xaa), addr(0xbb), 1);
    h.source.emit_deposit(41, 1, addr(0xaa), addr(0xbb), 2);

    let event = h.source.event("Deposit").unwrap().clone();
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), config(25, 25));
    let outcome = scanner.scan(&event, &[]).await.unwrap();

    assert_eq!(outcome.state, ScanState::Success);
    assert_eq!(outcome.start, 41);
    assert_eq!(outcome.head, Some(100));
    assert_eq!(outcome.last_completed, Some(100));
    let positions: Vec<(u64, u64)> = outcome
        .logs
        .iter()
        .map(|l| (l.block_height, l.log_index))
        .collect();
    assert_eq!(positions, vec![(41, 1), (41, 2), (90, 0)]);
    assert_eq!(
        h.source.get_logs_calls(),
        vec![(41, 65), (66, 90), (91, 100)]
    );

    // Scan alone does not move the cursor
    assert_eq!(h.cursor(ChainRole::Source).await, 40);
    assert_eq!(scanner.commit(&outcome, u64::MAX).await.unwrap(), Some(100));
    assert_eq!(h.cursor(ChainRole::Source).await, 100);
}

#[tokio::test(start_paused = true)]
async fn test_first_run_starts_behind_head() {
    let h = Harness::new();
    h.source.set_head(1_000);

    let event = h.source.event("Deposit").unwrap().clone();
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), ScanConfig::default());
    let outcome = scanner.scan(&event, &[]).await.unwrap();

    assert_eq!(outcome.start, 801);
    assert_eq!(h.source.get_logs_calls(), vec![(801, 1_000)]);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_to_scan_leaves_cursor() {
    let h = Harness::new();
    h.source.set_head(70);
    h.set_cursor(ChainRole::Source, 70).await;

    let event = h.source.event("Deposit").unwrap().clone();
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), ScanConfig::default());
    let outcome = scanner.scan(&event, &[]).await.unwrap();

    assert_eq!(outcome.state, ScanState::Success);
    assert!(outcome.logs.is_empty());
    assert!(h.source.get_logs_calls().is_empty());
    assert_eq!(scanner.commit(&outcome, u64::MAX).await.unwrap(), None);
    assert_eq!(h.cursor(ChainRole::Source).await, 70);
}

#[tokio::test(start_paused = true)]
async fn test_finality_depth_caps_the_range() {
    let h = Harness::new();
    h.source.set_head(100);
    h.set_cursor(ChainRole::Source, 80).await;
    h.source.emit_deposit(95, 0, addr(0xaa), addr(0xbb), 1);

    let event = h.source.event("Deposit").unwrap().clone();
    let cfg = ScanConfig {
        finality_blocks: 10,
        ..ScanConfig::default()
    };
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), cfg);
    let outcome = scanner.scan(&event, &[]).await.unwrap();

    assert_eq!(outcome.head, Some(90));
    assert!(outcome.logs.is_empty());
    assert_eq!(h.source.get_logs_calls(), vec![(81, 90)]);

    // Cursor stops at the final height, not the chain head
    assert_eq!(scanner.commit(&outcome, u64::MAX).await.unwrap(), Some(90));
    assert_eq!(h.cursor(ChainRole::Source).await, 90);
}

#[tokio::test(start_paused = true)]
async fn test_chunk_convergence_to_single_blocks() {
    let h = Harness::new();
    h.source.set_head(50);
    h.set_cursor(ChainRole::Source, 40).await;
    for block in [41, 44, 47, 50] {
        h.source.emit_deposit(block, 0, addr(0xaa), addr(0xbb), block);
    }
    // Only single-block queries succeed
    h.source.fail_logs_when(|from, to| {
        (to > from).then(|| "query returned more than 10000 results".to_string())
    });

    let event = h.source.event("Deposit").unwrap().clone();
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), config(4, 100));
    let outcome = scanner.scan(&event, &[]).await.unwrap();

    assert_eq!(outcome.state, ScanState::Success);
    assert!(outcome.skipped_blocks.is_empty());
    assert_eq!(outcome.last_completed, Some(50));
    let blocks: Vec<u64> = outcome.logs.iter().map(|l| l.block_height).collect();
    assert_eq!(blocks, vec![41, 44, 47, 50]);
    assert!(outcome.errors > 0);
}

#[tokio::test(start_paused = true)]
async fn test_persistently_failing_block_is_skipped() {
    let h = Harness::new();
    h.source.set_head(50);
    h.set_cursor(ChainRole::Source, 40).await;
    h.source.emit_deposit(43, 0, addr(0xaa), addr(0xbb), 1);
    h.source.emit_deposit(48, 0, addr(0xaa), addr(0xbb), 2);
    h.source.fail_logs_when(|from, to| {
        (from <= 45 && 45 <= to).then(|| "header not found".to_string())
    });

    let event = h.source.event("Deposit").unwrap().clone();
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), config(10, 25));
    let outcome = scanner.scan(&event, &[]).await.unwrap();

    assert_eq!(outcome.state, ScanState::Success);
    assert_eq!(outcome.skipped_blocks, vec![45]);
    assert_eq!(outcome.logs.len(), 2);
    assert_eq!(outcome.last_completed, Some(50));
}

#[tokio::test(start_paused = true)]
async fn test_error_budget_returns_partial_progress() {
    let h = Harness::new();
    h.source.set_head(60);
    h.set_cursor(ChainRole::Source, 40).await;
    h.source.emit_deposit(42, 0, addr(0xaa), addr(0xbb), 1);
    h.source.emit_deposit(57, 0, addr(0xaa), addr(0xbb), 2);
    h.source
        .fail_logs_when(|_, to| (to >= 55).then(|| "internal error".to_string()));

    let event = h.source.event("Deposit").unwrap().clone();
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), config(5, 5));
    let outcome = scanner.scan(&event, &[]).await.unwrap();

    assert_eq!(outcome.state, ScanState::Aborted(AbortReason::ErrorBudget));
    assert_eq!(outcome.errors, 5);
    assert_eq!(outcome.last_completed, Some(54));
    assert_eq!(outcome.logs.len(), 1);

    assert_eq!(scanner.commit(&outcome, u64::MAX).await.unwrap(), Some(54));
    assert_eq!(h.cursor(ChainRole::Source).await, 54);
}

#[tokio::test(start_paused = true)]
async fn test_throttling_aborts_within_time_budget() {
    let h = Harness::new();
    h.source.set_head(500);
    h.set_cursor(ChainRole::Source, 100).await;
    h.source
        .fail_logs_when(|_, _| Some("HTTP error 429 with body: Too Many Requests".to_string()));

    let event = h.source.event("Deposit").unwrap().clone();
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), ScanConfig::default());

    let started = Instant::now();
    let outcome = scanner.scan(&event, &[]).await.unwrap();

    assert!(started.elapsed() <= Duration::from_secs(25));
    assert_eq!(outcome.state, ScanState::Aborted(AbortReason::TimeBudget));
    assert_eq!(outcome.last_completed, None);
    // Backoff 2s, 4s, 8s, then clamped to the remaining budget
    assert_eq!(h.source.get_logs_calls().len(), 4);

    assert_eq!(scanner.commit(&outcome, u64::MAX).await.unwrap(), None);
    assert_eq!(h.cursor(ChainRole::Source).await, 100);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_single_block_is_retried_not_skipped() {
    let h = Harness::new();
    h.source.set_head(500);
    h.set_cursor(ChainRole::Source, 100).await;
    h.source
        .fail_logs_when(|_, _| Some("HTTP error 429 with body: Too Many Requests".to_string()));

    let event = h.source.event("Deposit").unwrap().clone();
    let cfg = ScanConfig {
        base_chunk: 8,
        ..ScanConfig::default()
    };
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), cfg);
    let outcome = scanner.scan(&event, &[]).await.unwrap();

    assert_eq!(outcome.state, ScanState::Aborted(AbortReason::TimeBudget));
    assert!(outcome.skipped_blocks.is_empty());
    assert_eq!(outcome.last_completed, None);
    assert_eq!(
        h.source.get_logs_calls(),
        vec![(101, 108), (101, 104), (101, 102), (101, 101)]
    );

    assert_eq!(scanner.commit(&outcome, u64::MAX).await.unwrap(), None);
    assert_eq!(h.cursor(ChainRole::Source).await, 100);
}

#[tokio::test(start_paused = true)]
async fn test_throttling_without_time_cap_ends_on_error_budget() {
    let h = Harness::new();
    h.source.set_head(500);
    h.set_cursor(ChainRole::Source, 100).await;
    h.source
        .fail_logs_when(|_, _| Some("HTTP error 429 with body: Too Many Requests".to_string()));

    let event = h.source.event("Deposit").unwrap().clone();
    let cfg = ScanConfig {
        base_chunk: 8,
        max_duration: None,
        ..ScanConfig::default()
    };
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), cfg);
    let outcome = scanner.scan(&event, &[]).await.unwrap();

    assert_eq!(outcome.state, ScanState::Aborted(AbortReason::ErrorBudget));
    assert_eq!(outcome.errors, 25);
    assert!(outcome.skipped_blocks.is_empty());
    assert_eq!(outcome.last_completed, None);
    assert!(h
        .source
        .get_logs_calls()
        .iter()
        .all(|(from, _)| *from == 101));

    assert_eq!(scanner.commit(&outcome, u64::MAX).await.unwrap(), None);
    assert_eq!(h.cursor(ChainRole::Source).await, 100);
}

#[tokio::test(start_paused = true)]
async fn test_head_read_is_retried() {
    let h = Harness::new();
    h.source.set_head(45);
    h.set_cursor(ChainRole::Source, 40).await;
    h.source
        .state()
        .head_failures
        .extend(["connection reset by peer".to_string(), "rate limited".to_string()]);

    let event = h.source.event("Deposit").unwrap().clone();
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), ScanConfig::default());
    let outcome = scanner.scan(&event, &[]).await.unwrap();

    assert_eq!(outcome.state, ScanState::Success);
    assert_eq!(outcome.errors, 2);
    assert_eq!(outcome.last_completed, Some(45));
}

#[tokio::test(start_paused = true)]
async fn test_argument_filter_drops_other_tokens() {
    let h = Harness::new();
    h.source.set_head(60);
    h.set_cursor(ChainRole::Source, 50).await;
    h.source.emit_deposit(52, 0, addr(0xaa), addr(0xbb), 1);
    h.source.emit_deposit(53, 0, addr(0x01), addr(0xbb), 2);

    let event = h.source.event("Deposit").unwrap().clone();
    let scanner = EventScanner::new(h.source.as_ref(), h.store.as_ref(), ScanConfig::default());
    let filter = ArgumentFilter::new("token", DynSolValue::Address(addr(0xaa)));
    let outcome = scanner.scan(&event, &[filter]).await.unwrap();

    assert_eq!(outcome.logs.len(), 1);
    assert_eq!(outcome.logs[0].block_height, 52);
}
