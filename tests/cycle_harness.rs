//! Scheduler test harness
//!
//! Drives the full cycle against mocked wallet, execution and token ledger
//! services: single-flight gating, failure accounting, the circuit breaker,
//! timeouts and the periodic ticker.


use chrono::{TimeZone, Utc};
use mock_services::{FailingTokenLedger, HarnessBuilder, SwapMode};
use rebalance_runner::{
    amount::{BASE_MINT, QUOTE_MINT},
    config::AuxPairConfig,
    risk::CIRCUIT_OPEN_MESSAGE,
    CycleError, CycleOutcome, NotifyLevel, RejectionGate, RiskSettingsPatch, SwapDirection,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const COOLDOWN_MS: i64 = 300_000;

#[tokio::test]
async fn test_concurrent_cycles_run_single_flight() {
    let h = HarnessBuilder::new().with_balances(1.0, 0.0).build();
    h.execution.set_mode(SwapMode::Block);

    let runner = h.runner.clone();
    let first = tokio::spawn(async move { runner.run_cycle().await });

    // First cycle is now parked inside execute_swap
    h.execution.entered.notified().await;

    let second = assert_ok!(h.runner.run_cycle().await);
    assert_eq!(second.outcome, CycleOutcome::Busy);
    assert!(second.status.cycle_in_progress);
    assert_eq!(second.status.cycles, 0);

    let manual = assert_ok!(h.runner.execute_manual_trade(0.1).await);
    assert_eq!(manual.outcome, CycleOutcome::Busy);

    h.execution.release.notify_one();
    let first = assert_ok!(first.await.unwrap());
    assert!(matches!(first.outcome, CycleOutcome::Executed { .. }));

    assert_eq!(h.wallet.calls(), 1);
    assert_eq!(h.execution.requests().len(), 1);
    assert_eq!(first.status.cycles, 1);
    assert!(!h.runner.status().cycle_in_progress);
}

#[tokio::test]
async fn test_consecutive_failures_open_circuit_breaker() {
    let h = HarnessBuilder::new()
        .with_balances(1.0, 0.0)
        .with_config(|c| c.governor.risk_score_threshold = 100.0)
        .build();
    h.execution.set_mode(SwapMode::Fail("route not found".to_string()));

    for attempt in 1..=3u32 {
        let err = assert_err!(h.runner.run_cycle().await);
        assert_eq!(err, CycleError::ExecutionFailed("route not found".to_string()));

        let status = h.runner.status();
        assert_eq!(status.failures, attempt as u64);
        assert_eq!(status.risk.runtime.consecutive_failures, attempt);
        assert_eq!(status.last_action, "Execution failed");
        h.clock.advance_ms(COOLDOWN_MS);
    }

    let status = h.runner.status();
    assert!(status.risk.runtime.circuit_breaker_open);
    assert_eq!(status.risk.runtime.last_error.as_deref(), Some("route not found"));
    assert_eq!(status.swap_stats.consecutive_swap_failures, 3);
    assert_eq!(status.swap_stats.daily_swap_count, 0);

    let report = assert_ok!(h.runner.run_cycle().await);
    assert_eq!(
        report.outcome,
        CycleOutcome::Rejected {
            gate: RejectionGate::RiskLedger,
            reason: CIRCUIT_OPEN_MESSAGE.to_string(),
        }
    );
    assert_eq!(h.execution.requests().len(), 3);
    assert!(h.sink.has(NotifyLevel::Error, "route not found"));

    let risk = h.runner.reset_circuit_breaker();
    assert!(!risk.runtime.circuit_breaker_open);
    assert_eq!(risk.runtime.consecutive_failures, 0);
    assert!(risk.runtime.last_error.is_none());

    h.execution.set_mode(SwapMode::Succeed { slippage_bps: 10 });
    h.clock.advance_ms(COOLDOWN_MS);
    let report = assert_ok!(h.runner.run_cycle().await);
    assert!(matches!(report.outcome, CycleOutcome::Executed { .. }));
    assert_eq!(report.status.cycles, 5);
    assert_eq!(report.status.swap_stats.consecutive_swap_failures, 0);
}

#[tokio::test]
async fn test_execution_timeout_counts_as_failure() {
    let h = HarnessBuilder::new()
        .with_balances(1.0, 0.0)
        .with_config(|c| c.agent.execution_timeout_ms = 50)
        .build();
    h.execution.set_mode(SwapMode::Hang);

    let err = assert_err!(h.runner.run_cycle().await);
    assert_eq!(
        err,
        CycleError::ExecutionFailed("Execution timed out after 50 ms".to_string())
    );

    let status = h.runner.status();
    assert!(!status.cycle_in_progress);
    assert_eq!(status.cycles, 1);
    assert_eq!(status.failures, 1);
    assert_eq!(status.swap_stats.failed_swaps, 1);
    assert_eq!(status.risk.runtime.consecutive_failures, 1);
}

#[tokio::test]
async fn test_daily_limit_resets_on_new_day() {
    let h = HarnessBuilder::new()
        .with_balances(1.0, 0.0)
        .with_config(|c| c.strategy.max_daily_swaps = 1)
        .build();

    let report = assert_ok!(h.runner.run_cycle().await);
    assert!(matches!(report.outcome, CycleOutcome::Executed { .. }));

    h.clock.advance_ms(COOLDOWN_MS);
    let report = assert_ok!(h.runner.run_cycle().await);
    assert_eq!(
        report.outcome,
        CycleOutcome::Hold {
            reason: "Daily swap count limit reached.".to_string()
        }
    );

    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 11, 0, 5, 0).unwrap());
    let report = assert_ok!(h.runner.run_cycle().await);
    assert!(matches!(report.outcome, CycleOutcome::Executed { .. }));
    assert_eq!(report.status.swap_stats.daily_swap_count, 1);
    assert_eq!(
        report.status.swap_stats.daily_key,
        chrono::NaiveDate::from_ymd_opt(2026, 3, 11).unwrap()
    );
    assert_eq!(report.status.swap_stats.successful_swaps, 2);
}

#[tokio::test]
async fn test_balanced_portfolio_holds_without_swapping() {
    let h = HarnessBuilder::new().with_balances(0.55, 45.0).build();

    for _ in 0..2 {
        let report = assert_ok!(h.runner.run_cycle().await);
        assert_eq!(
            report.outcome,
            CycleOutcome::Hold {
                reason: "Portfolio allocation is within target drift threshold.".to_string()
            }
        );
    }

    let status = h.runner.status();
    assert_eq!(status.cycles, 2);
    assert_eq!(status.failures, 0);
    assert_eq!(
        status.last_action,
        "HOLD: Portfolio allocation is within target drift threshold."
    );
    assert!(status.last_signature.is_none());
    assert!(h.execution.requests().is_empty());
    assert!(!status.economy.initialized);
}

#[tokio::test]
async fn test_quote_heavy_portfolio_buys_base() {
    let h = HarnessBuilder::new()
        .with_balances(3.0, 1000.0)
        .with_config(|c| c.risk.max_trade_size_base = 5.0)
        .build();

    // 300 of 1300 in base: drift -0.319, capped at max_swap_pct 0.25
    let report = assert_ok!(h.runner.run_cycle().await);
    match &report.outcome {
        CycleOutcome::Executed {
            direction,
            amount_base,
            notional,
            ..
        } => {
            assert_eq!(*direction, SwapDirection::QuoteToBase);
            assert_eq!(*amount_base, 2.5);
            assert_eq!(*notional, 250.0);
        }
        other => panic!("expected execution, got {:?}", other),
    }

    let requests = h.execution.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].input_mint, QUOTE_MINT);
    assert_eq!(requests[0].output_mint, BASE_MINT);
    // 250 quote at 6 decimals
    assert_eq!(requests[0].amount_raw, 250_000_000);
    assert_eq!(report.status.last_intent.unwrap().amount_pct, 0.25);
}

#[tokio::test]
async fn test_aux_pair_drift_swaps_between_aux_tokens() {
    let h = HarnessBuilder::new()
        .with_balances(0.55, 45.0)
        .with_config(|c| {
            c.agent.aux_pair = Some(AuxPairConfig {
                one_mint: "AUX1".to_string(),
                two_mint: "AUX2".to_string(),
                decimals: 6,
            })
        })
        .build();
    h.wallet.set_tokens(&[("AUX1", 90.0), ("AUX2", 10.0)]);

    // Main pair is on target; aux drift 0.8 * 0.75 is capped at 0.25
    let report = assert_ok!(h.runner.run_cycle().await);
    match &report.outcome {
        CycleOutcome::Executed {
            direction,
            amount_base,
            ..
        } => {
            assert_eq!(*direction, SwapDirection::AuxPair);
            assert_eq!(*amount_base, 0.0);
        }
        other => panic!("expected execution, got {:?}", other),
    }

    let requests = h.execution.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].input_mint, "AUX1");
    assert_eq!(requests[0].output_mint, "AUX2");
    // 22.5 AUX1 at 6 decimals
    assert_eq!(requests[0].amount_raw, 22_500_000);
    assert_eq!(
        report.status.last_intent.unwrap().reason,
        "Aux pair allocation drift exceeded threshold."
    );
}

#[tokio::test]
async fn test_governor_rejects_high_risk_score() {
    let h = HarnessBuilder::new().with_balances(1.0, 0.0).build();

    let patch = RiskSettingsPatch {
        max_slippage_bps: Some(400),
        ..Default::default()
    };
    assert_ok!(h.runner.update_risk_settings(&patch));

    let report = assert_ok!(h.runner.run_cycle().await);
    assert_eq!(
        report.outcome,
        CycleOutcome::Rejected {
            gate: RejectionGate::Governor,
            reason: "Risk score 80.00 exceeds threshold 70.".to_string(),
        }
    );
    assert_eq!(report.status.rejections, 1);
    assert_eq!(report.status.failures, 0);
    assert!(h.execution.requests().is_empty());
    assert!(h.sink.has(NotifyLevel::Warn, "Swap rejected by governor"));
}

#[tokio::test]
async fn test_manual_trades_respect_rate_limit() {
    let h = HarnessBuilder::new().build();

    let report = assert_ok!(h.runner.execute_manual_trade(0.4).await);
    assert!(matches!(report.outcome, CycleOutcome::Executed { .. }));

    let request = &h.execution.requests()[0];
    assert_eq!(request.amount_raw, 400_000_000);
    assert_eq!(request.wallet_id, "trader");

    let report = assert_ok!(h.runner.execute_manual_trade(0.4).await);
    assert_eq!(
        report.outcome,
        CycleOutcome::Rejected {
            gate: RejectionGate::RiskLedger,
            reason: "Rate limit active: wait 10s".to_string(),
        }
    );

    h.clock.advance_ms(4_500);
    let report = assert_ok!(h.runner.execute_manual_trade(0.4).await);
    assert_eq!(
        report.outcome,
        CycleOutcome::Rejected {
            gate: RejectionGate::RiskLedger,
            reason: "Rate limit active: wait 6s".to_string(),
        }
    );
    assert_eq!(h.execution.requests().len(), 1);
}

#[tokio::test]
async fn test_manual_trade_over_cap_is_rejected() {
    let h = HarnessBuilder::new().build();

    let report = assert_ok!(h.runner.execute_manual_trade(0.75).await);
    assert_eq!(
        report.outcome,
        CycleOutcome::Rejected {
            gate: RejectionGate::RiskLedger,
            reason: "Trade size 0.75 base exceeds max_trade_size_base 0.5".to_string(),
        }
    );
}

#[tokio::test]
async fn test_snapshot_failure_is_not_a_completed_cycle() {
    let h = HarnessBuilder::new().build();
    h.wallet.set_failing(true);

    let err = assert_err!(h.runner.run_cycle().await);
    assert!(matches!(err, CycleError::Snapshot(_)));

    let status = h.runner.status();
    assert_eq!(status.cycles, 0);
    assert_eq!(status.failures, 0);
    assert_eq!(status.last_action, "Snapshot failed");
    assert!(status.last_intent.is_none());
    assert!(!status.cycle_in_progress);

    h.wallet.set_failing(false);
    h.wallet.set_balances(0.55, 45.0);
    let report = assert_ok!(h.runner.run_cycle().await);
    assert!(matches!(report.outcome, CycleOutcome::Hold { .. }));
}

#[tokio::test]
async fn test_economy_failure_does_not_fail_cycle() {
    let h = HarnessBuilder::new()
        .with_balances(1.0, 0.0)
        .with_token_ledger(Arc::new(FailingTokenLedger))
        .build();

    let report = assert_ok!(h.runner.run_cycle().await);
    assert!(matches!(report.outcome, CycleOutcome::Executed { .. }));
    assert_eq!(report.status.failures, 0);
    assert!(!report.status.economy.initialized);
    assert!(!report.status.risk.runtime.circuit_breaker_open);
    assert!(h.sink.has(NotifyLevel::Warn, "Economy trade outcome failed"));
}

#[tokio::test]
async fn test_risk_settings_update_is_all_or_nothing() {
    let h = HarnessBuilder::new().build();

    let bad = RiskSettingsPatch {
        max_trade_size_base: Some(2.0),
        max_consecutive_failures: Some(0),
        ..Default::default()
    };
    assert_err!(h.runner.update_risk_settings(&bad));
    let settings = h.runner.status().risk.settings;
    assert_eq!(settings.max_trade_size_base, 0.5);
    assert_eq!(settings.max_consecutive_failures, 3);

    let good = RiskSettingsPatch {
        max_trade_size_base: Some(2.0),
        min_interval_ms: Some(1_000),
        ..Default::default()
    };
    let status = assert_ok!(h.runner.update_risk_settings(&good));
    assert_eq!(status.settings.max_trade_size_base, 2.0);
    assert_eq!(status.settings.min_interval_ms, 1_000);
    assert_eq!(status.settings.max_slippage_bps, 100);
    assert!(h.sink.has(NotifyLevel::Info, "Risk settings updated"));
}

#[tokio::test]
async fn test_ticker_runs_until_paused() {
    let h = HarnessBuilder::new().with_balances(0.55, 45.0).build();

    let status = h.runner.start(Some(20));
    assert!(status.running);
    assert_eq!(status.interval_ms, 20);

    // A second start keeps the existing ticker
    let again = h.runner.start(Some(5_000));
    assert_eq!(again.interval_ms, 20);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let status = h.runner.pause();
    assert!(!status.running);
    assert!(status.cycles >= 2, "expected several ticks, got {}", status.cycles);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let settled = h.runner.status().cycles;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.runner.status().cycles, settled);
    assert!(h.execution.requests().is_empty());
}
