// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! End-to-end upgrade scenarios against the mock seams.

use assert_matches::assert_matches;
use cf_test_utils::{MockChain, MockSwitcher};
use cf_types::{
    ExecutionMode, ForgeError, HeightBuffer, UpgradeEvent, UpgradePlan, UpgradeStage,
    UpgradeTarget,
};
use cf_upgrade::{UpgradeConfig, UpgradeOrchestrator};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn fast_config() -> UpgradeConfig {
    UpgradeConfig {
        poll_interval: Duration::from_millis(10),
        block_time_sample: Duration::from_millis(50),
        vote_deadline_slack: Duration::from_millis(300),
        resume_timeout: Duration::from_secs(5),
    }
}

fn plan() -> UpgradePlan {
    UpgradePlan {
        name: "v2.0.0-upgrade".into(),
        target: UpgradeTarget::CacheRef("v2.0.0".into()),
        version: "v2.0.0".into(),
        mode: None,
        voting_period: Some(Duration::from_millis(500)),
        height_buffer: HeightBuffer::Blocks(3),
        export_genesis: false,
    }
}

#[tokio::test]
async fn happy_path_walks_all_six_stages() {
    let chain = MockChain::new(2, 100);
    let switcher = MockSwitcher::new(2);
    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = UpgradeOrchestrator::new(
        chain.clone(),
        chain.clone(),
        switcher.clone(),
        plan(),
        fast_config(),
        CancellationToken::new(),
        tx,
    );

    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });

    let summary = orchestrator.run().await.expect("upgrade should complete");
    let events = collector.await.unwrap();

    assert_eq!(summary.new_version, "v2.0.0");
    assert!(summary.post_upgrade_height > summary.upgrade_height);
    assert_eq!(chain.vote_count(summary.proposal_id), 2);

    // strict stage order over the event stream
    let stages: Vec<UpgradeStage> = events.iter().map(|e| e.stage()).collect();
    let order = [
        UpgradeStage::Verifying,
        UpgradeStage::Submitting,
        UpgradeStage::Voting,
        UpgradeStage::Waiting,
        UpgradeStage::Switching,
        UpgradeStage::VerifyingResume,
        UpgradeStage::Completed,
    ];
    let mut cursor = 0;
    for stage in stages {
        while cursor < order.len() && order[cursor] != stage {
            cursor += 1;
        }
        assert!(cursor < order.len(), "stage {stage} out of order");
    }
    assert!(matches!(events.last(), Some(UpgradeEvent::Completed(_))));

    // both nodes restarted in index order, install happened exactly once
    assert_eq!(switcher.stops(), vec![0, 1]);
    assert_eq!(switcher.starts(), vec![0, 1]);
    assert_eq!(switcher.installs(), 1);
    assert_eq!(switcher.finalized(), Some(("v2.0.0".to_string(), None)));
}

#[tokio::test]
async fn single_validator_upgrade_passes_with_one_vote() {
    let chain = MockChain::new(1, 10);
    let switcher = MockSwitcher::new(1);
    let (tx, _rx) = mpsc::channel(64);
    let orchestrator = UpgradeOrchestrator::new(
        chain.clone(),
        chain.clone(),
        switcher.clone(),
        plan(),
        fast_config(),
        CancellationToken::new(),
        tx,
    );

    let summary = orchestrator.run().await.expect("single vote should pass");
    assert_eq!(chain.vote_count(summary.proposal_id), 1);
    assert_eq!(switcher.starts(), vec![0]);
}

#[tokio::test]
async fn unreachable_node_refuses_at_verifying() {
    let chain = MockChain::new(3, 10);
    chain.set_unreachable(1);
    let switcher = MockSwitcher::new(3);
    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = UpgradeOrchestrator::new(
        chain.clone(),
        chain,
        switcher.clone(),
        plan(),
        fast_config(),
        CancellationToken::new(),
        tx,
    );

    let err = orchestrator.run().await.unwrap_err();
    assert_matches!(err, ForgeError::ExternalUnavailable { .. });
    // nothing was stopped or swapped
    assert!(switcher.stops().is_empty());
    assert_eq!(switcher.installs(), 0);

    let mut terminal = None;
    while let Some(event) = rx.recv().await {
        terminal = Some(event);
    }
    assert_matches!(
        terminal,
        Some(UpgradeEvent::Failed { stage: UpgradeStage::Verifying, .. })
    );
}

#[tokio::test]
async fn zero_voting_period_is_refused_before_submission() {
    let chain = MockChain::new(2, 10);
    let switcher = MockSwitcher::new(2);
    let mut zero_plan = plan();
    zero_plan.voting_period = Some(Duration::ZERO);
    let (tx, _rx) = mpsc::channel(64);
    let orchestrator = UpgradeOrchestrator::new(
        chain.clone(),
        chain,
        switcher,
        zero_plan,
        fast_config(),
        CancellationToken::new(),
        tx,
    );

    let err = orchestrator.run().await.unwrap_err();
    assert_matches!(err, ForgeError::PreconditionFailed { .. });
}

#[tokio::test]
async fn rejected_submission_is_fatal_without_retry() {
    let chain = MockChain::new(2, 10);
    chain.reject_next_submission();
    let switcher = MockSwitcher::new(2);
    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = UpgradeOrchestrator::new(
        chain.clone(),
        chain,
        switcher,
        plan(),
        fast_config(),
        CancellationToken::new(),
        tx,
    );

    let err = orchestrator.run().await.unwrap_err();
    assert_matches!(err, ForgeError::ChainRejected { .. });

    let mut terminal = None;
    while let Some(event) = rx.recv().await {
        terminal = Some(event);
    }
    match terminal {
        Some(UpgradeEvent::Failed { stage, hint, .. }) => {
            assert_eq!(stage, UpgradeStage::Submitting);
            assert!(hint.unwrap().contains("gov module"));
        }
        other => panic!("expected a failed event, got {other:?}"),
    }
}

#[tokio::test]
async fn repeated_votes_stay_one_per_validator() {
    let chain = MockChain::new(3, 10);
    // validator 1 voted in an earlier, interrupted run
    chain.mark_already_voted(1);
    let switcher = MockSwitcher::new(3);
    let (tx, _rx) = mpsc::channel(64);
    let orchestrator = UpgradeOrchestrator::new(
        chain.clone(),
        chain.clone(),
        switcher,
        plan(),
        fast_config(),
        CancellationToken::new(),
        tx,
    );

    let summary = orchestrator.run().await.expect("already-voted is success");
    assert_eq!(chain.vote_count(summary.proposal_id), 3);
}

#[tokio::test]
async fn cancellation_during_waiting_leaves_binaries_alone() {
    let chain = MockChain::new(2, 10);
    let switcher = MockSwitcher::new(2);
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(256);
    let orchestrator = UpgradeOrchestrator::new(
        chain.clone(),
        chain.clone(),
        switcher.clone(),
        plan(),
        fast_config(),
        cancel.clone(),
        tx,
    );

    let handle = tokio::spawn(orchestrator.run());

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        if matches!(event, UpgradeEvent::Waiting { .. }) {
            // operator hits Ctrl-C mid-wait
            cancel.cancel();
        }
        events.push(event);
    }
    let err = handle.await.unwrap().unwrap_err();
    assert_matches!(err, ForgeError::Cancelled);
    assert_eq!(err.exit_code(), 130);

    // the chain is on its own now; the warning says so
    match events.last() {
        Some(UpgradeEvent::Failed { stage: UpgradeStage::Waiting, hint, .. }) => {
            assert!(hint.as_deref().unwrap().contains("no longer supervising"));
        }
        other => panic!("expected failure in waiting, got {other:?}"),
    }

    // no node was stopped and no binary swapped
    assert!(switcher.stops().is_empty());
    assert!(switcher.starts().is_empty());
    assert_eq!(switcher.installs(), 0);
    assert!(switcher.finalized().is_none());
}

#[tokio::test]
async fn partial_switch_failure_reports_up_and_down_nodes() {
    let chain = MockChain::new(3, 10);
    let switcher = MockSwitcher::new(3);
    // node 1 recovers on its single retry; node 2 never comes back
    switcher.fail_start(1, 1);
    switcher.fail_start(2, 2);
    let (tx, mut rx) = mpsc::channel(256);
    let orchestrator = UpgradeOrchestrator::new(
        chain.clone(),
        chain,
        switcher.clone(),
        plan(),
        fast_config(),
        CancellationToken::new(),
        tx,
    );

    let err = orchestrator.run().await.unwrap_err();
    match &err {
        ForgeError::PartialFailure { succeeded, failed, detail } => {
            assert_eq!(succeeded, &vec![0, 1]);
            assert_eq!(failed, &vec![2]);
            assert!(detail.contains("log tail"));
            assert!(detail.contains("panic"));
        }
        other => panic!("expected partial failure, got {other}"),
    }
    assert_eq!(switcher.starts(), vec![0, 1]);
    // metadata untouched on partial failure
    assert!(switcher.finalized().is_none());

    let mut terminal = None;
    while let Some(event) = rx.recv().await {
        terminal = Some(event);
    }
    assert_matches!(
        terminal,
        Some(UpgradeEvent::Failed { stage: UpgradeStage::Switching, .. })
    );
}

#[tokio::test]
async fn stalled_chain_after_switch_times_out_but_keeps_exports() {
    let chain = MockChain::new(1, 10);
    let switcher = MockSwitcher::new(1);
    let mut exporting_plan = plan();
    exporting_plan.export_genesis = true;

    // the "new binary" never produces a block: production stalls the
    // moment the target is installed, so resume verification can never
    // observe a height past the target
    switcher.halt_chain_on_install(chain.clone());
    let (tx, _rx) = mpsc::channel(256);
    let config = UpgradeConfig { resume_timeout: Duration::from_millis(300), ..fast_config() };
    let orchestrator = UpgradeOrchestrator::new(
        chain.clone(),
        chain.clone(),
        switcher.clone(),
        exporting_plan,
        config,
        CancellationToken::new(),
        tx,
    );

    let err = orchestrator.run().await.unwrap_err();
    assert_matches!(err, ForgeError::Timeout { .. });

    // the pre export happened and survives the failure
    assert_eq!(switcher.exports(), vec!["pre".to_string()]);
    assert!(switcher.finalized().is_none());
}

#[tokio::test]
async fn mode_change_is_persisted_only_on_success() {
    let chain = MockChain::new(2, 10);
    let switcher = MockSwitcher::new(2);
    let mut mode_plan = plan();
    mode_plan.target = UpgradeTarget::Image("ghcr.io/telcoin/demod:v2.0.0".into());
    mode_plan.mode = Some(ExecutionMode::Container);
    let (tx, _rx) = mpsc::channel(64);
    let orchestrator = UpgradeOrchestrator::new(
        chain.clone(),
        chain,
        switcher.clone(),
        mode_plan,
        fast_config(),
        CancellationToken::new(),
        tx,
    );

    orchestrator.run().await.expect("mode-changing upgrade completes");
    assert_eq!(
        switcher.finalized(),
        Some(("v2.0.0".to_string(), Some(ExecutionMode::Container)))
    );
}

#[tokio::test]
async fn exports_bracket_the_upgrade_when_requested() {
    let chain = MockChain::new(1, 10);
    let switcher = MockSwitcher::new(1);
    let mut exporting_plan = plan();
    exporting_plan.export_genesis = true;
    let (tx, _rx) = mpsc::channel(64);
    let orchestrator = UpgradeOrchestrator::new(
        chain.clone(),
        chain,
        switcher.clone(),
        exporting_plan,
        fast_config(),
        CancellationToken::new(),
        tx,
    );

    let summary = orchestrator.run().await.expect("upgrade with exports");
    assert_eq!(switcher.exports(), vec!["pre".to_string(), "post".to_string()]);
    assert!(summary.pre_export.is_some());
    assert!(summary.post_export.is_some());
}
