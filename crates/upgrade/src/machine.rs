// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! The six-stage upgrade state machine.

use crate::{ChainReader, GovGateway, NodeSwitcher};
use cf_types::{ForgeError, ForgeResult, UpgradeEvent, UpgradePlan, UpgradeStage, UpgradeSummary};
use std::time::Duration;
use tokio::{
    sync::mpsc,
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Seconds of headroom the auto height buffer guarantees between the end
/// of voting and the upgrade height.
const BUFFER_HEADROOM_SECS: f64 = 5.0;
/// Assumed block time when the chain has produced no blocks to measure.
const COLD_CHAIN_BLOCK_TIME: Duration = Duration::from_secs(1);

/// Tunables for the orchestrator's waits. Tests shrink these; the CLI uses
/// the defaults.
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Cadence of height and proposal polling.
    pub poll_interval: Duration,
    /// Window over which block time is measured.
    pub block_time_sample: Duration,
    /// Grace added to the voting period before the voting stage gives up.
    pub vote_deadline_slack: Duration,
    /// Bound on waiting for the chain to resume after the switch.
    pub resume_timeout: Duration,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            block_time_sample: Duration::from_secs(6),
            vote_deadline_slack: Duration::from_secs(15),
            resume_timeout: Duration::from_secs(180),
        }
    }
}

/// A stage-tagged failure, so the terminal event can say where the machine
/// stopped and what the chain will still do on its own.
struct Failure {
    stage: UpgradeStage,
    error: ForgeError,
    /// Target height of an already-accepted proposal, when one exists.
    scheduled_height: Option<u64>,
}

impl Failure {
    fn at(stage: UpgradeStage, scheduled_height: Option<u64>) -> impl FnOnce(ForgeError) -> Failure {
        move |error| Failure { stage, error, scheduled_height }
    }
}

/// Executes one [UpgradePlan] end to end.
pub struct UpgradeOrchestrator<C, G, S> {
    chain: C,
    gov: G,
    switcher: S,
    plan: UpgradePlan,
    config: UpgradeConfig,
    cancel: CancellationToken,
    events: mpsc::Sender<UpgradeEvent>,
}

impl<C, G, S> UpgradeOrchestrator<C, G, S>
where
    C: ChainReader,
    G: GovGateway,
    S: NodeSwitcher,
{
    pub fn new(
        chain: C,
        gov: G,
        switcher: S,
        plan: UpgradePlan,
        config: UpgradeConfig,
        cancel: CancellationToken,
        events: mpsc::Sender<UpgradeEvent>,
    ) -> Self {
        Self { chain, gov, switcher, plan, config, cancel, events }
    }

    /// Run the machine to completion or first failure.
    ///
    /// Stage order is strict; each stage's completion criterion gates the
    /// next. The terminal event always reaches the stream before this
    /// returns.
    pub async fn run(self) -> ForgeResult<UpgradeSummary> {
        let started = Instant::now();
        match self.execute(started).await {
            Ok(summary) => {
                self.emit(UpgradeEvent::Completed(summary.clone())).await;
                Ok(summary)
            }
            Err(failure) => {
                let hint = self.failure_hint(&failure);
                self.emit(UpgradeEvent::Failed {
                    stage: failure.stage,
                    cause: failure.error.to_string(),
                    hint,
                })
                .await;
                Err(failure.error)
            }
        }
    }

    async fn execute(&self, started: Instant) -> Result<UpgradeSummary, Failure> {
        use UpgradeStage::*;
        let nodes = self.switcher.node_count();

        // S1: every node must answer before anything touches the chain
        self.verify_reachable(nodes).await.map_err(Failure::at(Verifying, None))?;
        self.emit(UpgradeEvent::Verifying { nodes }).await;

        let pre_export = if self.plan.export_genesis {
            Some(self.switcher.export_genesis("pre").await.map_err(Failure::at(Verifying, None))?)
        } else {
            None
        };

        // S2: compute the target height and put the proposal on chain
        let voting_period =
            self.resolve_voting_period().await.map_err(Failure::at(Submitting, None))?;
        let block_time =
            self.measure_block_time().await.map_err(Failure::at(Submitting, None))?;
        let current_height = self.max_height().await.map_err(Failure::at(Submitting, None))?;
        let target_height = self.target_height(current_height, voting_period, block_time);
        self.emit(UpgradeEvent::Submitting { current_height, target_height }).await;

        if let Some(mode) = self.plan.mode {
            warn!(
                target: "forge::upgrade",
                %mode,
                "upgrade changes the execution mode; it is persisted only on success"
            );
        }

        // submission failure is fatal with no retry
        let proposal_id = self
            .gov
            .submit_upgrade(&self.plan.name, target_height)
            .await
            .map_err(Failure::at(Submitting, None))?;
        let scheduled = Some(target_height);
        info!(target: "forge::upgrade", proposal_id, target_height, "proposal submitted");

        // S3: one YES per validator, then the proposal must actually pass
        for index in 0..nodes {
            self.check_cancelled().map_err(Failure::at(Voting, scheduled))?;
            self.gov.vote(index, proposal_id).await.map_err(Failure::at(Voting, scheduled))?;
            self.emit(UpgradeEvent::Voting { votes_cast: index + 1, votes_required: nodes }).await;
        }
        self.await_proposal_passed(proposal_id, voting_period)
            .await
            .map_err(Failure::at(Voting, scheduled))?;

        // S4: ride along until the chain is about to halt for the upgrade
        self.await_height(target_height).await.map_err(Failure::at(Waiting, scheduled))?;

        // S5: swap binaries node by node, in index order
        self.switch_nodes(nodes).await.map_err(Failure::at(Switching, scheduled))?;

        // S6: the chain must produce blocks past the upgrade height
        let post_upgrade_height = self
            .await_resume(target_height)
            .await
            .map_err(Failure::at(VerifyingResume, scheduled))?;
        self.switcher
            .finalize(&self.plan.version, self.plan.mode)
            .await
            .map_err(Failure::at(VerifyingResume, scheduled))?;

        let post_export = if self.plan.export_genesis {
            Some(
                self.switcher
                    .export_genesis("post")
                    .await
                    .map_err(Failure::at(VerifyingResume, scheduled))?,
            )
        } else {
            None
        };

        Ok(UpgradeSummary {
            proposal_id,
            upgrade_height: target_height,
            post_upgrade_height,
            new_version: self.plan.version.clone(),
            duration: started.elapsed(),
            pre_export,
            post_export,
        })
    }

    async fn verify_reachable(&self, nodes: usize) -> ForgeResult<()> {
        let mut unreachable = Vec::new();
        for index in 0..nodes {
            if self.chain.node_height(index).await?.is_none() {
                unreachable.push(index);
            }
        }
        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(ForgeError::unavailable(
                "node rpc",
                format!("nodes {unreachable:?} did not answer; refusing to upgrade"),
            ))
        }
    }

    /// Explicit override beats the chain's expedited window. Zero is
    /// refused here so a proposal can never be unvotable.
    async fn resolve_voting_period(&self) -> ForgeResult<Duration> {
        let period = match self.plan.voting_period {
            Some(period) => period,
            None => self.chain.governance_params().await?.expedited_voting_period,
        };
        if period.is_zero() {
            return Err(ForgeError::precondition(
                "voting period must be positive; refusing to submit",
            ));
        }
        Ok(period)
    }

    /// Observe block production over the sample window. A chain with no
    /// measurable progress is assumed to run one block per second.
    async fn measure_block_time(&self) -> ForgeResult<Duration> {
        let first = self.max_height().await?;
        self.cancellable_sleep(self.config.block_time_sample).await?;
        let second = self.max_height().await?;

        if second > first {
            Ok(self.config.block_time_sample / (second - first) as u32)
        } else {
            warn!(
                target: "forge::upgrade",
                "no blocks produced during the sample window; assuming 1s block time"
            );
            Ok(COLD_CHAIN_BLOCK_TIME)
        }
    }

    fn target_height(&self, current: u64, voting_period: Duration, block_time: Duration) -> u64 {
        let block_secs = block_time.as_secs_f64().max(0.001);
        let voting_blocks = (voting_period.as_secs_f64() / block_secs).ceil() as u64;
        let buffer = match self.plan.height_buffer {
            cf_types::HeightBuffer::Blocks(n) if n > 0 => n,
            // a few seconds of headroom after voting ends
            _ => ((BUFFER_HEADROOM_SECS / block_secs).ceil() as u64).max(2),
        };
        current + voting_blocks + buffer
    }

    async fn await_proposal_passed(
        &self,
        proposal_id: u64,
        voting_period: Duration,
    ) -> ForgeResult<()> {
        let deadline = Instant::now() + voting_period + self.config.vote_deadline_slack;
        loop {
            self.check_cancelled()?;
            let status = self.chain.proposal_status(proposal_id).await?;
            if status.passed() {
                info!(target: "forge::upgrade", proposal_id, "proposal passed");
                return Ok(());
            }
            if status.rejected() {
                return Err(ForgeError::rejected(
                    "proposal",
                    format!("proposal {proposal_id} ended as {}", status.status),
                ));
            }
            if Instant::now() >= deadline {
                return Err(ForgeError::Timeout {
                    operation: format!(
                        "waiting for proposal {proposal_id} to pass within the voting period"
                    ),
                    hint: Some(
                        "the proposal is on chain; poll it with the chain's gov query".into(),
                    ),
                });
            }
            self.cancellable_sleep(self.config.poll_interval).await?;
        }
    }

    /// S4 loop: poll until the cluster is one block from the upgrade
    /// height. Cancellation exits promptly without advancing the machine.
    async fn await_height(&self, target_height: u64) -> ForgeResult<()> {
        loop {
            self.check_cancelled()?;
            let current_height = self.max_height().await?;
            self.emit(UpgradeEvent::Waiting { current_height, target_height }).await;
            if current_height + 1 >= target_height {
                return Ok(());
            }
            self.cancellable_sleep(self.config.poll_interval).await?;
        }
    }

    async fn switch_nodes(&self, nodes: usize) -> ForgeResult<()> {
        let mut installed = false;
        let mut succeeded = Vec::new();

        for index in 0..nodes {
            self.check_cancelled()?;
            self.emit(UpgradeEvent::Switching { node_index: index, nodes }).await;

            self.switcher.stop_node(index).await?;
            if !installed {
                // one global install: the active pointer swap (or image
                // pull) serves every node
                self.switcher.install_target().await?;
                installed = true;
            }

            match self.switcher.start_node(index).await {
                Ok(()) => succeeded.push(index),
                Err(first) => {
                    warn!(
                        target: "forge::upgrade",
                        index, %first, "node failed to restart; retrying once"
                    );
                    if let Err(second) = self.switcher.start_node(index).await {
                        let tail = self.switcher.log_tail(index).await;
                        return Err(ForgeError::PartialFailure {
                            succeeded,
                            failed: vec![index],
                            detail: format!(
                                "node {index} failed to restart twice ({second}); log tail:\n{}",
                                tail.join("\n")
                            ),
                        });
                    }
                    succeeded.push(index);
                }
            }
        }
        Ok(())
    }

    /// S6 loop: some node must advance past the upgrade height under the
    /// new binary.
    async fn await_resume(&self, target_height: u64) -> ForgeResult<u64> {
        let deadline = Instant::now() + self.config.resume_timeout;
        loop {
            self.check_cancelled()?;
            if let Some(height) = self.any_height().await? {
                self.emit(UpgradeEvent::VerifyingResume { height, target_height }).await;
                if height > target_height {
                    return Ok(height);
                }
            }
            if Instant::now() >= deadline {
                return Err(ForgeError::Timeout {
                    operation: format!("waiting for the chain to pass height {target_height}"),
                    hint: Some(
                        "exports and progress are preserved; check node logs for the new binary"
                            .into(),
                    ),
                });
            }
            self.cancellable_sleep(self.config.poll_interval).await?;
        }
    }

    /// Highest height among reachable nodes; every node down is an error.
    async fn max_height(&self) -> ForgeResult<u64> {
        match self.any_height().await? {
            Some(height) => Ok(height),
            None => Err(ForgeError::unavailable("node rpc", "no node answered a height probe")),
        }
    }

    async fn any_height(&self) -> ForgeResult<Option<u64>> {
        let mut best = None;
        for index in 0..self.switcher.node_count() {
            if let Some(probe) = self.chain.node_height(index).await? {
                best = Some(best.map_or(probe.height, |b: u64| b.max(probe.height)));
            }
        }
        Ok(best)
    }

    async fn emit(&self, event: UpgradeEvent) {
        // a gone receiver only means nobody is rendering progress
        let _ = self.events.send(event).await;
    }

    fn check_cancelled(&self) -> ForgeResult<()> {
        if self.cancel.is_cancelled() {
            Err(ForgeError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn cancellable_sleep(&self, duration: Duration) -> ForgeResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ForgeError::Cancelled),
            _ = sleep(duration) => Ok(()),
        }
    }

    /// Recovery guidance for the terminal failure event.
    fn failure_hint(&self, failure: &Failure) -> Option<String> {
        match &failure.error {
            ForgeError::Cancelled => failure.scheduled_height.map(|height| {
                format!(
                    "the accepted proposal still upgrades the chain at height {height}; \
                     this tool is no longer supervising it"
                )
            }),
            ForgeError::ChainRejected { .. } if failure.stage == UpgradeStage::Submitting => {
                Some("check the chain's gov module state before resubmitting".into())
            }
            other => other.hint().map(|h| h.to_string()),
        }
    }
}
