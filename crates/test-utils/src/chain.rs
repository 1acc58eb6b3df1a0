// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! In-memory chain with a toy governance module.

use async_trait::async_trait;
use cf_rpc::{GovParams, NodeProbe, ProposalStatus};
use cf_types::{ForgeError, ForgeResult};
use cf_upgrade::{ChainReader, GovGateway, VoteOutcome};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Debug)]
struct Proposal {
    #[allow(dead_code)]
    name: String,
    votes: HashSet<usize>,
    votes_to_pass: usize,
}

#[derive(Debug)]
struct ChainInner {
    nodes: usize,
    height: u64,
    /// Height advances by this much on every probe, simulating block
    /// production between polls.
    advance_per_probe: u64,
    /// Halted chains answer probes but stop producing blocks.
    halted: bool,
    unreachable: HashSet<usize>,
    expedited_voting_period: Duration,
    reject_submission: bool,
    /// Validators the chain believes voted in some earlier run.
    already_voted: HashSet<usize>,
    next_proposal: u64,
    proposals: HashMap<u64, Proposal>,
}

/// A cluster-in-a-box: answers probes, accepts proposals and tallies
/// votes. Clones share state.
#[derive(Debug, Clone)]
pub struct MockChain {
    inner: Arc<Mutex<ChainInner>>,
}

impl MockChain {
    pub fn new(nodes: usize, start_height: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChainInner {
                nodes,
                height: start_height,
                advance_per_probe: 1,
                halted: false,
                unreachable: HashSet::new(),
                expedited_voting_period: Duration::from_secs(1),
                reject_submission: false,
                already_voted: HashSet::new(),
                next_proposal: 1,
                proposals: HashMap::new(),
            })),
        }
    }

    pub fn set_unreachable(&self, index: usize) {
        self.inner.lock().unwrap().unreachable.insert(index);
    }

    pub fn set_reachable(&self, index: usize) {
        self.inner.lock().unwrap().unreachable.remove(&index);
    }

    /// Stop block production without stopping the RPC.
    pub fn set_halted(&self, halted: bool) {
        self.inner.lock().unwrap().halted = halted;
    }

    pub fn set_expedited_voting_period(&self, period: Duration) {
        self.inner.lock().unwrap().expedited_voting_period = period;
    }

    pub fn reject_next_submission(&self) {
        self.inner.lock().unwrap().reject_submission = true;
    }

    /// Pretend validator `index` voted in a previous (interrupted) run.
    pub fn mark_already_voted(&self, index: usize) {
        self.inner.lock().unwrap().already_voted.insert(index);
    }

    pub fn height(&self) -> u64 {
        self.inner.lock().unwrap().height
    }

    /// One-per-validator vote count for a proposal.
    pub fn vote_count(&self, proposal_id: u64) -> usize {
        self.inner
            .lock()
            .unwrap()
            .proposals
            .get(&proposal_id)
            .map(|p| p.votes.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn node_height(&self, index: usize) -> ForgeResult<Option<NodeProbe>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unreachable.contains(&index) {
            return Ok(None);
        }
        if !inner.halted {
            inner.height += inner.advance_per_probe;
        }
        Ok(Some(NodeProbe {
            height: inner.height,
            catching_up: false,
            peers: inner.nodes.saturating_sub(1),
        }))
    }

    async fn governance_params(&self) -> ForgeResult<GovParams> {
        let inner = self.inner.lock().unwrap();
        Ok(GovParams {
            expedited_voting_period: inner.expedited_voting_period,
            expedited_min_deposit: vec![("1".into(), "stake".into())],
        })
    }

    async fn proposal_status(&self, id: u64) -> ForgeResult<ProposalStatus> {
        let inner = self.inner.lock().unwrap();
        let proposal = inner
            .proposals
            .get(&id)
            .ok_or_else(|| ForgeError::rejected("proposal query", format!("no proposal {id}")))?;
        let status = if proposal.votes.len() >= proposal.votes_to_pass {
            "PROPOSAL_STATUS_PASSED"
        } else {
            "PROPOSAL_STATUS_VOTING_PERIOD"
        };
        Ok(ProposalStatus {
            id,
            status: status.into(),
            yes_count: proposal.votes.len() as u64,
            voting_end_time: None,
        })
    }
}

#[async_trait]
impl GovGateway for MockChain {
    async fn submit_upgrade(&self, upgrade_name: &str, _height: u64) -> ForgeResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.reject_submission {
            return Err(ForgeError::rejected("proposal", "insufficient deposit"));
        }
        let id = inner.next_proposal;
        inner.next_proposal += 1;
        let votes_to_pass = inner.nodes;
        // a validator that voted in an earlier run keeps its single vote
        let votes = inner.already_voted.clone();
        inner
            .proposals
            .insert(id, Proposal { name: upgrade_name.to_string(), votes, votes_to_pass });
        Ok(id)
    }

    async fn vote(&self, index: usize, proposal_id: u64) -> ForgeResult<VoteOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let flagged = inner.already_voted.contains(&index);
        let proposal = inner
            .proposals
            .get_mut(&proposal_id)
            .ok_or_else(|| ForgeError::rejected("vote", format!("no proposal {proposal_id}")))?;
        if flagged || !proposal.votes.insert(index) {
            return Ok(VoteOutcome::AlreadyVoted);
        }
        Ok(VoteOutcome::Cast)
    }
}
