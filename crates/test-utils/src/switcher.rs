// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Recording node switcher.

use async_trait::async_trait;
use cf_types::{ExecutionMode, ForgeError, ForgeResult};
use cf_upgrade::NodeSwitcher;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

#[derive(Debug, Default)]
struct SwitcherInner {
    stops: Vec<usize>,
    starts: Vec<usize>,
    installs: usize,
    /// Remaining times `start_node(i)` should fail.
    start_failures: HashMap<usize, usize>,
    exports: Vec<String>,
    finalized: Option<(String, Option<ExecutionMode>)>,
    /// Chain to halt when the target is installed, for resume-timeout
    /// scenarios.
    halt_on_install: Option<crate::MockChain>,
}

/// [NodeSwitcher] that records every call and fails on request.
#[derive(Debug, Clone)]
pub struct MockSwitcher {
    nodes: usize,
    inner: Arc<Mutex<SwitcherInner>>,
}

impl MockSwitcher {
    pub fn new(nodes: usize) -> Self {
        Self { nodes, inner: Arc::new(Mutex::new(SwitcherInner::default())) }
    }

    /// Make `start_node(index)` fail the next `times` attempts.
    pub fn fail_start(&self, index: usize, times: usize) {
        self.inner.lock().unwrap().start_failures.insert(index, times);
    }

    /// Halt `chain`'s block production the moment the upgrade target is
    /// installed, simulating a new binary that never produces blocks.
    pub fn halt_chain_on_install(&self, chain: crate::MockChain) {
        self.inner.lock().unwrap().halt_on_install = Some(chain);
    }

    pub fn stops(&self) -> Vec<usize> {
        self.inner.lock().unwrap().stops.clone()
    }

    pub fn starts(&self) -> Vec<usize> {
        self.inner.lock().unwrap().starts.clone()
    }

    pub fn installs(&self) -> usize {
        self.inner.lock().unwrap().installs
    }

    pub fn exports(&self) -> Vec<String> {
        self.inner.lock().unwrap().exports.clone()
    }

    pub fn finalized(&self) -> Option<(String, Option<ExecutionMode>)> {
        self.inner.lock().unwrap().finalized.clone()
    }
}

#[async_trait]
impl NodeSwitcher for MockSwitcher {
    fn node_count(&self) -> usize {
        self.nodes
    }

    async fn stop_node(&self, index: usize) -> ForgeResult<()> {
        self.inner.lock().unwrap().stops.push(index);
        Ok(())
    }

    async fn install_target(&self) -> ForgeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.installs += 1;
        if let Some(chain) = &inner.halt_on_install {
            chain.set_halted(true);
        }
        Ok(())
    }

    async fn start_node(&self, index: usize) -> ForgeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(remaining) = inner.start_failures.get_mut(&index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ForgeError::unavailable(
                    "process",
                    format!("node {index} exited immediately"),
                ));
            }
        }
        inner.starts.push(index);
        Ok(())
    }

    async fn log_tail(&self, index: usize) -> Vec<String> {
        vec![format!("node{index}: panic: upgrade handler missing")]
    }

    async fn export_genesis(&self, label: &str) -> ForgeResult<PathBuf> {
        self.inner.lock().unwrap().exports.push(label.to_string());
        Ok(PathBuf::from(format!("/exports/{label}/genesis.json")))
    }

    async fn finalize(&self, version: &str, mode: Option<ExecutionMode>) -> ForgeResult<()> {
        self.inner.lock().unwrap().finalized = Some((version.to_string(), mode));
        Ok(())
    }
}
