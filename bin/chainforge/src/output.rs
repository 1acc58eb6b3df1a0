// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Command results and their rendering.
//!
//! Every command produces one tagged [CommandOutput] variant whose JSON
//! shape is part of the stable surface; the text renderer derives from the
//! same value so the two modes can never drift apart.

use cf_cluster::ExportRecord;
use cf_types::{ClusterStatus, ForgeError, NodeHealth, UpgradeEvent, UpgradeSummary};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;
use std::path::PathBuf;

/// One entry of `export list`.
#[derive(Debug, Serialize)]
pub struct ExportListEntry {
    pub timestamp: u64,
    #[serde(flatten)]
    pub record: ExportRecord,
}

/// The result of a successfully completed command.
#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandOutput {
    Deploy {
        chain_id: String,
        validators: usize,
        mode: String,
        version: Option<String>,
        rpc_endpoints: Vec<String>,
    },
    Lifecycle {
        action: String,
        chain_id: String,
    },
    Status {
        status: ClusterStatus,
        display: String,
        chain_id: String,
        version: Option<String>,
        nodes: Vec<NodeHealth>,
    },
    Destroy {
        purged_cache: bool,
    },
    Reset {
        hard: bool,
    },
    Upgrade {
        summary: UpgradeSummary,
    },
    Replace {
        version: String,
        cache_ref: String,
    },
    NodeLifecycle {
        index: usize,
        action: String,
    },
    NodeLogs {
        index: usize,
        lines: Vec<String>,
    },
    Export {
        path: PathBuf,
        record: ExportRecord,
    },
    ExportList {
        exports: Vec<ExportListEntry>,
    },
    ExportInspect {
        timestamp: u64,
        record: ExportRecord,
    },
    Keys {
        keys: serde_json::Value,
    },
}

impl CommandOutput {
    /// Render for the terminal or as the JSON object.
    pub fn render(&self, json: bool) -> String {
        if json {
            return serde_json::to_string_pretty(self).expect("output serializes");
        }
        self.render_text()
    }

    fn render_text(&self) -> String {
        match self {
            Self::Deploy { chain_id, validators, mode, version, rpc_endpoints } => {
                let mut out = format!(
                    "deployed {chain_id}: {validators} validator(s), {mode} mode{}\n",
                    version.as_deref().map(|v| format!(", version {v}")).unwrap_or_default()
                );
                for endpoint in rpc_endpoints {
                    out.push_str(&format!("  rpc: {endpoint}\n"));
                }
                out
            }
            Self::Lifecycle { action, chain_id } => format!("{action}: {chain_id}\n"),
            Self::Status { display, chain_id, version, nodes, .. } => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["node", "status", "height", "peers"]);
                for node in nodes {
                    table.add_row(vec![
                        node.index.to_string(),
                        node.status.to_string(),
                        node.height.map(|h| h.to_string()).unwrap_or_else(|| "-".into()),
                        node.peers.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                    ]);
                }
                format!(
                    "{chain_id}: {display}{}\n{table}\n",
                    version.as_deref().map(|v| format!(" ({v})")).unwrap_or_default()
                )
            }
            Self::Destroy { purged_cache } => {
                if *purged_cache {
                    "devnet destroyed; binary cache purged\n".into()
                } else {
                    "devnet destroyed\n".into()
                }
            }
            Self::Reset { hard } => {
                if *hard {
                    "hard reset: devnet removed\n".into()
                } else {
                    "soft reset: node data cleared, configuration preserved\n".into()
                }
            }
            Self::Upgrade { summary } => format!(
                "upgrade complete: proposal {} at height {}, now at {} on {} ({})\n",
                summary.proposal_id,
                summary.upgrade_height,
                summary.post_upgrade_height,
                summary.new_version,
                humantime::format_duration(round_secs(summary.duration)),
            ),
            Self::Replace { version, cache_ref } => {
                format!("binary replaced: {version} (cache ref {cache_ref})\n")
            }
            Self::NodeLifecycle { index, action } => format!("node {index}: {action}\n"),
            Self::NodeLogs { index, lines } => {
                let mut out = format!("--- node {index} log tail ---\n");
                for line in lines {
                    out.push_str(line);
                    out.push('\n');
                }
                out
            }
            Self::Export { path, record } => format!(
                "exported genesis at height {} to {} (binary {})\n",
                record.height,
                path.display(),
                record.binary_digest,
            ),
            Self::ExportList { exports } => {
                let mut out = String::new();
                for entry in exports {
                    out.push_str(&format!(
                        "{}  {}  height {}  {}\n",
                        entry.timestamp, entry.record.label, entry.record.height,
                        entry.record.created_at,
                    ));
                }
                if out.is_empty() {
                    out.push_str("no exports\n");
                }
                out
            }
            Self::ExportInspect { timestamp, record } => format!(
                "export {timestamp}: label {} height {} network {} binary {} at {}\n",
                record.label, record.height, record.network, record.binary_digest,
                record.created_at,
            ),
            Self::Keys { keys } => {
                serde_json::to_string_pretty(keys).expect("keys serialize")
            }
        }
    }
}

/// One line per upgrade progress event, for the text surface.
pub fn render_upgrade_event(event: &UpgradeEvent) -> String {
    match event {
        UpgradeEvent::Verifying { nodes } => format!("[1/6] verifying {nodes} node(s)"),
        UpgradeEvent::Submitting { current_height, target_height } => {
            format!("[2/6] submitting proposal: height {current_height} -> {target_height}")
        }
        UpgradeEvent::Voting { votes_cast, votes_required } => {
            format!("[3/6] voting: {votes_cast}/{votes_required}")
        }
        UpgradeEvent::Waiting { current_height, target_height } => {
            format!("[4/6] waiting for upgrade height: {current_height}/{target_height}")
        }
        UpgradeEvent::Switching { node_index, nodes } => {
            format!("[5/6] switching node {node_index} of {nodes}")
        }
        UpgradeEvent::VerifyingResume { height, target_height } => {
            format!("[6/6] verifying resume: {height} (target {target_height})")
        }
        UpgradeEvent::Completed(summary) => {
            format!("completed: chain at {} on {}", summary.post_upgrade_height, summary.new_version)
        }
        UpgradeEvent::Failed { stage, cause, .. } => format!("failed during {stage}: {cause}"),
    }
}

/// Single-line error summary, optional hint, per §text contract; the JSON
/// object in JSON mode.
pub fn render_error(err: &ForgeError, json: bool) -> String {
    if json {
        let value = serde_json::json!({
            "error": true,
            "code": err.kind(),
            "message": err.to_string(),
            "suggestion": err.hint(),
        });
        serde_json::to_string_pretty(&value).expect("error serializes")
    } else {
        match err.hint() {
            Some(hint) => format!("Error: {err}\nhint: {hint}"),
            None => format!("Error: {err}"),
        }
    }
}

fn round_secs(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_secs(d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_types::NodeStatus;

    #[test]
    fn partial_status_displays_as_running_but_stays_partial_in_json() {
        let output = CommandOutput::Status {
            status: ClusterStatus::Partial,
            display: ClusterStatus::Partial.user_facing().to_string(),
            chain_id: "forge-1".into(),
            version: Some("v1.2.3".into()),
            nodes: vec![NodeHealth {
                index: 0,
                status: NodeStatus::Running,
                height: Some(42),
                peers: Some(1),
                catching_up: false,
                error: None,
            }],
        };
        let text = output.render(false);
        assert!(text.contains("forge-1: Running"));

        let json = output.render(true);
        assert!(json.contains("\"status\": \"Partial\""));
        assert!(json.contains("\"command\": \"status\""));
    }

    #[test]
    fn errors_render_one_line_plus_hint() {
        let err = ForgeError::precondition_with_hint("devnet is stopped", "run `chainforge start`");
        let text = render_error(&err, false);
        assert!(text.starts_with("Error: precondition failed"));
        assert!(text.contains("hint: run `chainforge start`"));

        let json = render_error(&err, true);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["code"], "precondition_failed");
        assert_eq!(value["error"], true);
        assert_eq!(value["suggestion"], "run `chainforge start`");
    }
}
