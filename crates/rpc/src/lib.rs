// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Probes against running nodes.
//!
//! A node that refuses the connection is classified as "not running" and is
//! never an error; a node that answers with garbage is. Every call carries
//! its own timeout and the probe is safe to use concurrently against
//! distinct targets.

use async_trait::async_trait;
use cf_types::{ForgeError, ForgeResult};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default per-call timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of a responsive node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeProbe {
    pub height: u64,
    pub catching_up: bool,
    pub peers: usize,
}

/// On-chain governance parameters the upgrade flow needs.
#[derive(Debug, Clone, PartialEq)]
pub struct GovParams {
    /// Voting window for expedited proposals.
    pub expedited_voting_period: Duration,
    /// Minimum deposit for an expedited proposal, as (amount, denom).
    pub expedited_min_deposit: Vec<(String, String)>,
}

/// Where a governance proposal currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalStatus {
    pub id: u64,
    /// Raw status label as reported by the chain.
    pub status: String,
    pub yes_count: u64,
    pub voting_end_time: Option<String>,
}

impl ProposalStatus {
    pub fn passed(&self) -> bool {
        self.status.ends_with("PASSED")
    }

    pub fn rejected(&self) -> bool {
        self.status.ends_with("REJECTED") || self.status.ends_with("FAILED")
    }
}

/// Optional plugin-provided governance parameter query.
///
/// The probe consults this before falling back to the generic REST path, so
/// families with bespoke governance modules can answer directly.
#[async_trait]
pub trait GovQuery: Send + Sync {
    /// `Ok(None)` means the plugin declines and the generic path is used.
    async fn governance_params(&self) -> ForgeResult<Option<GovParams>>;
}

/// HTTP probe over the consensus RPC and application API endpoints.
#[derive(Debug, Clone)]
pub struct RpcProbe {
    client: reqwest::Client,
}

impl RpcProbe {
    pub fn new() -> ForgeResult<Self> {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> ForgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForgeError::unavailable("http client", e.to_string()))?;
        Ok(Self { client })
    }

    /// Current height, sync flag and peer count of the node at
    /// `host:rpc_port`. `Ok(None)` means nothing is listening there.
    pub async fn height(&self, host: &str, rpc_port: u16) -> ForgeResult<Option<NodeProbe>> {
        let status = match self.get_json(&format!("http://{host}:{rpc_port}/status")).await? {
            Some(body) => body,
            None => return Ok(None),
        };
        let (height, catching_up) = parse_status(&status)?;

        // peer count comes from net_info; a node that answered /status but
        // dropped between calls counts as having no peers
        let peers = match self.get_json(&format!("http://{host}:{rpc_port}/net_info")).await? {
            Some(body) => parse_net_info(&body)?,
            None => 0,
        };

        debug!(target: "forge::rpc", host, rpc_port, height, peers, catching_up, "node probed");
        Ok(Some(NodeProbe { height, catching_up, peers }))
    }

    /// Governance parameters: the plugin answers first, the generic REST
    /// path at `host:api_port` is the fallback.
    pub async fn governance_params(
        &self,
        plugin: Option<&dyn GovQuery>,
        host: &str,
        api_port: u16,
    ) -> ForgeResult<GovParams> {
        if let Some(plugin) = plugin {
            if let Some(params) = plugin.governance_params().await? {
                return Ok(params);
            }
        }
        let url = format!("http://{host}:{api_port}/cosmos/gov/v1/params/voting");
        let body = self.get_json(&url).await?.ok_or_else(|| {
            ForgeError::unavailable("governance api", format!("nothing listening on {url}"))
        })?;
        parse_voting_params(&body)
    }

    /// Status of proposal `id` via the application API.
    pub async fn proposal_status(
        &self,
        host: &str,
        api_port: u16,
        id: u64,
    ) -> ForgeResult<ProposalStatus> {
        let url = format!("http://{host}:{api_port}/cosmos/gov/v1/proposals/{id}");
        let body = self.get_json(&url).await?.ok_or_else(|| {
            ForgeError::unavailable("governance api", format!("nothing listening on {url}"))
        })?;
        parse_proposal(id, &body)
    }

    /// Highest proposal id known to the chain, `None` when there are no
    /// proposals yet. Used to observe a freshly submitted proposal.
    pub async fn latest_proposal_id(&self, host: &str, api_port: u16) -> ForgeResult<Option<u64>> {
        let url = format!(
            "http://{host}:{api_port}/cosmos/gov/v1/proposals?pagination.limit=1&pagination.reverse=true"
        );
        let body = self.get_json(&url).await?.ok_or_else(|| {
            ForgeError::unavailable("governance api", format!("nothing listening on {url}"))
        })?;
        parse_latest_proposal_id(&body)
    }

    /// GET a JSON body. Connection failures map to `None`; HTTP errors and
    /// non-JSON bodies are errors.
    async fn get_json(&self, url: &str) -> ForgeResult<Option<serde_json::Value>> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => return Ok(None),
            Err(e) => return Err(ForgeError::unavailable("node rpc", e.to_string())),
        };
        let response = response
            .error_for_status()
            .map_err(|e| ForgeError::unavailable("node rpc", e.to_string()))?;
        let value = response
            .json()
            .await
            .map_err(|e| ForgeError::unavailable("node rpc", format!("malformed response: {e}")))?;
        Ok(Some(value))
    }
}

#[derive(Deserialize)]
struct StatusBody {
    result: StatusResult,
}

#[derive(Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Deserialize)]
struct SyncInfo {
    latest_block_height: String,
    catching_up: bool,
}

fn parse_status(body: &serde_json::Value) -> ForgeResult<(u64, bool)> {
    let status: StatusBody = serde_json::from_value(body.clone())
        .map_err(|e| ForgeError::unavailable("node rpc", format!("malformed /status: {e}")))?;
    let height = status.result.sync_info.latest_block_height.parse().map_err(|_| {
        ForgeError::unavailable(
            "node rpc",
            format!("bad height: {}", status.result.sync_info.latest_block_height),
        )
    })?;
    Ok((height, status.result.sync_info.catching_up))
}

fn parse_net_info(body: &serde_json::Value) -> ForgeResult<usize> {
    body.pointer("/result/n_peers")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ForgeError::unavailable("node rpc", "malformed /net_info".to_string()))
}

/// Parse `/cosmos/gov/v1/params/voting`. Durations arrive as protobuf
/// duration strings (`"300s"`).
fn parse_voting_params(body: &serde_json::Value) -> ForgeResult<GovParams> {
    let params = body
        .get("params")
        .ok_or_else(|| ForgeError::unavailable("governance api", "missing params".to_string()))?;
    let period = params
        .get("expedited_voting_period")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ForgeError::unavailable("governance api", "missing expedited_voting_period".to_string())
        })?;
    let expedited_voting_period = parse_proto_duration(period)?;

    let expedited_min_deposit = params
        .get("expedited_min_deposit")
        .and_then(|v| v.as_array())
        .map(|coins| {
            coins
                .iter()
                .filter_map(|c| {
                    Some((
                        c.get("amount")?.as_str()?.to_string(),
                        c.get("denom")?.as_str()?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(GovParams { expedited_voting_period, expedited_min_deposit })
}

fn parse_proposal(id: u64, body: &serde_json::Value) -> ForgeResult<ProposalStatus> {
    let proposal = body
        .get("proposal")
        .ok_or_else(|| ForgeError::unavailable("governance api", "missing proposal".to_string()))?;
    let status = proposal
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ForgeError::unavailable("governance api", "missing proposal status".to_string())
        })?
        .to_string();
    let yes_count = proposal
        .pointer("/final_tally_result/yes_count")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let voting_end_time = proposal
        .get("voting_end_time")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    Ok(ProposalStatus { id, status, yes_count, voting_end_time })
}

fn parse_latest_proposal_id(body: &serde_json::Value) -> ForgeResult<Option<u64>> {
    let proposals = body
        .get("proposals")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ForgeError::unavailable("governance api", "missing proposals".to_string()))?;
    Ok(proposals
        .iter()
        .filter_map(|p| p.get("id").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()))
        .max())
}

/// `"300s"` -> 300 seconds. Negative and malformed durations are errors.
fn parse_proto_duration(raw: &str) -> ForgeResult<Duration> {
    let secs: i64 = raw
        .strip_suffix('s')
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            ForgeError::unavailable("governance api", format!("bad duration: {raw}"))
        })?;
    if secs < 0 {
        return Err(ForgeError::unavailable("governance api", format!("negative duration: {raw}")));
    }
    Ok(Duration::from_secs(secs as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_and_net_info_parse() {
        let status = json!({
            "result": {
                "sync_info": { "latest_block_height": "1042", "catching_up": false }
            }
        });
        assert_eq!(parse_status(&status).unwrap(), (1042, false));

        let net_info = json!({ "result": { "n_peers": "3" } });
        assert_eq!(parse_net_info(&net_info).unwrap(), 3);
    }

    #[test]
    fn malformed_status_is_an_error() {
        let garbage = json!({ "result": { "sync_info": { "latest_block_height": "not-a-number", "catching_up": false } } });
        assert!(parse_status(&garbage).is_err());
        assert!(parse_status(&json!({"jsonrpc": "2.0"})).is_err());
    }

    #[test]
    fn voting_params_parse_proto_durations() {
        let body = json!({
            "params": {
                "expedited_voting_period": "300s",
                "expedited_min_deposit": [ { "denom": "stake", "amount": "50000000" } ]
            }
        });
        let params = parse_voting_params(&body).unwrap();
        assert_eq!(params.expedited_voting_period, Duration::from_secs(300));
        assert_eq!(params.expedited_min_deposit, vec![("50000000".to_string(), "stake".to_string())]);
    }

    #[test]
    fn negative_voting_period_is_rejected() {
        let body = json!({ "params": { "expedited_voting_period": "-60s" } });
        assert!(parse_voting_params(&body).is_err());
    }

    #[test]
    fn proposal_status_classifies() {
        let body = json!({
            "proposal": {
                "status": "PROPOSAL_STATUS_PASSED",
                "voting_end_time": "2026-08-01T00:01:00Z",
                "final_tally_result": { "yes_count": "4", "no_count": "0" }
            }
        });
        let status = parse_proposal(7, &body).unwrap();
        assert!(status.passed());
        assert!(!status.rejected());
        assert_eq!(status.yes_count, 4);
    }

    #[test]
    fn latest_proposal_id_takes_the_highest() {
        let body = json!({ "proposals": [ { "id": "7" }, { "id": "3" } ], "pagination": {} });
        assert_eq!(parse_latest_proposal_id(&body).unwrap(), Some(7));
        let empty = json!({ "proposals": [], "pagination": {} });
        assert_eq!(parse_latest_proposal_id(&empty).unwrap(), None);
    }

    #[tokio::test]
    async fn connection_refused_is_not_running() {
        // bind then drop to find a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = RpcProbe::with_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(probe.height("127.0.0.1", port).await.unwrap(), None);
    }
}
