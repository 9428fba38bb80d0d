use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;

use crate::config::NodeConfig;
use crate::error::ErrorKind;

use super::{classify_reqwest_error, NodeHealth};

#[derive(Deserialize)]
struct StatusResponse {
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

#[derive(Deserialize)]
struct SyncingResponse {
    syncing: bool,
}

#[derive(Deserialize)]
struct LatestBlockResponse {
    block: BlockEnvelope,
}

#[derive(Deserialize)]
struct BlockEnvelope {
    header: BlockHeader,
}

#[derive(Deserialize)]
struct BlockHeader {
    height: String,
}

/// RPC variant: `GET {base}/status`.
async fn probe_rpc(client: &Client, node: &NodeConfig, timeout: Duration, start: Instant) -> NodeHealth {
    let url = format!("{}/status", node.url.trim_end_matches('/'));
    let resp = match client.get(&url).timeout(timeout).send().await {
        Ok(r) => r,
        Err(e) => return NodeHealth::unhealthy(node, classify_reqwest_error(&e), e.to_string(), start.elapsed()),
    };
    if !resp.status().is_success() {
        let status = resp.status();
        return NodeHealth::unhealthy(node, ErrorKind::Status, format!("HTTP {status}"), start.elapsed());
    }
    let body: StatusResponse = match resp.json().await {
        Ok(b) => b,
        Err(e) => return NodeHealth::unhealthy(node, ErrorKind::Parse, e.to_string(), start.elapsed()),
    };
    let height: u64 = match body.result.sync_info.latest_block_height.parse() {
        Ok(h) => h,
        Err(_) => {
            return NodeHealth::unhealthy(
                node,
                ErrorKind::Parse,
                format!("unparseable block height: {}", body.result.sync_info.latest_block_height),
                start.elapsed(),
            );
        }
    };
    NodeHealth::healthy_cosmos(node, height, body.result.sync_info.catching_up, start.elapsed())
}

/// REST variant: `GET {base}/cosmos/base/tendermint/v1beta1/syncing` +
/// `GET {base}/cosmos/base/tendermint/v1beta1/blocks/latest`. Each request
/// gets its own scoped response so the first body is always consumed/dropped
/// before the second request is issued.
async fn probe_rest(client: &Client, node: &NodeConfig, timeout: Duration, start: Instant) -> NodeHealth {
    let base = node.api_url.as_deref().unwrap_or(&node.url);
    let base = base.trim_end_matches('/');

    let syncing: bool = {
        let url = format!("{base}/cosmos/base/tendermint/v1beta1/syncing");
        let resp = match client.get(&url).timeout(timeout).send().await {
            Ok(r) => r,
            Err(e) => {
                return NodeHealth::unhealthy(node, classify_reqwest_error(&e), e.to_string(), start.elapsed());
            }
        };
        if !resp.status().is_success() {
            let status = resp.status();
            return NodeHealth::unhealthy(node, ErrorKind::Status, format!("HTTP {status}"), start.elapsed());
        }
        match resp.json::<SyncingResponse>().await {
            Ok(b) => b.syncing,
            Err(e) => return NodeHealth::unhealthy(node, ErrorKind::Parse, e.to_string(), start.elapsed()),
        }
    };

    let height: u64 = {
        let url = format!("{base}/cosmos/base/tendermint/v1beta1/blocks/latest");
        let resp = match client.get(&url).timeout(timeout).send().await {
            Ok(r) => r,
            Err(e) => {
                return NodeHealth::unhealthy(node, classify_reqwest_error(&e), e.to_string(), start.elapsed());
            }
        };
        if !resp.status().is_success() {
            let status = resp.status();
            return NodeHealth::unhealthy(node, ErrorKind::Status, format!("HTTP {status}"), start.elapsed());
        }
        let body: LatestBlockResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => return NodeHealth::unhealthy(node, ErrorKind::Parse, e.to_string(), start.elapsed()),
        };
        match body.block.header.height.parse() {
            Ok(h) => h,
            Err(_) => {
                return NodeHealth::unhealthy(
                    node,
                    ErrorKind::Parse,
                    format!("unparseable block height: {}", body.block.header.height),
                    start.elapsed(),
                );
            }
        }
    };

    NodeHealth::healthy_cosmos(node, height, syncing, start.elapsed())
}

pub(super) async fn probe(client: &Client, node: &NodeConfig, timeout: Duration, start: Instant) -> NodeHealth {
    if node.service_type() == Some("api") {
        return probe_rest(client, node, timeout, start).await;
    }
    let rpc_result = probe_rpc(client, node, timeout, start).await;
    // Retry on REST only when RPC itself failed to produce a reading
    // (transport/status/parse) -- a successfully-probed "catching up" node
    // is not a probe failure and should not fall back.
    let probe_failed = matches!(
        rpc_result.last_error_kind,
        Some(ErrorKind::Transport) | Some(ErrorKind::Timeout) | Some(ErrorKind::Status) | Some(ErrorKind::Parse)
    );
    if !probe_failed || node.api_url.is_none() {
        return rpc_result;
    }
    probe_rest(client, node, timeout, start).await
}
