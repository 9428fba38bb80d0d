use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;
use crate::error::ErrorKind;

use super::{classify_reqwest_error, NodeHealth};

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'a str,
    method: &'a str,
    params: [(); 0],
    id: u32,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

async fn probe_http(client: &Client, node: &NodeConfig, url: &str, timeout: Duration, start: Instant) -> NodeHealth {
    let req_body = JsonRpcRequest {
        jsonrpc: "2.0",
        method: "eth_blockNumber",
        params: [],
        id: 1,
    };
    let resp = match client.post(url).json(&req_body).timeout(timeout).send().await {
        Ok(r) => r,
        Err(e) => return NodeHealth::unhealthy(node, classify_reqwest_error(&e), e.to_string(), start.elapsed()),
    };
    if !resp.status().is_success() {
        let status = resp.status();
        return NodeHealth::unhealthy(node, ErrorKind::Status, format!("HTTP {status}"), start.elapsed());
    }
    let body: JsonRpcResponse = match resp.json().await {
        Ok(b) => b,
        Err(e) => return NodeHealth::unhealthy(node, ErrorKind::Parse, e.to_string(), start.elapsed()),
    };
    if let Some(err) = body.error {
        return NodeHealth::unhealthy(
            node,
            ErrorKind::Semantics,
            format!("eth_blockNumber error {}: {}", err.code, err.message),
            start.elapsed(),
        );
    }
    let Some(hex) = body.result else {
        return NodeHealth::unhealthy(node, ErrorKind::Parse, "missing result field", start.elapsed());
    };
    let trimmed = hex.trim_start_matches("0x");
    match u64::from_str_radix(trimmed, 16) {
        Ok(height) => NodeHealth::healthy_evm(node, height, start.elapsed()),
        Err(_) => NodeHealth::unhealthy(node, ErrorKind::Parse, format!("unparseable hex height: {hex}"), start.elapsed()),
    }
}

/// `WebSocket`-only nodes are never dialed over WebSocket for health
/// purposes; probe the correlated `http_url` instead.
pub(super) async fn probe(client: &Client, node: &NodeConfig, timeout: Duration, start: Instant) -> NodeHealth {
    if node.is_websocket_service() {
        return match node.http_peer_url() {
            Some(http_url) => probe_http(client, node, http_url, timeout, start).await,
            None => NodeHealth::unhealthy(
                node,
                ErrorKind::Configuration,
                "no corresponding HTTP URL found for WebSocket node",
                start.elapsed(),
            ),
        };
    }
    probe_http(client, node, &node.url, timeout, start).await
}
