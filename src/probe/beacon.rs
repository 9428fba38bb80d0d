use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;

use crate::config::NodeConfig;
use crate::error::ErrorKind;

use super::{classify_reqwest_error, NodeHealth};

#[derive(Deserialize)]
struct SyncingEnvelope {
    data: SyncingData,
}

#[derive(Deserialize)]
struct SyncingData {
    is_syncing: bool,
    #[serde(default)]
    head_slot: Option<String>,
}

#[derive(Deserialize)]
struct HeaderEnvelope {
    data: HeaderData,
}

#[derive(Deserialize)]
struct HeaderData {
    header: HeaderMessageWrapper,
}

#[derive(Deserialize)]
struct HeaderMessageWrapper {
    message: HeaderMessage,
}

#[derive(Deserialize)]
struct HeaderMessage {
    slot: String,
}

pub(super) async fn probe(client: &Client, node: &NodeConfig, timeout: Duration, start: Instant) -> NodeHealth {
    let base = node.url.trim_end_matches('/');

    let syncing_url = format!("{base}/eth/v1/node/syncing");
    let resp = match client.get(&syncing_url).timeout(timeout).send().await {
        Ok(r) => r,
        Err(e) => return NodeHealth::unhealthy(node, classify_reqwest_error(&e), e.to_string(), start.elapsed()),
    };
    if !resp.status().is_success() {
        let status = resp.status();
        return NodeHealth::unhealthy(node, ErrorKind::Status, format!("HTTP {status}"), start.elapsed());
    }
    let body: SyncingEnvelope = match resp.json().await {
        Ok(b) => b,
        Err(e) => return NodeHealth::unhealthy(node, ErrorKind::Parse, e.to_string(), start.elapsed()),
    };

    let parsed_slot = body
        .data
        .head_slot
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|&s| s > 0);

    let head_slot = match parsed_slot {
        Some(slot) => slot,
        None => {
            let header_url = format!("{base}/eth/v1/beacon/headers/head");
            let resp = match client.get(&header_url).timeout(timeout).send().await {
                Ok(r) => r,
                Err(e) => {
                    return NodeHealth::unhealthy(node, classify_reqwest_error(&e), e.to_string(), start.elapsed());
                }
            };
            if !resp.status().is_success() {
                let status = resp.status();
                return NodeHealth::unhealthy(node, ErrorKind::Status, format!("HTTP {status}"), start.elapsed());
            }
            let header: HeaderEnvelope = match resp.json().await {
                Ok(b) => b,
                Err(e) => return NodeHealth::unhealthy(node, ErrorKind::Parse, e.to_string(), start.elapsed()),
            };
            match header.data.header.message.slot.parse() {
                Ok(slot) => slot,
                Err(_) => {
                    return NodeHealth::unhealthy(
                        node,
                        ErrorKind::Parse,
                        format!("unparseable head slot: {}", header.data.header.message.slot),
                        start.elapsed(),
                    );
                }
            }
        }
    };

    if head_slot == 0 {
        return NodeHealth::unhealthy(node, ErrorKind::Semantics, "missing head slot", start.elapsed());
    }

    NodeHealth::healthy_beacon(node, head_slot, body.data.is_syncing, start.elapsed())
}
