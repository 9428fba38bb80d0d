mod beacon;
mod cosmos;
mod evm;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;

use crate::config::{NodeConfig, NodeKind};
use crate::error::ErrorKind;

/// The normalized result of one round-trip health check of one node, per
/// Produced by every probe variant; never carries a panic or an
/// `Err` — transport/parse failures are encoded as `healthy = false` with
/// `last_error` populated.
#[derive(Debug, Clone, Serialize)]
pub struct NodeHealth {
    pub name: String,
    pub url: String,
    pub healthy: bool,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub last_error_kind: Option<ErrorKind>,
    pub last_check: DateTime<Utc>,
    pub response_time_ms: u64,
    pub block_height: u64,
    pub catching_up: Option<bool>,
    pub height_valid: bool,
    pub external_reference_valid: bool,
    pub blocks_behind_pool: i64,
    pub blocks_behind_external: i64,
}

impl NodeHealth {
    fn unhealthy(node: &NodeConfig, kind: ErrorKind, error: impl Into<String>, elapsed: Duration) -> Self {
        NodeHealth {
            name: node.name.clone(),
            url: node.url.clone(),
            healthy: false,
            last_error: Some(error.into()),
            last_error_kind: Some(kind),
            last_check: Utc::now(),
            response_time_ms: elapsed.as_millis() as u64,
            block_height: 0,
            catching_up: None,
            height_valid: true,
            external_reference_valid: true,
            blocks_behind_pool: 0,
            blocks_behind_external: 0,
        }
    }

    /// A synthetic record for paths that never reach a wire probe: circuit
    /// breaker suppression, cancellation while waiting on the concurrency
    /// semaphore, or "no such node" lookups.
    pub fn synthetic_unhealthy(name: &str, url: &str, kind: ErrorKind, error: impl Into<String>) -> Self {
        NodeHealth {
            name: name.to_string(),
            url: url.to_string(),
            healthy: false,
            last_error: Some(error.into()),
            last_error_kind: Some(kind),
            last_check: Utc::now(),
            response_time_ms: 0,
            block_height: 0,
            catching_up: None,
            height_valid: true,
            external_reference_valid: true,
            blocks_behind_pool: 0,
            blocks_behind_external: 0,
        }
    }

    fn healthy_cosmos(node: &NodeConfig, height: u64, catching_up: bool, elapsed: Duration) -> Self {
        NodeHealth {
            name: node.name.clone(),
            url: node.url.clone(),
            healthy: !catching_up,
            last_error: if catching_up { Some("node is catching up".to_string()) } else { None },
            last_error_kind: if catching_up { Some(ErrorKind::Semantics) } else { None },
            last_check: Utc::now(),
            response_time_ms: elapsed.as_millis() as u64,
            block_height: height,
            catching_up: Some(catching_up),
            height_valid: true,
            external_reference_valid: true,
            blocks_behind_pool: 0,
            blocks_behind_external: 0,
        }
    }

    fn healthy_evm(node: &NodeConfig, height: u64, elapsed: Duration) -> Self {
        NodeHealth {
            name: node.name.clone(),
            url: node.url.clone(),
            healthy: true,
            last_error: None,
            last_error_kind: None,
            last_check: Utc::now(),
            response_time_ms: elapsed.as_millis() as u64,
            block_height: height,
            catching_up: None,
            height_valid: true,
            external_reference_valid: true,
            blocks_behind_pool: 0,
            blocks_behind_external: 0,
        }
    }

    fn healthy_beacon(node: &NodeConfig, head_slot: u64, is_syncing: bool, elapsed: Duration) -> Self {
        NodeHealth {
            name: node.name.clone(),
            url: node.url.clone(),
            healthy: !is_syncing && head_slot > 0,
            last_error: None,
            last_error_kind: None,
            last_check: Utc::now(),
            response_time_ms: elapsed.as_millis() as u64,
            block_height: head_slot,
            catching_up: Some(is_syncing),
            height_valid: true,
            external_reference_valid: true,
            blocks_behind_pool: 0,
            blocks_behind_external: 0,
        }
    }
}

/// Dispatches to the protocol-specific probe variant named by `node.type`.
/// Pure function contract: never panics, never returns an
/// `Err`.
pub async fn probe_node(client: &Client, node: &NodeConfig, timeout: Duration) -> NodeHealth {
    let start = Instant::now();
    match node.r#type {
        NodeKind::Cosmos => cosmos::probe(client, node, timeout, start).await,
        NodeKind::Evm => evm::probe(client, node, timeout, start).await,
        NodeKind::Beacon => beacon::probe(client, node, timeout, start).await,
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_connect() {
        ErrorKind::Transport
    } else if err.is_decode() {
        ErrorKind::Parse
    } else {
        ErrorKind::Transport
    }
}
