use std::collections::HashMap;

use tracing::{debug, warn};

use super::{ChainPreset, Config, NodeConfig, NodeKind};

/// Applies the `chain.chain_preset` defaults for a known chain family.
fn apply_preset(cfg: &mut Config, preset: ChainPreset) {
    let (interval_ms, height_threshold) = match preset {
        ChainPreset::Cosmos | ChainPreset::CosmosHub => (15_000, 5),
        ChainPreset::Ethereum => (12_000, 3),
        ChainPreset::Althea => (15_000, 5),
    };
    cfg.health_check.interval_ms = interval_ms;
    cfg.block_validation.height_threshold = height_threshold;
}

fn preset_default_kind(preset: Option<ChainPreset>) -> NodeKind {
    match preset {
        Some(ChainPreset::Ethereum) | Some(ChainPreset::Althea) => NodeKind::Evm,
        _ => NodeKind::Cosmos,
    }
}

fn split_servers(list: &str) -> Vec<String> {
    list.split_whitespace().map(|s| s.to_string()).collect()
}

fn cosmos_ws_url(http_url: &str) -> Option<String> {
    let (scheme, rest) = http_url.split_once("://")?;
    let ws_scheme = if scheme == "https" { "wss" } else { "ws" };
    Some(format!("{ws_scheme}://{rest}/websocket"))
}

fn evm_ws_url(http_url: &str) -> Option<String> {
    let (scheme, rest) = http_url.split_once("://")?;
    let ws_scheme = if scheme == "https" { "wss" } else { "ws" };
    Some(format!("{ws_scheme}://{rest}"))
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_string()))
}

fn make_node(
    name: String,
    url: String,
    kind: NodeKind,
    chain_type: Option<String>,
    service_type: &str,
) -> NodeConfig {
    let mut metadata = HashMap::new();
    metadata.insert("service_type".to_string(), service_type.to_string());
    NodeConfig {
        name,
        url,
        api_url: None,
        websocket_url: None,
        http_url: None,
        r#type: kind,
        chain_type,
        weight: 1,
        metadata,
    }
}

/// Expands `environment.*_servers` lists and `chain.auto_discover_from_env`
/// env-vars into `Config::nodes`. Idempotent-ish: runs once
/// at load time, mutating `cfg.nodes` in place; explicit `nodes[]` entries
/// are left untouched and generated nodes are appended after them.
pub fn expand_environment(cfg: &mut Config) {
    let chain_type = cfg.chain.as_ref().and_then(|c| c.chain_type.clone());
    let preset = cfg.chain.as_ref().and_then(|c| c.chain_preset);
    if let Some(p) = preset {
        apply_preset(cfg, p);
    }
    let default_kind = preset_default_kind(preset);

    let mut env = cfg.environment.clone().unwrap_or(super::EnvironmentConfig {
        rpc_servers: None,
        api_servers: None,
        websocket_servers: None,
        evm_servers: None,
        evm_ws_servers: None,
        generic_servers: None,
    });

    if let Some(prefix) = cfg.chain.as_ref().and_then(|c| c.auto_discover_from_env.clone()) {
        env.rpc_servers = env.rpc_servers.or_else(|| std::env::var(format!("{prefix}_RPC_SERVERS")).ok());
        env.api_servers = env.api_servers.or_else(|| std::env::var(format!("{prefix}_API_SERVERS")).ok());
        env.websocket_servers =
            env.websocket_servers.or_else(|| std::env::var(format!("{prefix}_WS_SERVERS")).ok());
        env.generic_servers =
            env.generic_servers.or_else(|| std::env::var(format!("{prefix}_SERVERS")).ok());
        debug!(prefix = %prefix, "auto-discovered servers from environment");
    }

    let mut generated = Vec::new();

    if let Some(list) = &env.rpc_servers {
        for (i, url) in split_servers(list).into_iter().enumerate() {
            generated.push(make_node(
                format!("rpc-{i}"),
                url,
                NodeKind::Cosmos,
                chain_type.clone(),
                "rpc",
            ));
        }
    }
    if let Some(list) = &env.api_servers {
        for (i, url) in split_servers(list).into_iter().enumerate() {
            let mut node = make_node(format!("api-{i}"), url, NodeKind::Cosmos, chain_type.clone(), "api");
            node.api_url = Some(node.url.clone());
            generated.push(node);
        }
    }
    if let Some(list) = &env.websocket_servers {
        for (i, url) in split_servers(list).into_iter().enumerate() {
            let ws = cosmos_ws_url(&url).unwrap_or_else(|| url.clone());
            let mut node = make_node(
                format!("ws-{i}"),
                url,
                NodeKind::Cosmos,
                chain_type.clone(),
                "websocket",
            );
            node.websocket_url = Some(ws);
            generated.push(node);
        }
    }

    let evm_http: Vec<String> = env.evm_servers.as_deref().map(split_servers).unwrap_or_default();
    if !evm_http.is_empty() {
        for (i, url) in evm_http.iter().enumerate() {
            generated.push(make_node(
                format!("evm-{i}"),
                url.clone(),
                NodeKind::Evm,
                chain_type.clone(),
                "evm",
            ));
        }
    }
    if let Some(list) = &env.evm_ws_servers {
        let ws_urls = split_servers(list);
        for (i, ws_url) in ws_urls.iter().enumerate() {
            // Correlate by positional index first, falling back to hostname
            // match, so probes reach an HTTP endpoint even when traffic flows
            // over WebSocket.
            let http_peer = evm_http.get(i).cloned().or_else(|| {
                let ws_host = host_of(ws_url);
                evm_http.iter().find(|h| host_of(h) == ws_host).cloned()
            });
            let mut node = make_node(
                format!("evm-ws-{i}"),
                ws_url.clone(),
                NodeKind::Evm,
                chain_type.clone(),
                "websocket",
            );
            match http_peer {
                Some(http_url) => {
                    node.websocket_url = evm_ws_url(&http_url).or_else(|| Some(ws_url.clone()));
                    node.http_url = Some(http_url.clone());
                    node.metadata.insert("http_url".to_string(), http_url);
                }
                None => warn!(ws_url = %ws_url, "no HTTP peer found to correlate with EVM WebSocket node"),
            }
            generated.push(node);
        }
    }
    if let Some(list) = &env.generic_servers {
        for (i, url) in split_servers(list).into_iter().enumerate() {
            generated.push(make_node(
                format!("generic-{i}"),
                url,
                default_kind,
                chain_type.clone(),
                "generic",
            ));
        }
    }

    if !generated.is_empty() {
        debug!(count = generated.len(), "expanded environment-discovered nodes");
        cfg.nodes.extend(generated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentConfig;

    #[test]
    fn evm_websocket_servers_correlate_positionally_with_http_peers() {
        let mut cfg = Config {
            environment: Some(EnvironmentConfig {
                rpc_servers: None,
                api_servers: None,
                websocket_servers: None,
                evm_servers: Some("http://a:8545 http://b:8545".to_string()),
                evm_ws_servers: Some("http://a:8546 http://b:8546".to_string()),
                generic_servers: None,
            }),
            ..Default::default()
        };

        expand_environment(&mut cfg);

        assert_eq!(cfg.nodes.len(), 4);
        let ws_nodes: Vec<_> = cfg.nodes.iter().filter(|n| n.is_websocket_service()).collect();
        assert_eq!(ws_nodes.len(), 2);
        assert_eq!(ws_nodes[0].http_peer_url(), Some("http://a:8545"));
        assert_eq!(ws_nodes[1].http_peer_url(), Some("http://b:8545"));
    }

    #[test]
    fn cosmos_websocket_url_synthesis() {
        assert_eq!(cosmos_ws_url("http://host:26657").as_deref(), Some("ws://host:26657/websocket"));
        assert_eq!(cosmos_ws_url("https://host:443").as_deref(), Some("wss://host:443/websocket"));
    }
}
