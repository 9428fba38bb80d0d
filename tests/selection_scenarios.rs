use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;

use healthproxy_select::breaker::BreakerRegistry;
use healthproxy_select::cache::HealthCache;
use healthproxy_select::checker::HealthChecker;
use healthproxy_select::config::{
    BlockValidationConfig, Config, FailureHandlingConfig, HealthCheckConfig, NodeConfig, NodeKind,
};
use healthproxy_select::selector::{RequestInfo, Selector};

fn node(name: &str, url: String, kind: NodeKind, chain_type: Option<&str>, service_type: &str) -> NodeConfig {
    let mut metadata = HashMap::new();
    metadata.insert("service_type".to_string(), service_type.to_string());
    NodeConfig {
        name: name.to_string(),
        url,
        api_url: None,
        websocket_url: None,
        http_url: None,
        r#type: kind,
        chain_type: chain_type.map(|s| s.to_string()),
        weight: 1,
        metadata,
    }
}

fn fast_config(nodes: Vec<NodeConfig>) -> Config {
    Config {
        nodes,
        health_check: HealthCheckConfig {
            interval_ms: 15_000,
            timeout_ms: 1_000,
            retry_attempts: 1,
            retry_delay_ms: 10,
        },
        block_validation: BlockValidationConfig {
            height_threshold: 5,
            external_reference_threshold: 10,
        },
        failure_handling: FailureHandlingConfig {
            min_healthy_nodes: 1,
            grace_period_ms: 60_000,
            circuit_breaker_threshold: 0.8,
        },
        ..Default::default()
    }
}

async fn run_sweep(cfg: Config) -> (Vec<healthproxy_select::NodeHealth>, Arc<HealthChecker>) {
    let cfg = Arc::new(cfg);
    let cache = Arc::new(HealthCache::new(Duration::from_secs(30)));
    let breakers = Arc::new(BreakerRegistry::new(cfg.failure_handling.failure_threshold()));
    let checker = Arc::new(HealthChecker::new(cfg, cache, breakers).expect("checker"));
    let healths = checker.check_all_nodes(Duration::from_secs(5)).await.expect("sweep");
    (healths, checker)
}

fn mock_cosmos_status(server: &MockServer, height: u64, catching_up: bool) {
    server.mock(|when, then| {
        when.method(GET).path("/status");
        then.status(200).json_body(json!({
            "result": {
                "sync_info": {
                    "latest_block_height": height.to_string(),
                    "catching_up": catching_up
                }
            }
        }));
    });
}

fn mock_evm_block_number(server: &MockServer, height: u64) {
    server.mock(|when, then| {
        when.method(POST);
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": format!("0x{:x}", height)
        }));
    });
}

#[tokio::test]
async fn pool_leader_lag_marks_laggard_unhealthy() {
    let leader = MockServer::start();
    let middle = MockServer::start();
    let laggard = MockServer::start();
    mock_cosmos_status(&leader, 100_000, false);
    mock_cosmos_status(&middle, 99_998, false);
    mock_cosmos_status(&laggard, 99_990, false);

    let cfg = fast_config(vec![
        node("leader", leader.base_url(), NodeKind::Cosmos, None, "rpc"),
        node("middle", middle.base_url(), NodeKind::Cosmos, None, "rpc"),
        node("laggard", laggard.base_url(), NodeKind::Cosmos, None, "rpc"),
    ]);
    let cache = Arc::new(HealthCache::new(Duration::from_secs(30)));
    let breakers = Arc::new(BreakerRegistry::new(cfg.failure_handling.failure_threshold()));
    let cfg = Arc::new(cfg);
    let checker = Arc::new(HealthChecker::new(Arc::clone(&cfg), Arc::clone(&cache), breakers).unwrap());
    let healths = checker.check_all_nodes(Duration::from_secs(5)).await.unwrap();

    let by_name: HashMap<_, _> = healths.into_iter().map(|h| (h.name.clone(), h)).collect();
    assert!(by_name["leader"].healthy);
    assert!(by_name["middle"].healthy);
    assert!(!by_name["laggard"].healthy);
    assert_eq!(by_name["laggard"].blocks_behind_pool, 10);

    let selector = Selector::new(cfg, cache, checker);
    let upstreams = selector.get_upstreams(&RequestInfo::new()).await.unwrap();
    assert_eq!(upstreams.len(), 2);
}

#[tokio::test]
async fn catching_up_node_is_excluded_from_selection() {
    let healthy = MockServer::start();
    let catching_up = MockServer::start();
    mock_cosmos_status(&healthy, 12_345, false);
    mock_cosmos_status(&catching_up, 12_340, true);

    let cfg = fast_config(vec![
        node("healthy", healthy.base_url(), NodeKind::Cosmos, None, "rpc"),
        node("catching-up", catching_up.base_url(), NodeKind::Cosmos, None, "rpc"),
    ]);
    let cache = Arc::new(HealthCache::new(Duration::from_secs(30)));
    let breakers = Arc::new(BreakerRegistry::new(cfg.failure_handling.failure_threshold()));
    let cfg = Arc::new(cfg);
    let checker = Arc::new(HealthChecker::new(Arc::clone(&cfg), Arc::clone(&cache), breakers).unwrap());
    checker.check_all_nodes(Duration::from_secs(5)).await.unwrap();

    let selector = Selector::new(cfg, cache, checker);
    let upstreams = selector.get_upstreams(&RequestInfo::new()).await.unwrap();
    assert_eq!(upstreams.len(), 1);
}

#[tokio::test]
async fn evm_error_response_is_unhealthy_with_code_in_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST);
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "Server error"}
        }));
    });

    let cfg = fast_config(vec![node("evm-a", server.base_url(), NodeKind::Evm, None, "evm")]);
    let (healths, _checker) = run_sweep(cfg).await;
    assert_eq!(healths.len(), 1);
    assert!(!healths[0].healthy);
    assert!(healths[0].last_error.as_deref().unwrap().contains("-32000"));
}

#[tokio::test]
async fn different_chain_types_never_affect_each_other() {
    let eth = MockServer::start();
    let base = MockServer::start();
    mock_evm_block_number(&eth, 36_282_000);
    mock_evm_block_number(&base, 23_485_000);

    let cfg = fast_config(vec![
        node("eth", eth.base_url(), NodeKind::Evm, Some("ethereum"), "evm"),
        node("base", base.base_url(), NodeKind::Evm, Some("base"), "evm"),
    ]);
    let (healths, _checker) = run_sweep(cfg).await;
    assert!(healths.iter().all(|h| h.healthy));
}

#[tokio::test]
async fn evm_websocket_node_is_probed_via_its_http_peer() {
    let http_peer = MockServer::start();
    let mock = http_peer.mock(|when, then| {
        when.method(POST);
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": "0x1229800"
        }));
    });

    let mut ws_node = node(
        "evm-ws",
        "ws://127.0.0.1:1/does-not-exist".to_string(),
        NodeKind::Evm,
        None,
        "websocket",
    );
    ws_node.http_url = Some(http_peer.base_url());

    let cfg = fast_config(vec![ws_node]);
    let (healths, _checker) = run_sweep(cfg).await;

    assert_eq!(healths.len(), 1);
    assert!(healths[0].healthy, "probe should follow http_url, not dial the websocket url");
    assert_eq!(healths[0].block_height, 0x1229800);
    mock.assert();
}

#[tokio::test]
async fn all_unhealthy_falls_back_to_full_set() {
    let a = MockServer::start();
    let b = MockServer::start();
    a.mock(|when, then| {
        when.method(GET).path("/status");
        then.status(500);
    });
    b.mock(|when, then| {
        when.method(GET).path("/status");
        then.status(500);
    });

    let cfg = fast_config(vec![
        node("a", a.base_url(), NodeKind::Cosmos, None, "rpc"),
        node("b", b.base_url(), NodeKind::Cosmos, None, "rpc"),
    ]);
    let cache = Arc::new(HealthCache::new(Duration::from_secs(30)));
    let breakers = Arc::new(BreakerRegistry::new(cfg.failure_handling.failure_threshold()));
    let cfg = Arc::new(cfg);
    let checker = Arc::new(HealthChecker::new(Arc::clone(&cfg), Arc::clone(&cache), breakers).unwrap());
    checker.check_all_nodes(Duration::from_secs(5)).await.unwrap();

    let selector = Selector::new(cfg, cache, checker);
    let upstreams = selector.get_upstreams(&RequestInfo::new()).await.unwrap();
    assert_eq!(upstreams.len(), 2, "fallback-all should serve every node with a parseable host");
}

#[tokio::test]
async fn empty_nodes_returns_no_nodes_configured_error() {
    let cfg = fast_config(vec![]);
    let cache = Arc::new(HealthCache::new(Duration::from_secs(30)));
    let breakers = Arc::new(BreakerRegistry::new(cfg.failure_handling.failure_threshold()));
    let checker = HealthChecker::new(Arc::new(cfg), cache, breakers).unwrap();
    let err = checker.check_all_nodes(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, healthproxy_select::SelectorError::NoNodesConfigured));
}
