use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::cache::HealthCache;
use crate::checker::HealthChecker;
use crate::config::Config;
use crate::error::SelectorError;
use crate::metrics;
use crate::probe::NodeHealth;

/// Adapter so the selector can classify an arbitrary host framework's
/// request type without depending on it. The host implements this for its
/// own request struct; [`RequestInfo`] is the bundled implementation used
/// by the CLI binary and tests.
pub trait RequestHeaders {
    fn header(&self, name: &str) -> Option<&str>;
}

#[derive(Debug, Default, Clone)]
pub struct RequestInfo {
    headers: std::collections::HashMap<String, String>,
}

impl RequestInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }
}

impl RequestHeaders for RequestInfo {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

/// One backend the host reverse-proxy may dial.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Upstream {
    pub dial: String,
    pub max_requests: Option<u32>,
}

fn is_websocket_upgrade(req: &impl RequestHeaders) -> bool {
    let wants_upgrade = req
        .header("connection")
        .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);
    let is_websocket = req
        .header("upgrade")
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    wants_upgrade && is_websocket
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

/// Parses a node URL into a `host:port` dial string the host proxy can
/// connect to directly. Returns `None` (with the caller responsible for the
/// exclusion metric) on an empty host or unparseable URL.
fn dial_string(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host.is_empty() {
        return None;
    }
    let port = parsed.port().or_else(|| default_port(parsed.scheme()))?;
    Some(format!("{host}:{port}"))
}

/// Request-path function turning cached health into the live upstream set.
/// Strictly read-only on the cache except for the cold-start fallback.
pub struct Selector {
    config: Arc<Config>,
    cache: Arc<HealthCache>,
    checker: Arc<HealthChecker>,
}

impl Selector {
    pub fn new(config: Arc<Config>, cache: Arc<HealthCache>, checker: Arc<HealthChecker>) -> Self {
        Self { config, cache, checker }
    }

    pub async fn get_upstreams(&self, request: &impl RequestHeaders) -> Result<Vec<Upstream>, SelectorError> {
        let names: Vec<String> = self.config.nodes.iter().map(|n| n.name.clone()).collect();

        if !self.cache.all_names_present(&names) {
            // Cold-start only: steady-state traffic never hits this branch
            // because the scheduler keeps the cache populated.
            let cold_start_timeout = Duration::from_millis(self.config.health_check.timeout_ms.min(5_000));
            if let Err(e) = self.checker.check_all_nodes(cold_start_timeout).await {
                warn!(error = %e, "cold-start health sweep failed");
            }
        }

        let healths = self.cache.get_all(&names);
        let wants_websocket = is_websocket_upgrade(request);

        let mut selected = Vec::new();
        let mut healthy_count = 0usize;
        for node in &self.config.nodes {
            let service_type = node.service_type().unwrap_or("").to_string();
            let is_ws_node = node.is_websocket_service();
            if wants_websocket != is_ws_node {
                let reason = if wants_websocket { "filtered_websocket" } else { "filtered_http" };
                metrics::record_upstream_excluded(&node.name, &service_type, reason);
                continue;
            }

            let Some(health) = healths.get(&node.name) else {
                metrics::record_upstream_excluded(&node.name, &service_type, "unhealthy");
                continue;
            };
            if !health.healthy {
                metrics::record_upstream_excluded(&node.name, &service_type, "unhealthy");
                continue;
            }

            let Some(dial) = dial_string(&node.url) else {
                let reason = if Url::parse(&node.url).is_ok() { "empty_host" } else { "invalid_url" };
                metrics::record_upstream_excluded(&node.name, &service_type, reason);
                continue;
            };

            healthy_count += 1;
            metrics::record_upstream_included(&node.name, &service_type, "healthy");
            selected.push(Upstream {
                dial,
                max_requests: if node.weight > 1 { Some(node.weight) } else { None },
            });
        }

        if healthy_count < self.config.failure_handling.min_healthy_nodes {
            if healthy_count > 0 {
                warn!(
                    healthy_count,
                    min_healthy_nodes = self.config.failure_handling.min_healthy_nodes,
                    "fewer healthy upstreams than the configured minimum; continuing with what is available"
                );
            } else {
                warn!("no healthy upstreams available; falling back to the full configured set");
                selected = self.fallback_all(&healths, wants_websocket);
            }
        }

        if selected.is_empty() {
            return Err(SelectorError::NoUpstreamsAvailable);
        }
        Ok(selected)
    }

    /// Emergency policy: rebuild the list from every cached result
    /// regardless of health, applying the same service-type and URL-validity
    /// filters.
    fn fallback_all(
        &self,
        healths: &std::collections::HashMap<String, NodeHealth>,
        wants_websocket: bool,
    ) -> Vec<Upstream> {
        let mut out = Vec::new();
        for node in &self.config.nodes {
            let is_ws_node = node.is_websocket_service();
            if wants_websocket != is_ws_node {
                continue;
            }
            if !healths.contains_key(&node.name) {
                continue;
            }
            let service_type = node.service_type().unwrap_or("").to_string();
            let Some(dial) = dial_string(&node.url) else {
                metrics::record_upstream_excluded(&node.name, &service_type, "invalid_url");
                continue;
            };
            metrics::record_upstream_included(&node.name, &service_type, "fallback_all");
            out.push(Upstream {
                dial,
                max_requests: if node.weight > 1 { Some(node.weight) } else { None },
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_classification() {
        let req = RequestInfo::new()
            .with_header("Connection", "keep-alive, Upgrade")
            .with_header("Upgrade", "WebSocket");
        assert!(is_websocket_upgrade(&req));

        let plain = RequestInfo::new();
        assert!(!is_websocket_upgrade(&plain));

        let wrong_upgrade = RequestInfo::new().with_header("Connection", "upgrade").with_header("Upgrade", "h2c");
        assert!(!is_websocket_upgrade(&wrong_upgrade));
    }

    #[test]
    fn dial_string_parses_host_and_port() {
        assert_eq!(dial_string("http://example.com:8545").as_deref(), Some("example.com:8545"));
        assert_eq!(dial_string("https://example.com").as_deref(), Some("example.com:443"));
        assert_eq!(dial_string("not a url"), None);
    }
}
