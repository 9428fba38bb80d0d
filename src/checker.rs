use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::breaker::BreakerRegistry;
use crate::cache::HealthCache;
use crate::config::{Config, NodeConfig};
use crate::error::{ErrorKind, SelectorError};
use crate::metrics;
use crate::probe::{self, NodeHealth};

/// Result of the last (uncached) probe of one [`crate::config::ExternalReference`],
/// kept only for the `/health` introspection projection -- the checker never
/// reads it back.
#[derive(Debug, Clone)]
pub struct ExternalStatus {
    pub reachable: bool,
    pub block_height: Option<u64>,
    pub error: Option<String>,
}

#[derive(Default)]
pub struct ExternalStatusBoard {
    statuses: RwLock<HashMap<String, ExternalStatus>>,
}

impl ExternalStatusBoard {
    pub fn snapshot(&self) -> HashMap<String, ExternalStatus> {
        self.statuses.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, name: &str, status: ExternalStatus) {
        self.statuses
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), status);
    }
}

/// Orchestrator: bounded-concurrency fan-out over all nodes, retry with
/// backoff, pool/external post-processing, metrics emission.
pub struct HealthChecker {
    config: Arc<Config>,
    cache: Arc<HealthCache>,
    breakers: Arc<BreakerRegistry>,
    client: Client,
    semaphore: Arc<Semaphore>,
    pub external_status: Arc<ExternalStatusBoard>,
}

impl HealthChecker {
    pub fn new(
        config: Arc<Config>,
        cache: Arc<HealthCache>,
        breakers: Arc<BreakerRegistry>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().build()?;
        let semaphore = Arc::new(Semaphore::new(config.performance.max_concurrent_checks.max(1)));
        Ok(Self {
            config,
            cache,
            breakers,
            client,
            semaphore,
            external_status: Arc::new(ExternalStatusBoard::default()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<HealthCache> {
        &self.cache
    }

    /// Fans out over every configured node, bounded by `sweep_timeout`
    /// (the scheduler uses 30s, the selector's cold-start path uses
    /// `min(health_check.timeout, 5s)`).
    pub async fn check_all_nodes(&self, sweep_timeout: Duration) -> Result<Vec<NodeHealth>, SelectorError> {
        if self.config.nodes.is_empty() {
            return Err(SelectorError::NoNodesConfigured);
        }
        let deadline = Instant::now() + sweep_timeout;
        let start = Instant::now();
        let max_concurrent = self.config.performance.max_concurrent_checks.max(1);

        // Fan-out is unordered (buffer_unordered); each task tags its slot
        // so the final vector matches Config.nodes order.
        let results = stream::iter(self.config.nodes.iter().enumerate())
            .map(|(idx, node)| async move { (idx, self.check_one(node, deadline).await) })
            .buffer_unordered(max_concurrent)
            .collect::<Vec<_>>()
            .await;

        let mut ordered: Vec<Option<NodeHealth>> = vec![None; self.config.nodes.len()];
        for (idx, health) in results {
            ordered[idx] = Some(health);
        }
        let mut healths: Vec<NodeHealth> = ordered.into_iter().map(|o| o.expect("every slot written")).collect();

        self.apply_pool_validation(&mut healths);
        self.apply_external_validation(&mut healths).await;

        let healthy = healths.iter().filter(|h| h.healthy).count() as u64;
        let total = healths.len() as u64;
        metrics::record_check_total();
        metrics::set_node_gauges(healthy, total - healthy, total);
        metrics::record_check_duration(start.elapsed());
        for h in &healths {
            metrics::set_block_height(&h.name, h.block_height);
            if let Some(kind) = h.last_error_kind {
                metrics::record_error(&h.name, kind.as_str());
            }
        }

        Ok(healths)
    }

    async fn check_one(&self, node: &NodeConfig, deadline: Instant) -> NodeHealth {
        if let Some(cached) = self.cache.get(&node.name) {
            return cached;
        }

        let breaker = self.breakers.get_or_insert(&node.name);
        if !breaker.should_allow() {
            return NodeHealth::synthetic_unhealthy(
                &node.name,
                &node.url,
                ErrorKind::Suppressed,
                "circuit breaker open",
            );
        }

        let now = Instant::now();
        if now >= deadline {
            return NodeHealth::synthetic_unhealthy(
                &node.name,
                &node.url,
                ErrorKind::Timeout,
                "cancelled before concurrency slot was acquired",
            );
        }
        let remaining = deadline - now;
        let permit = match tokio::time::timeout(remaining, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return NodeHealth::synthetic_unhealthy(
                    &node.name,
                    &node.url,
                    ErrorKind::Configuration,
                    "concurrency semaphore closed",
                );
            }
            Err(_) => {
                return NodeHealth::synthetic_unhealthy(
                    &node.name,
                    &node.url,
                    ErrorKind::Timeout,
                    "cancelled while waiting for a concurrency slot",
                );
            }
        };

        let health = self.probe_with_retry(node, deadline).await;
        drop(permit);

        if health.healthy {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
        self.cache.set(&node.name, health.clone());
        health
    }

    /// Up to `retry_attempts` attempts with a 1.5x backoff multiplier and no
    /// jitter. Cancellation is checked on every loop turn, not just after a
    /// successful attempt, so a deadline reached mid-retry breaks out
    /// immediately instead of sleeping through it.
    async fn probe_with_retry(&self, node: &NodeConfig, deadline: Instant) -> NodeHealth {
        let retry_attempts = self.config.health_check.retry_attempts.max(1);
        let probe_timeout = Duration::from_millis(self.config.health_check.timeout_ms);
        let mut delay = Duration::from_millis(self.config.health_check.retry_delay_ms);

        let mut attempt = 1u32;
        let mut outcome = probe::probe_node(&self.client, node, probe_timeout).await;
        while !outcome.healthy && attempt < retry_attempts {
            if Instant::now() >= deadline {
                break;
            }
            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let sleep_for = delay.min(remaining);
            tokio::time::sleep(sleep_for).await;
            if Instant::now() >= deadline {
                break;
            }
            outcome = probe::probe_node(&self.client, node, probe_timeout).await;
            delay = Duration::from_secs_f64(delay.as_secs_f64() * 1.5);
        }
        outcome
    }

    /// Groups *healthy* nodes by consistency key, finds the pool leader
    /// height within each group, and marks laggards unhealthy.
    fn apply_pool_validation(&self, healths: &mut [NodeHealth]) {
        let threshold = self.config.block_validation.height_threshold;
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, node) in self.config.nodes.iter().enumerate() {
            if healths[i].healthy {
                groups.entry(node.consistency_key()).or_default().push(i);
            }
        }
        for idxs in groups.values() {
            let max_height = idxs.iter().map(|&i| healths[i].block_height).max().unwrap_or(0);
            for &i in idxs {
                let behind = max_height as i64 - healths[i].block_height as i64;
                healths[i].blocks_behind_pool = behind;
                if behind > threshold {
                    healths[i].height_valid = false;
                    healths[i].healthy = false;
                    healths[i].last_error = Some(format!(
                        "{behind} blocks behind pool leader (leader height {max_height})"
                    ));
                    healths[i].last_error_kind = Some(ErrorKind::Semantics);
                }
            }
        }
    }

    /// Advisory-only comparison against enabled `ExternalReference`s,
    /// probed directly (never cached). Never affects `healthy`.
    async fn apply_external_validation(&self, healths: &mut [NodeHealth]) {
        let threshold = self.config.block_validation.external_reference_threshold;
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, node) in self.config.nodes.iter().enumerate() {
            groups.entry(node.consistency_key()).or_default().push(i);
        }

        let probe_timeout = Duration::from_millis(self.config.health_check.timeout_ms);
        for idxs in groups.values() {
            let protocol = self.config.nodes[idxs[0]].r#type;
            let Some(reference) = self
                .config
                .external_references
                .iter()
                .find(|r| r.enabled && r.r#type == protocol)
            else {
                continue;
            };

            let synthetic = NodeConfig {
                name: reference.name.clone(),
                url: reference.url.clone(),
                api_url: None,
                websocket_url: None,
                http_url: None,
                r#type: reference.r#type,
                chain_type: None,
                weight: 1,
                metadata: HashMap::new(),
            };
            let result = probe::probe_node(&self.client, &synthetic, probe_timeout).await;

            if result.block_height == 0 {
                warn!(reference = %reference.name, error = ?result.last_error, "external reference unreachable");
                self.external_status.set(
                    &reference.name,
                    ExternalStatus {
                        reachable: false,
                        block_height: None,
                        error: result.last_error.clone(),
                    },
                );
                continue;
            }

            self.external_status.set(
                &reference.name,
                ExternalStatus {
                    reachable: true,
                    block_height: Some(result.block_height),
                    error: None,
                },
            );

            for &i in idxs {
                let behind = result.block_height as i64 - healths[i].block_height as i64;
                healths[i].blocks_behind_external = behind;
                healths[i].external_reference_valid = behind <= threshold;
            }
        }
    }
}
