use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::HealthCache;
use crate::checker::ExternalStatusBoard;
use crate::config::Config;

#[derive(Debug, Serialize)]
pub struct NodeCounts {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

#[derive(Debug, Serialize)]
pub struct ExternalReferenceStatus {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CacheSnapshot {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub cache_duration_ms: u64,
}

/// The thin, read-only JSON projection of core state served at the optional
/// `/health` endpoint. Never issues a probe.
#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub nodes: NodeCounts,
    pub external_references: HashMap<String, ExternalReferenceStatus>,
    pub cache: CacheSnapshot,
    pub last_check: Option<DateTime<Utc>>,
}

impl HealthSnapshot {
    pub fn healthy_enough(&self, min_healthy_nodes: usize) -> bool {
        self.nodes.healthy >= min_healthy_nodes
    }
}

pub fn snapshot(config: &Config, cache: &HealthCache, external: &ExternalStatusBoard) -> HealthSnapshot {
    let names: Vec<String> = config.nodes.iter().map(|n| n.name.clone()).collect();
    let healths = cache.get_all(&names);

    let total = config.nodes.len();
    let healthy = healths.values().filter(|h| h.healthy).count();
    let last_check = healths.values().map(|h| h.last_check).max();

    let external_references = external
        .snapshot()
        .into_iter()
        .map(|(name, status)| {
            (
                name,
                ExternalReferenceStatus {
                    reachable: status.reachable,
                    block_height: status.block_height,
                    error: status.error,
                },
            )
        })
        .collect();

    let cache_stats = cache.stats();
    HealthSnapshot {
        status: if healthy >= config.failure_handling.min_healthy_nodes { "ok" } else { "degraded" },
        timestamp: Utc::now(),
        nodes: NodeCounts {
            total,
            healthy,
            unhealthy: total.saturating_sub(healthy),
        },
        external_references,
        cache: CacheSnapshot {
            total_entries: cache_stats.total_entries,
            valid_entries: cache_stats.valid_entries,
            expired_entries: cache_stats.expired_entries,
            cache_duration_ms: cache_stats.cache_duration_ms,
        },
        last_check,
    }
}
