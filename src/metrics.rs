//! Thin wrapper over the `metrics` facade crate, naming exactly the series
//! this module exposes. Kept free of any concrete recorder so an embedding
//! host process can install whichever backend it wants; multiple engine
//! instances in one process share the process-wide registry the `metrics`
//! crate installs, so only one recorder needs to be set up regardless of
//! how many `Engine`s are running.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub fn record_check_total() {
    counter!("checks_total").increment(1);
}

pub fn set_node_gauges(healthy: u64, unhealthy: u64, configured: u64) {
    gauge!("healthy_nodes").set(healthy as f64);
    gauge!("unhealthy_nodes").set(unhealthy as f64);
    gauge!("configured_nodes").set(configured as f64);
}

pub fn record_check_duration(elapsed: Duration) {
    histogram!("check_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn set_block_height(node: &str, height: u64) {
    gauge!("block_height", "node" => node.to_string()).set(height as f64);
}

pub fn record_error(node: &str, kind: &str) {
    counter!("errors_total", "node" => node.to_string(), "kind" => kind.to_string()).increment(1);
}

pub fn record_upstream_included(node: &str, service_type: &str, reason: &str) {
    counter!(
        "upstreams_included_total",
        "node" => node.to_string(),
        "service_type" => service_type.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_upstream_excluded(node: &str, service_type: &str, reason: &str) {
    counter!(
        "upstreams_excluded_total",
        "node" => node.to_string(),
        "service_type" => service_type.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}
