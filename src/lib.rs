//! Health Evaluation and Upstream Selection Engine: concurrent protocol
//! probes against blockchain RPC endpoints, a per-node circuit breaker and
//! cache, a block-height consistency validator, and the upstream selection
//! policy consumed by a host reverse-proxy through [`Engine::get_upstreams`].

pub mod breaker;
pub mod cache;
pub mod checker;
pub mod config;
pub mod error;
pub mod introspect;
pub mod metrics;
pub mod probe;
pub mod scheduler;
pub mod selector;

pub use config::{load_config, Config};
pub use error::{ConfigError, SelectorError};
pub use probe::NodeHealth;
pub use selector::{RequestHeaders, RequestInfo, Upstream};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use breaker::BreakerRegistry;
use cache::HealthCache;
use checker::HealthChecker;
use scheduler::Scheduler;
use selector::Selector;

/// Ties the engine to the host proxy's provision/validate/cleanup lifecycle.
/// A single instance owns its own cache, circuit breakers, and background
/// scheduler; instances are self-contained (no cross-process coordination).
pub struct Engine {
    config: Arc<Config>,
    cache: Arc<HealthCache>,
    checker: Arc<HealthChecker>,
    selector: Selector,
    scheduler: Option<Scheduler>,
    reaper_shutdown: Option<watch::Sender<bool>>,
}

impl Engine {
    /// `provision(host_context)`: builds internal state and starts the
    /// background scheduler and cache reaper. Does not validate the config
    /// on its own -- call [`Engine::validate`] first if you want to fail
    /// fast.
    pub fn provision(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let cache = Arc::new(HealthCache::new(Duration::from_millis(
            config.performance.cache_duration_ms,
        )));
        let breakers = Arc::new(BreakerRegistry::new(config.failure_handling.failure_threshold()));
        let checker = Arc::new(HealthChecker::new(
            Arc::clone(&config),
            Arc::clone(&cache),
            breakers,
        )?);
        let selector = Selector::new(Arc::clone(&config), Arc::clone(&cache), Arc::clone(&checker));

        let (reaper_shutdown, _reaper_handle) = cache::spawn_reaper(Arc::clone(&cache));
        let scheduler = Scheduler::start(
            Arc::clone(&checker),
            Duration::from_millis(config.health_check.interval_ms),
        );

        Ok(Self {
            config,
            cache,
            checker,
            selector,
            scheduler: Some(scheduler),
            reaper_shutdown: Some(reaper_shutdown),
        })
    }

    /// `validate()`: config sanity check. At least one node must be
    /// configured after environment-variable auto-discovery has run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.config.validate()
    }

    /// `GetUpstreams(request) -> ([]Upstream, error)`, the sole request-path
    /// hook the host proxy calls.
    pub async fn get_upstreams(
        &self,
        request: &impl RequestHeaders,
    ) -> Result<Vec<Upstream>, SelectorError> {
        self.selector.get_upstreams(request).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<HealthCache> {
        &self.cache
    }

    pub fn checker(&self) -> &Arc<HealthChecker> {
        &self.checker
    }

    pub fn health_snapshot(&self) -> introspect::HealthSnapshot {
        introspect::snapshot(&self.config, &self.cache, &self.checker.external_status)
    }

    /// `cleanup()`: stops background tasks. Idempotent.
    pub fn cleanup(&mut self) {
        if let Some(s) = self.scheduler.take() {
            s.stop();
        }
        if let Some(tx) = self.reaper_shutdown.take() {
            let _ = tx.send(true);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cleanup();
    }
}
