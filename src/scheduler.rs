use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::checker::HealthChecker;

/// Each full sweep is bounded at 30s regardless of the configured interval.
const SWEEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives the [`HealthChecker`] on a single periodic timer -- the
/// concurrency limit lives on the fan-out, not on the scheduler, which never
/// spawns a task per node.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Scheduler {
    pub fn start(checker: Arc<HealthChecker>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match checker.check_all_nodes(SWEEP_TIMEOUT).await {
                            Ok(healths) => {
                                let healthy = healths.iter().filter(|h| h.healthy).count();
                                info!(healthy, total = healths.len(), "scheduled health sweep complete");
                            }
                            Err(e) => error!(error = %e, "scheduled health sweep failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("health check scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        });
        Self { shutdown_tx, handle }
    }

    /// Signals shutdown; the scheduler exits on its next select iteration.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
