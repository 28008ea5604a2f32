use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use logdist_common::Analyzer;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Periodic health probe over the analyzer registry.
///
/// Each tick re-evaluates every analyzer's health and stamps its
/// `last_health_check`. The probe here is simulated: an analyzer is
/// healthy with probability `1 - health_failure_rate`, so a rate of 0.0
/// pins every analyzer healthy and 1.0 pins every analyzer unhealthy.
/// When at least one analyzer flipped during a tick, the supplied
/// callback runs exactly once so the load balancer can re-seed its
/// weights.
pub struct HealthMonitor {
    analyzers: HashMap<String, Arc<Analyzer>>,
    interval: Duration,
    failure_rate: f64,
}

impl HealthMonitor {
    pub fn new(
        analyzers: HashMap<String, Arc<Analyzer>>,
        interval: Duration,
        failure_rate: f64,
    ) -> Self {
        Self {
            analyzers,
            interval,
            failure_rate,
        }
    }

    /// Starts the monitor loop. The first probe runs one full interval
    /// after spawn; the loop exits promptly on cancellation.
    pub fn spawn<F>(self, cancel: CancellationToken, on_health_change: F) -> JoinHandle<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if self.check_analyzers() {
                            on_health_change();
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        })
    }

    /// Probes every analyzer once. Returns true when any health flag
    /// flipped.
    fn check_analyzers(&self) -> bool {
        let mut changed = false;

        for analyzer in self.analyzers.values() {
            let was_healthy = analyzer.is_healthy();
            let healthy = rand::thread_rng().gen::<f64>() >= self.failure_rate;

            analyzer.set_healthy(healthy);
            analyzer.touch_health_check();

            if was_healthy != healthy {
                changed = true;
                info!(
                    "analyzer {} ({}) health changed to {}",
                    analyzer.id, analyzer.name, healthy
                );
            }
        }

        changed
    }
}
