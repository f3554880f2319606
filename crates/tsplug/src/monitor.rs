//! Periodic health monitor
//!
//! Runs independently of job processing and only reads shared state.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::dispatcher::JobDispatcher;

#[async_trait]
pub trait MonitorHook: Send + Sync {
    fn name(&self) -> &str;

    async fn tick(&self);
}

/// Logs dispatcher counters on every tick
pub struct DispatcherStatsHook {
    dispatcher: Arc<JobDispatcher>,
}

impl DispatcherStatsHook {
    pub fn new(dispatcher: Arc<JobDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl MonitorHook for DispatcherStatsHook {
    fn name(&self) -> &str {
        "dispatcher-stats"
    }

    async fn tick(&self) {
        let stats = self.dispatcher.stats();
        info!(
            workers = stats.workers,
            queued = stats.queued,
            running = stats.running,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "dispatcher health"
        );
    }
}

pub struct HealthMonitor {
    interval: Duration,
    hooks: Vec<Arc<dyn MonitorHook>>,
    shutdown: Arc<Notify>,
}

impl HealthMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            hooks: Vec::new(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn MonitorHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Handle that stops [`HealthMonitor::run`] when notified
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), hooks = self.hooks.len(), "Health monitor started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Health monitor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.interval) => {
                    for hook in &self.hooks {
                        debug!(hook = hook.name(), "running monitor hook");
                        hook.tick().await;
                    }
                }
            }
        }

        info!("Health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook(AtomicUsize);

    #[async_trait]
    impl MonitorHook for CountingHook {
        fn name(&self) -> &str {
            "counting"
        }

        async fn tick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_runs_hooks_until_shutdown() {
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        let monitor = Arc::new(HealthMonitor::new(Duration::from_millis(5)).with_hook(hook.clone()));
        let shutdown = monitor.shutdown_handle();

        let runner = monitor.clone();
        let task = tokio::spawn(async move { runner.run().await });

        while hook.0.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.notify_one();
        task.await.unwrap();
    }
}
