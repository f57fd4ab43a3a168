//! `start(config)`/`stop(grace)`/`reload` (spec §4.8): the process-level
//! wiring that constructs the bus bindings plus whichever role(s) the
//! config selects, and coordinates graceful shutdown across them.

use crate::config::{Config, Role};
use crate::health::{ComponentStatus, HealthRegistry};
use crate::metrics::MetricsRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// A started component that can be asked to stop within a grace period.
/// `marketline-bus`'s `Publisher::run`/`marketline-storage`'s
/// `StorageConsumer` and venue sessions are all driven through this
/// uniform shape so `stop(grace)` doesn't need to know their concrete
/// types.
#[async_trait::async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &'static str;
    async fn stop(&self, grace: Duration);
}

/// The running process: health/metrics registries plus whichever
/// components `start()` constructed for the selected role.
pub struct Runtime {
    pub config: Config,
    pub health: HealthRegistry,
    pub metrics: Arc<MetricsRegistry>,
    components: Vec<Arc<dyn Component>>,
    http_task: Option<tokio::task::JoinHandle<()>>,
}

impl Runtime {
    /// Construct the control-plane scaffolding (health/metrics registries,
    /// HTTP surface) for `config`. The caller is responsible for
    /// registering the role-specific components (C1-C5 for ingester,
    /// C7 for storage) via [`Runtime::register`] - this crate does not
    /// depend on `marketline-data`'s session/normalizer machinery to avoid
    /// a dependency cycle, since `marketline-control` is the outermost
    /// crate the `marketline` binary wires together.
    pub fn start(config: Config) -> Self {
        info!(role = ?config.role, http_port = config.http_port, "starting control plane");
        let health = HealthRegistry::new();
        let metrics = Arc::new(MetricsRegistry::new());

        let http_task = {
            let health = health.clone();
            let metrics = metrics.clone();
            let port = config.http_port;
            Some(tokio::spawn(async move {
                if let Err(error) = crate::http::serve(port, health, metrics).await {
                    error!(%error, "control plane HTTP surface exited");
                }
            }))
        };

        Self {
            config,
            health,
            metrics,
            components: Vec::new(),
            http_task,
        }
    }

    pub fn register(&mut self, component: Arc<dyn Component>) {
        self.health.set(component.name(), ComponentStatus::Healthy);
        self.components.push(component);
    }

    /// Stop accepting new work and flush every registered component within
    /// `grace` (spec §4.8: "C4 stops scheduling; C1 closes sessions; C5
    /// drains its queue up to `grace`; C7 flushes in-flight batches").
    /// Components are stopped concurrently, each bounded by the same
    /// `grace` budget.
    pub async fn stop(mut self, grace: Duration) {
        info!(?grace, components = self.components.len(), "stopping control plane");
        let stops = self
            .components
            .drain(..)
            .map(|component| async move { component.stop(grace).await });
        futures::future::join_all(stops).await;

        if let Some(task) = self.http_task.take() {
            task.abort();
        }
    }

    pub fn is_role(&self, role: Role) -> bool {
        self.config.role == role
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingComponent {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Component for RecordingComponent {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn stop(&self, _grace: Duration) {
            self.stopped.store(true, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn stop_drains_every_registered_component() {
        let mut runtime = Runtime::start(Config::default());
        let stopped = Arc::new(AtomicBool::new(false));
        runtime.register(Arc::new(RecordingComponent { stopped: stopped.clone() }));

        runtime.stop(Duration::from_secs(1)).await;

        assert!(stopped.load(Ordering::Relaxed));
    }
}
