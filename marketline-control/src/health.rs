//! `health() -> {status, per-component-status}` (spec §4.8/§7): overall
//! status is `healthy` only if every component is; `unhealthy` if the bus
//! or the store specifically is unreachable (those two are load-bearing
//! for every other component); otherwise `degraded`.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// The two components whose unreachability takes the whole role down
/// rather than just degrading it (spec §7: "on the bus or the store being
/// unreachable... unhealthy").
const CRITICAL_COMPONENTS: [&str; 2] = ["bus", "store"];

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentStatus>,
}

/// Shared registry every component updates as its own health changes;
/// `/health` reads a snapshot of it.
#[derive(Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn set(&self, component: impl Into<String>, status: ComponentStatus) {
        self.components.write().insert(component.into(), status);
    }

    pub fn report(&self) -> HealthReport {
        let components = self.components.read().clone();
        HealthReport {
            status: aggregate(&components),
            components,
        }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn aggregate(components: &HashMap<String, ComponentStatus>) -> ComponentStatus {
    let any_critical_unhealthy = CRITICAL_COMPONENTS
        .iter()
        .any(|name| components.get(*name) == Some(&ComponentStatus::Unhealthy));
    if any_critical_unhealthy {
        return ComponentStatus::Unhealthy;
    }

    if components.values().any(|status| *status != ComponentStatus::Healthy) {
        return ComponentStatus::Degraded;
    }

    ComponentStatus::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_healthy_components_report_healthy_overall() {
        let registry = HealthRegistry::new();
        registry.set("bus", ComponentStatus::Healthy);
        registry.set("store", ComponentStatus::Healthy);
        assert_eq!(registry.report().status, ComponentStatus::Healthy);
    }

    #[test]
    fn degraded_session_downgrades_overall_status_to_degraded() {
        let registry = HealthRegistry::new();
        registry.set("bus", ComponentStatus::Healthy);
        registry.set("store", ComponentStatus::Healthy);
        registry.set("session:binance_spot", ComponentStatus::Degraded);
        assert_eq!(registry.report().status, ComponentStatus::Degraded);
    }

    #[test]
    fn unreachable_store_downgrades_overall_status_to_unhealthy() {
        let registry = HealthRegistry::new();
        registry.set("bus", ComponentStatus::Healthy);
        registry.set("store", ComponentStatus::Unhealthy);
        assert_eq!(registry.report().status, ComponentStatus::Unhealthy);
    }
}
