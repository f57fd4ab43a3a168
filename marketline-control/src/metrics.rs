//! `metrics() -> prometheus-compatible text` (spec §4.8/§6). A minimal
//! hand-rolled text exporter over atomic counters/gauges - this crate
//! does not depend on a metrics-registry crate, since the handful of
//! counters threaded through from `marketline-bus`/`marketline-storage`
//! already exist as plain `AtomicU64`s; this just formats them.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One named, optionally-labelled gauge/counter sample.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: Vec<(&'static str, String)>,
    pub value: u64,
}

/// A registry of named counters. Components register a counter once at
/// startup and hold the returned `Arc<AtomicU64>` themselves; this type
/// only owns the name/help/label metadata needed to render them.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<(&'static str, Vec<(&'static str, String)>), (&'static str, Arc<AtomicU64>)>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_counter(&self, name: &'static str, help: &'static str, labels: Vec<(&'static str, String)>) -> Arc<AtomicU64> {
        let counter = Arc::new(AtomicU64::new(0));
        self.counters.write().insert((name, labels), (help, counter.clone()));
        counter
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.counters
            .read()
            .iter()
            .map(|((name, labels), (help, counter))| Sample {
                name,
                help,
                labels: labels.clone(),
                value: counter.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Render every registered counter as Prometheus text exposition
    /// format (`# HELP` / `# TYPE` / one line per label-set).
    pub fn render(&self) -> String {
        let mut output = String::new();
        let mut seen_help = std::collections::HashSet::new();

        for sample in self.samples() {
            if seen_help.insert(sample.name) {
                let _ = writeln!(output, "# HELP {} {}", sample.name, sample.help);
                let _ = writeln!(output, "# TYPE {} counter", sample.name);
            }

            if sample.labels.is_empty() {
                let _ = writeln!(output, "{} {}", sample.name, sample.value);
            } else {
                let rendered_labels = sample
                    .labels
                    .iter()
                    .map(|(key, value)| format!("{key}=\"{value}\""))
                    .collect::<Vec<_>>()
                    .join(",");
                let _ = writeln!(output, "{}{{{}}} {}", sample.name, rendered_labels, sample.value);
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_help_type_and_value_lines() {
        let registry = MetricsRegistry::new();
        let counter = registry.register_counter(
            "marketline_bus_published_total",
            "Number of records published to the bus",
            vec![("exchange", "binance_spot".to_string())],
        );
        counter.fetch_add(42, Ordering::Relaxed);

        let text = registry.render();
        assert!(text.contains("# HELP marketline_bus_published_total"));
        assert!(text.contains("# TYPE marketline_bus_published_total counter"));
        assert!(text.contains("marketline_bus_published_total{exchange=\"binance_spot\"} 42"));
    }
}
