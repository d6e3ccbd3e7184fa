//! Counter emission.
//!
//! The rest of the crate only talks to [`MetricsSink`]; production wires it to
//! an OpenTelemetry meter, tests to `RecordingMetrics`.

use std::collections::HashMap;
use std::sync::Mutex;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};

/// Outbound HTTP calls, labelled by `method`, `route`, `status`.
pub const HTTP: &str = "http";
/// Gateway lifecycle signals, labelled by `type`.
pub const EVENTS: &str = "events";
/// Gateway dispatch frames, labelled by `type`.
pub const DISPATCH: &str = "dispatch";
pub const GUILDS_JOIN: &str = "guilds_join";
pub const GUILDS_LEAVE: &str = "guilds_leave";

/// One label on a counter increment.
pub type Label = (&'static str, String);

/// Append-only counter store keyed by (name, label set).
pub trait MetricsSink: Send + Sync + 'static {
    fn increment(&self, counter: &'static str, labels: &[Label]);
}

impl<M: MetricsSink + ?Sized> MetricsSink for std::sync::Arc<M> {
    fn increment(&self, counter: &'static str, labels: &[Label]) {
        (**self).increment(counter, labels);
    }
}

/// OpenTelemetry-backed sink. Counters are built on first use.
pub struct OtelMetricsSink {
    meter: Meter,
    counters: Mutex<HashMap<&'static str, Counter<u64>>>,
}

impl OtelMetricsSink {
    pub fn new(meter: Meter) -> Self {
        Self {
            meter,
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn counter(&self, name: &'static str) -> Counter<u64> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        counters
            .entry(name)
            .or_insert_with(|| self.meter.u64_counter(name).build())
            .clone()
    }
}

impl MetricsSink for OtelMetricsSink {
    fn increment(&self, counter: &'static str, labels: &[Label]) {
        let attrs: Vec<KeyValue> = labels
            .iter()
            .map(|(key, value)| KeyValue::new(*key, value.clone()))
            .collect();
        self.counter(counter).add(1, &attrs);
    }
}
