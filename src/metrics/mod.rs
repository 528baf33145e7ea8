//! Typed metric messages, forwarded to Prometheus counters/histograms
//! (spec §4.10). HTTP exposition is an external collaborator — this sink
//! only owns the registry and a `gather()` snapshot method.

use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry, CounterVec,
    HistogramVec, Registry,
};
use tokio::sync::mpsc;

/// The name of a metric message. Mirrors the enum named in the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricName {
    ScanCycleLatency,
    TagCounter,
    ConnectorCounter,
    ConnectorDuration,
    StoreDuration,
    ScriptDuration,
    KafkaProducerDuration,
}

/// A single metric observation, carrying whatever labels its kind needs.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: MetricName,
    pub value: f64,
    pub labels: Vec<(&'static str, String)>,
}

impl Metric {
    pub fn counter(name: MetricName, value: f64, labels: Vec<(&'static str, String)>) -> Self {
        Self { name, value, labels }
    }

    pub fn duration(
        name: MetricName,
        method: &'static str,
        status: &'static str,
        seconds: f64,
    ) -> Self {
        Self {
            name,
            value: seconds,
            labels: vec![("method", method.to_string()), ("status", status.to_string())],
        }
    }

    /// A duration observation for a metric registered with a single
    /// `status` label (the forwarder's `rtds_kafka_producer_duration_seconds`).
    pub fn status_duration(name: MetricName, status: &'static str, seconds: f64) -> Self {
        Self {
            name,
            value: seconds,
            labels: vec![("status", status.to_string())],
        }
    }
}

/// Handle used by producers (connectors, store, scan loop, forwarder) to
/// emit metrics without holding the registry themselves.
#[derive(Clone)]
pub struct MetricsHandle {
    tx: mpsc::Sender<Metric>,
}

impl MetricsHandle {
    pub fn record(&self, m: Metric) {
        // Metrics are best-effort: a full channel just drops the sample.
        let _ = self.tx.try_send(m);
    }
}

/// The sink: owns the Prometheus registry and all registered metric
/// families, reads from a channel and routes each message to a counter or
/// histogram. Histogram buckets are component-specific per §4.10 (broad for
/// connector/store, narrow for script/scan-cycle).
pub struct MetricsSink {
    registry: Registry,
    scan_cycle_latency: HistogramVec,
    tag_counter: CounterVec,
    connector_counter: CounterVec,
    connector_duration: HistogramVec,
    store_duration: HistogramVec,
    script_duration: HistogramVec,
    kafka_producer_duration: HistogramVec,
    rx: mpsc::Receiver<Metric>,
}

const BROAD_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const NARROW_BUCKETS: &[f64] = &[0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5];

impl MetricsSink {
    pub fn new(channel_buffer: usize) -> anyhow::Result<(Self, MetricsHandle)> {
        let registry = Registry::new();

        let scan_cycle_latency = register_histogram_vec_with_registry!(
            "rtds_scan_cycle_latency_seconds",
            "Duration of one scan cycle",
            &[],
            NARROW_BUCKETS.to_vec(),
            registry
        )?;
        let tag_counter = register_counter_vec_with_registry!(
            "rtds_tag_count",
            "Number of tags registered from config",
            &[],
            registry
        )?;
        let connector_counter = register_counter_vec_with_registry!(
            "rtds_connector_count",
            "Number of connectors registered from config",
            &[],
            registry
        )?;
        let connector_duration = register_histogram_vec_with_registry!(
            "rtds_connector_duration_seconds",
            "Duration of a connector lifecycle method",
            &["method", "status"],
            BROAD_BUCKETS.to_vec(),
            registry
        )?;
        let store_duration = register_histogram_vec_with_registry!(
            "rtds_store_duration_seconds",
            "Duration of a store operation",
            &["method", "status"],
            BROAD_BUCKETS.to_vec(),
            registry
        )?;
        let script_duration = register_histogram_vec_with_registry!(
            "rtds_script_duration_seconds",
            "Duration of a script run",
            &["script", "status"],
            NARROW_BUCKETS.to_vec(),
            registry
        )?;
        let kafka_producer_duration = register_histogram_vec_with_registry!(
            "rtds_kafka_producer_duration_seconds",
            "Duration of a forwarder send cycle",
            &["status"],
            BROAD_BUCKETS.to_vec(),
            registry
        )?;

        let (tx, rx) = mpsc::channel(channel_buffer);

        Ok((
            Self {
                registry,
                scan_cycle_latency,
                tag_counter,
                connector_counter,
                connector_duration,
                store_duration,
                script_duration,
                kafka_producer_duration,
                rx,
            },
            MetricsHandle { tx },
        ))
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Snapshot of all families, for an external exposition surface to
    /// serve. Exposition itself (the HTTP `/metrics` server) is out of
    /// scope — see spec §4.10.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    fn route(&self, m: Metric) {
        let label_values: Vec<&str> = m.labels.iter().map(|(_, v)| v.as_str()).collect();
        match m.name {
            MetricName::ScanCycleLatency => {
                self.scan_cycle_latency.with_label_values(&[]).observe(m.value);
            }
            MetricName::TagCounter => {
                self.tag_counter.with_label_values(&[]).inc_by(m.value);
            }
            MetricName::ConnectorCounter => {
                self.connector_counter.with_label_values(&[]).inc_by(m.value);
            }
            MetricName::ConnectorDuration => {
                self.connector_duration
                    .with_label_values(&label_values)
                    .observe(m.value);
            }
            MetricName::StoreDuration => {
                self.store_duration
                    .with_label_values(&label_values)
                    .observe(m.value);
            }
            MetricName::ScriptDuration => {
                self.script_duration
                    .with_label_values(&label_values)
                    .observe(m.value);
            }
            MetricName::KafkaProducerDuration => {
                self.kafka_producer_duration
                    .with_label_values(&label_values)
                    .observe(m.value);
            }
        }
    }

    /// Runs until every `MetricsHandle` is dropped, then exits cleanly
    /// (cancellation per §5).
    pub async fn run(mut self) {
        while let Some(m) = self.rx.recv().await {
            self.route(m);
        }
        tracing::debug!("metrics sink shutting down");
    }
}
