//! Connector runtime: per-connector independent workers with read/write
//! queues, cycle pacing, and failure isolation (spec §4.2).

pub mod modbus;
pub mod simulator;

use crate::metrics::{Metric, MetricName, MetricsHandle};
use crate::model::{Tag, TagValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A parsed `k1=v1;k2=v2;...` connection string. The first key must be
/// `connector=<kind>` (enforced by the caller before construction).
#[derive(Debug, Clone, Default)]
pub struct ConnectionString {
    pub kind: String,
    pub fields: HashMap<String, String>,
}

impl ConnectionString {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let mut fields = HashMap::new();
        for pair in s.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("malformed connection string segment: {pair}"))?;
            fields.insert(k.trim().to_string(), v.trim().to_string());
        }
        let kind = fields
            .get("connector")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("connection string missing 'connector=<kind>'"))?;
        Ok(Self { kind, fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }
}

/// A tag source string broken into `key=v1;key=v2` fields, used by both the
/// simulator (`func=sin;period=60;scale=100`) and as a generic sub-parser.
pub fn parse_kv_source(s: &str) -> HashMap<String, String> {
    s.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Trait object contract for a connector (spec §4.2, §9's re-architecture of
/// duck-typed polymorphism into a small interface). `run()` is a provided
/// default calling the overridable hooks, one tokio task per connector.
#[async_trait]
pub trait Connector: Send {
    fn name(&self) -> &str;
    fn cycle(&self) -> Duration;
    fn is_read_only(&self) -> bool {
        true
    }

    /// Open the underlying resource. Default: no-op.
    async fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Read all owned tags, pushing TagValues onto `out`. Default: no-op.
    async fn read(&mut self, out: &mut Vec<TagValue>) -> anyhow::Result<()> {
        let _ = out;
        Ok(())
    }

    /// Drain and apply pending writes. Default: no-op (read-only connectors
    /// never have a write queue to drain).
    async fn write(&mut self, pending: Vec<TagValue>) -> anyhow::Result<()> {
        let _ = pending;
        Ok(())
    }

    /// Release the underlying resource. Default: no-op.
    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// The cycle loop described in spec §4.2. Exits on cancellation
    /// (`cancel` resolving) after completing `close()`.
    async fn run(
        mut self: Box<Self>,
        read_tx: mpsc::Sender<TagValue>,
        mut write_rx: Option<mpsc::Receiver<TagValue>>,
        metrics: MetricsHandle,
        mut cancel: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            if *cancel.borrow() {
                break;
            }
            let start_cycle_time = Instant::now();

            if let Err(e) = self.open().await {
                tracing::warn!(connector = self.name(), "open failed: {e}");
                metrics.record(Metric::duration(
                    MetricName::ConnectorDuration,
                    "open",
                    "error",
                    start_cycle_time.elapsed().as_secs_f64(),
                ));
            } else {
                metrics.record(Metric::duration(
                    MetricName::ConnectorDuration,
                    "open",
                    "ok",
                    start_cycle_time.elapsed().as_secs_f64(),
                ));
            }

            let read_start = Instant::now();
            let mut values = Vec::new();
            let read_status = match self.read(&mut values).await {
                Ok(()) => "ok",
                Err(e) => {
                    tracing::warn!(connector = self.name(), "read failed: {e}");
                    "error"
                }
            };
            metrics.record(Metric::duration(
                MetricName::ConnectorDuration,
                "read",
                read_status,
                read_start.elapsed().as_secs_f64(),
            ));
            for v in values {
                // Backpressure: connector read blocks on send when the scan
                // loop falls behind, per spec §9.
                if read_tx.send(v).await.is_err() {
                    tracing::warn!(connector = self.name(), "scan loop read queue closed");
                    break;
                }
            }

            if !self.is_read_only() {
                if let Some(rx) = write_rx.as_mut() {
                    let mut pending = Vec::new();
                    while let Ok(v) = rx.try_recv() {
                        pending.push(v);
                    }
                    if !pending.is_empty() {
                        let write_start = Instant::now();
                        let status = match self.write(pending).await {
                            Ok(()) => "ok",
                            Err(e) => {
                                tracing::warn!(connector = self.name(), "write failed: {e}");
                                "error"
                            }
                        };
                        metrics.record(Metric::duration(
                            MetricName::ConnectorDuration,
                            "write",
                            status,
                            write_start.elapsed().as_secs_f64(),
                        ));
                    }
                }
            }

            let elapsed = start_cycle_time.elapsed();
            let cycle = self.cycle();
            let remaining = cycle.saturating_sub(elapsed);
            if remaining > Duration::ZERO {
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            let _ = self.close().await;
                            return;
                        }
                    }
                }
            }

            metrics.record(Metric::duration(
                MetricName::ConnectorDuration,
                "cycle",
                "ok",
                start_cycle_time.elapsed().as_secs_f64(),
            ));
        }

        let _ = self.close().await;
    }
}

/// Build a connector from its kind, connection string, and owned tags.
/// Unknown kinds are a construction error (spec §4.2).
pub fn build_connector(
    name: &str,
    conn_str: &ConnectionString,
    cycle: Duration,
    tags: Vec<Tag>,
) -> anyhow::Result<Box<dyn Connector>> {
    match conn_str.kind.as_str() {
        "simulator" => Ok(Box::new(simulator::SimulatorConnector::new(
            name.to_string(),
            cycle,
            tags,
        )?)),
        "modbus" => Ok(Box::new(modbus::ModbusConnector::new(
            name.to_string(),
            cycle,
            conn_str,
            tags,
        )?)),
        other => Err(anyhow::anyhow!("unknown connector kind: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connection_string() {
        let cs = ConnectionString::parse("connector=modbus;host=10.0.0.1;port=502").unwrap();
        assert_eq!(cs.kind, "modbus");
        assert_eq!(cs.get("host"), Some("10.0.0.1"));
        assert_eq!(cs.get("port"), Some("502"));
    }

    #[test]
    fn missing_connector_key_is_error() {
        assert!(ConnectionString::parse("host=10.0.0.1").is_err());
    }

    #[test]
    fn malformed_segment_is_error() {
        assert!(ConnectionString::parse("connector=modbus;justakey").is_err());
    }

    #[test]
    fn build_unknown_kind_is_error() {
        let cs = ConnectionString::parse("connector=nonexistent").unwrap();
        let err = build_connector("c1", &cs, Duration::from_secs(1), vec![]).unwrap_err();
        assert!(err.to_string().contains("unknown connector kind"));
    }
}
