//! Scan loop and supervisor (spec §4.5): drains connectors, applies values,
//! drives scripts, supervises the connector workers, and reacts to an
//! out-of-band RELOAD command.

use crate::config::{ConfigSource, ConnectorDef, RtdsConfig};
use crate::connector::{build_connector, ConnectionString};
use crate::error::RtdsError;
use crate::metrics::{Metric, MetricName, MetricsHandle};
use crate::model::{Tag, TagValue};
use crate::script::Script;
use crate::snapshot::Snapshot;
use crate::store;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[cfg(test)]
mod tests;

/// The single out-of-band command the API adapter can enqueue (spec §4.5).
/// Anything else the adapter hands us is logged and ignored, matching
/// "only RELOAD supported; others logged and ignored".
#[derive(Debug, Clone)]
pub enum Command {
    Reload,
    Unknown(String),
}

struct ConnectorHandle {
    name: String,
    cancel_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    read_rx: mpsc::Receiver<TagValue>,
}

/// State the scan loop owns exclusively: the snapshot, connectors, scripts,
/// and its command channel (spec §4.5 "State").
pub struct ScanLoop {
    snapshot: Snapshot,
    connectors: Vec<ConnectorHandle>,
    scripts: Vec<Script>,
    command_rx: mpsc::Receiver<Command>,
    metrics: MetricsHandle,
    config_source: Arc<dyn ConfigSource>,
    db_url: String,
    cycle: Duration,
    read_queue_buffer: usize,
}

impl ScanLoop {
    /// Startup (spec §4.5): load config, sync it into the store's config
    /// tables, populate the snapshot, and start one worker per connector.
    /// The store worker itself is started by the caller (`main.rs`) — this
    /// only needs `store_tx` to construct the `Snapshot`.
    #[allow(clippy::too_many_arguments)]
    pub async fn bootstrap(
        config_source: Arc<dyn ConfigSource>,
        db_url: String,
        cycle: Duration,
        read_queue_buffer: usize,
        store_tx: mpsc::Sender<TagValue>,
        metrics: MetricsHandle,
    ) -> anyhow::Result<(Self, mpsc::Sender<Command>)> {
        let rtds_config = config_source.load()?;
        store::sync_config(&db_url, &rtds_config)?;

        let mut snapshot = Snapshot::new(store_tx);
        for tag_def in &rtds_config.tags {
            snapshot.add(tag_def.to_tag()?);
        }

        let connectors = build_connectors(&rtds_config, read_queue_buffer, metrics.clone(), &mut snapshot)?;
        let scripts = build_scripts(&rtds_config);

        metrics.record(Metric::counter(MetricName::TagCounter, rtds_config.tags.len() as f64, vec![]));
        metrics.record(Metric::counter(
            MetricName::ConnectorCounter,
            rtds_config.connectors.len() as f64,
            vec![],
        ));

        let (command_tx, command_rx) = mpsc::channel(16);

        Ok((
            Self {
                snapshot,
                connectors,
                scripts,
                command_rx,
                metrics,
                config_source,
                db_url,
                cycle,
                read_queue_buffer,
            },
            command_tx,
        ))
    }

    /// Main loop (spec §4.5): `check_processes`, `scan_cycle`,
    /// `api_command_handler`, sleep — on a 100ms-by-default cadence.
    pub async fn run(&mut self) -> Result<(), RtdsError> {
        loop {
            self.check_processes()?;
            self.scan_cycle().await;
            self.handle_commands().await?;
            tokio::time::sleep(self.cycle).await;
        }
    }

    /// If any supervised connector worker has exited, that's fatal (spec
    /// §4.5 / §7 "Supervisor").
    fn check_processes(&self) -> Result<(), RtdsError> {
        for handle in &self.connectors {
            if handle.join.is_finished() {
                return Err(RtdsError::fatal(format!(
                    "connector worker '{}' exited unexpectedly",
                    handle.name
                )));
            }
        }
        Ok(())
    }

    async fn scan_cycle(&mut self) {
        let start = Instant::now();

        for handle in &mut self.connectors {
            let mut drained = Vec::new();
            while let Ok(v) = handle.read_rx.try_recv() {
                drained.push(v);
            }
            for v in drained {
                if let Err(e) = self.snapshot.apply(v).await {
                    tracing::warn!(connector = %handle.name, "scan_cycle: {e}");
                }
            }
        }

        let view = self.snapshot.view();
        for script in &mut self.scripts {
            let pending = script.run(&view, &self.metrics);
            for v in pending {
                if let Err(e) = self.snapshot.set(v).await {
                    tracing::warn!(script = %script.name, "script set() rejected: {e}");
                }
            }
        }

        self.metrics.record(Metric {
            name: MetricName::ScanCycleLatency,
            value: start.elapsed().as_secs_f64(),
            labels: vec![],
        });
    }

    async fn handle_commands(&mut self) -> Result<(), RtdsError> {
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                Command::Reload => {
                    tracing::info!("RELOAD received, restarting connector workers");
                    self.reload()
                        .await
                        .map_err(|e| RtdsError::Config(e.context("reload failed")))?;
                }
                Command::Unknown(other) => {
                    tracing::warn!("ignoring unsupported command: {other}");
                }
            }
        }
        Ok(())
    }

    /// Terminate every connector worker, join it, reload config, restart
    /// connector workers. Storage/forwarder/consumer workers are untouched
    /// (spec §4.5) — `self.snapshot`'s `store_tx` is reused as-is.
    async fn reload(&mut self) -> anyhow::Result<()> {
        for handle in self.connectors.drain(..) {
            let _ = handle.cancel_tx.send(true);
            let _ = handle.join.await;
        }

        let rtds_config = self.config_source.load()?;
        store::sync_config(&self.db_url, &rtds_config)?;

        let tags: anyhow::Result<Vec<Tag>> = rtds_config.tags.iter().map(|t| t.to_tag()).collect();
        self.snapshot.reset_tags(tags?);
        self.snapshot.clear_write_queues();

        self.connectors = build_connectors(
            &rtds_config,
            self.read_queue_buffer,
            self.metrics.clone(),
            &mut self.snapshot,
        )?;
        self.scripts = build_scripts(&rtds_config);

        Ok(())
    }
}

/// Build one worker per `[[connectors]]` entry, registering each
/// non-read-only connector's write queue on the snapshot. Unknown
/// `connector=<kind>` is a config error and aborts the whole reload/startup
/// (spec §4.2, §7 "Config").
fn build_connectors(
    rtds_config: &RtdsConfig,
    read_queue_buffer: usize,
    metrics: MetricsHandle,
    snapshot: &mut Snapshot,
) -> anyhow::Result<Vec<ConnectorHandle>> {
    let mut defs: Vec<&ConnectorDef> = rtds_config.connectors.iter().collect();
    defs.sort_by(|a, b| a.name.cmp(&b.name));

    let mut handles = Vec::with_capacity(defs.len());
    for def in defs {
        let owned_tags: Vec<Tag> = rtds_config
            .tags
            .iter()
            .filter(|t| t.connector.as_deref() == Some(def.name.as_str()))
            .map(|t| t.to_tag())
            .collect::<anyhow::Result<Vec<_>>>()?;

        let conn_str = ConnectionString::parse(&def.connection_string)?;
        let cycle = Duration::from_millis(def.cycle_ms);
        let conn = build_connector(&def.name, &conn_str, cycle, owned_tags)?;

        let (read_tx, read_rx) = mpsc::channel(read_queue_buffer);
        let write_rx = if conn.is_read_only() {
            None
        } else {
            let (write_tx, write_rx) = mpsc::channel::<TagValue>(read_queue_buffer);
            snapshot.register_write_queue(&def.name, write_tx);
            Some(write_rx)
        };
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let worker_metrics = metrics.clone();
        let join = tokio::spawn(async move {
            conn.run(read_tx, write_rx, worker_metrics, cancel_rx).await;
        });

        handles.push(ConnectorHandle {
            name: def.name.clone(),
            cancel_tx,
            join,
            read_rx,
        });
    }
    Ok(handles)
}

/// Compile scripts from `[[scripts]]` entries, in key order (spec §4.5
/// "for each script in key order"). A script with an empty body is logged
/// and skipped rather than aborting the whole load — unlike connectors,
/// one bad script shouldn't take the rest down.
fn build_scripts(rtds_config: &RtdsConfig) -> Vec<Script> {
    let mut defs: Vec<_> = rtds_config.scripts.iter().collect();
    defs.sort_by(|a, b| a.name.cmp(&b.name));

    defs.into_iter()
        .filter_map(|def| {
            match Script::new(
                def.name.clone(),
                Duration::from_millis(def.cycle_ms),
                def.is_active,
                def.body.clone(),
            ) {
                Ok(script) => Some(script),
                Err(e) => {
                    tracing::error!(script = %def.name, "failed to construct: {e}");
                    None
                }
            }
        })
        .collect()
}
