//! Standalone history forwarder process (spec §4.8). Expected to run under a
//! process supervisor that captures stdout, so logging has no file sink.

use anyhow::Result;
use clap::Parser;
use rtds::cli::Cli;
use rtds::config::Config;
use rtds::forwarder::{Forwarder, ForwarderConfig};
use rtds::metrics::MetricsSink;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load(Cli::parse());
    let _guard = rtds::logging::init("rtds-forwarder", &config.logging.level, None);

    tracing::info!(
        bootstrap_servers = %config.kafka.bootstrap_servers,
        topic = %config.kafka.topic,
        "starting rtds-forwarder"
    );

    let (metrics_sink, metrics) = MetricsSink::new(256)?;
    let metrics_task = tokio::spawn(metrics_sink.run());

    let forwarder = Forwarder::new(
        ForwarderConfig {
            db_url: config.store.db_url.clone(),
            bootstrap_servers: config.kafka.bootstrap_servers.clone(),
            topic: config.kafka.topic.clone(),
            batch_size: config.kafka.batch_size,
            poll_interval: Duration::from_millis(500),
            send_timeout: Duration::from_secs(5),
        },
        metrics.clone(),
    )?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let forward_handle = tokio::spawn(forwarder.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("ctrl-c received, shutting down");
    let _ = shutdown_tx.send(true);
    let _ = forward_handle.await;

    drop(metrics);
    let _ = metrics_task.await;

    tracing::info!("shutdown complete");
    Ok(())
}
