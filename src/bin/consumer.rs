//! Standalone bus consumer process (spec §4.9). Expected to run under a
//! process supervisor that captures stdout, so logging has no file sink.

use anyhow::Result;
use clap::Parser;
use rtds::cli::Cli;
use rtds::config::Config;
use rtds::consumer::{ConsumerConfig, HistoryConsumer};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load(Cli::parse());
    let _guard = rtds::logging::init("rtds-consumer", &config.logging.level, None);

    tracing::info!(
        bootstrap_servers = %config.kafka.bootstrap_servers,
        topic = %config.kafka.topic,
        group_id = %config.kafka.group_id,
        "starting rtds-consumer"
    );

    let consumer = HistoryConsumer::new(ConsumerConfig {
        db_url: config.store.db_url.clone(),
        bootstrap_servers: config.kafka.bootstrap_servers.clone(),
        topic: config.kafka.topic.clone(),
        group_id: config.kafka.group_id.clone(),
        session_timeout_ms: config.kafka.session_timeout_ms,
        auto_commit_interval_ms: config.kafka.auto_commit_interval_ms,
    })?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("ctrl-c received, shutting down");
    let _ = shutdown_tx.send(true);
    let _ = consumer_handle.await;

    tracing::info!("shutdown complete");
    Ok(())
}
