//! RTDS scan-loop process: loads config, starts the store writer and the
//! connector/script scan loop, and serves the HTTP API alongside it. The
//! forwarder and consumer are separate binaries (`src/bin/forwarder.rs`,
//! `src/bin/consumer.rs`) so a deployment can scale or restart them
//! independently of the scan loop.

use anyhow::Result;
use clap::Parser;
use rtds::api::{self, ApiState};
use rtds::cli::Cli;
use rtds::config::{Config, TomlConfigSource};
use rtds::metrics::MetricsSink;
use rtds::scan::ScanLoop;
use rtds::store::{build_pool, Store};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load(Cli::parse());

    let log_dir = std::env::var("RTDS_LOG_DIR").ok().map(std::path::PathBuf::from);
    let _guard = rtds::logging::init("rtds", &config.logging.level, log_dir.as_deref());

    tracing::info!(bind = %config.bind_addr, config_path = %config.config_path.display(), "starting rtds");

    let (metrics_sink, metrics) = MetricsSink::new(1024)?;
    let metrics_task = tokio::spawn(metrics_sink.run());

    let (store, store_tx) = Store::spawn(
        &config.store.db_url,
        config.store.batch_size,
        config.store.history_hours,
        1024,
        metrics.clone(),
    )?;

    let config_source: Arc<dyn rtds::config::ConfigSource> =
        Arc::new(TomlConfigSource::new(config.config_path.clone()));

    let (mut scan_loop, command_tx) = ScanLoop::bootstrap(
        config_source.clone(),
        config.store.db_url.clone(),
        config.scan_cycle,
        256,
        store_tx,
        metrics.clone(),
    )
    .await?;

    let pool = build_pool(&config.store.db_url)?;
    let api_state = ApiState {
        config_source,
        command_tx,
        pool,
    };
    let router = api::router(api_state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let http_shutdown_rx = shutdown_rx.clone();
    let http_handle = tokio::spawn(async move {
        let mut rx = http_shutdown_rx;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = rx.changed().await;
            })
            .await
    });

    let scan_handle = tokio::spawn(async move {
        loop {
            match scan_loop.run().await {
                Ok(()) => unreachable!("ScanLoop::run only returns on error"),
                Err(e) if e.is_fatal() => {
                    tracing::error!("scan loop terminated: {e}");
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("scan loop cycle error, continuing: {e}");
                }
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received, shutting down");
        }
        result = scan_handle => {
            match result {
                Ok(Err(e)) => tracing::error!("scan loop exited: {e}"),
                Err(e) => tracing::error!("scan loop task panicked: {e}"),
                Ok(Ok(())) => {}
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = http_handle.await;

    drop(metrics);
    let _ = metrics_task.await;

    store.join()?;

    tracing::info!("shutdown complete");
    Ok(())
}
