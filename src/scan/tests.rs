use super::*;
use crate::config::{ConnectorDef, RtdsConfig, ScriptDef, TagDef};
use crate::metrics::MetricsSink;
use std::sync::Mutex;

/// In-memory `ConfigSource` whose contents the test can swap out between
/// `load()` calls, to exercise RELOAD without touching the filesystem.
struct MemConfigSource {
    config: Mutex<RtdsConfig>,
}

impl MemConfigSource {
    fn new(config: RtdsConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }

    fn replace(&self, config: RtdsConfig) {
        *self.config.lock().unwrap() = config;
    }
}

impl ConfigSource for MemConfigSource {
    fn load(&self) -> anyhow::Result<RtdsConfig> {
        Ok(self.config.lock().unwrap().clone())
    }

    fn save(&self, config: &RtdsConfig) -> anyhow::Result<()> {
        *self.config.lock().unwrap() = config.clone();
        Ok(())
    }
}

fn one_sim_tag_config() -> RtdsConfig {
    let mut config = RtdsConfig::default();
    config.connectors.push(ConnectorDef {
        name: "sim1".to_string(),
        connection_string: "connector=simulator".to_string(),
        cycle_ms: 10,
    });
    config.tags.push(TagDef {
        name: "t1".to_string(),
        tag_type: "float".to_string(),
        source: "func=line;scale=7".to_string(),
        min: 0.0,
        max: 0.0,
        is_log: true,
        connector: Some("sim1".to_string()),
        description: None,
    });
    config
}

async fn test_metrics() -> MetricsHandle {
    let (sink, handle) = MetricsSink::new(64).unwrap();
    tokio::spawn(sink.run());
    handle
}

#[tokio::test]
async fn bootstrap_wires_a_simulator_connector_into_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let db_url = dir.path().join("rtds.db").to_str().unwrap().to_string();
    let (store_tx, mut store_rx) = mpsc::channel(64);
    let metrics = test_metrics().await;
    let source = Arc::new(MemConfigSource::new(one_sim_tag_config()));

    let (mut scan, _cmd_tx) = ScanLoop::bootstrap(
        source,
        db_url,
        Duration::from_millis(20),
        16,
        store_tx,
        metrics,
    )
    .await
    .unwrap();

    assert!(scan.snapshot.contains("t1"));

    // Give the simulator connector a cycle to produce a read, then scan.
    tokio::time::sleep(Duration::from_millis(40)).await;
    scan.scan_cycle().await;

    let current = scan.snapshot.get("t1").unwrap();
    assert_eq!(current.value, crate::model::TagData::Float(7.0));

    // is_log == true, so the change should have reached the store channel.
    let logged = store_rx.try_recv().unwrap();
    assert_eq!(logged.name, "t1");
}

#[tokio::test]
async fn dead_connector_worker_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let db_url = dir.path().join("rtds.db").to_str().unwrap().to_string();
    let (store_tx, _store_rx) = mpsc::channel(64);
    let metrics = test_metrics().await;
    let source = Arc::new(MemConfigSource::new(one_sim_tag_config()));

    let (mut scan, _cmd_tx) = ScanLoop::bootstrap(
        source,
        db_url,
        Duration::from_millis(20),
        16,
        store_tx,
        metrics,
    )
    .await
    .unwrap();

    // Force the connector worker to exit by sending cancel directly.
    for handle in &scan.connectors {
        let _ = handle.cancel_tx.send(true);
    }
    // Give the task a moment to actually finish.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(scan.check_processes(), Err(RtdsError::Fatal(_))));
}

#[tokio::test]
async fn reload_rebuilds_connectors_from_new_config() {
    let dir = tempfile::tempdir().unwrap();
    let db_url = dir.path().join("rtds.db").to_str().unwrap().to_string();
    let (store_tx, _store_rx) = mpsc::channel(64);
    let metrics = test_metrics().await;
    let source = Arc::new(MemConfigSource::new(one_sim_tag_config()));

    let (mut scan, command_tx) = ScanLoop::bootstrap(
        source.clone(),
        db_url,
        Duration::from_millis(20),
        16,
        store_tx,
        metrics,
    )
    .await
    .unwrap();

    assert_eq!(scan.connectors.len(), 1);
    assert!(scan.snapshot.contains("t1"));

    let mut new_config = one_sim_tag_config();
    new_config.connectors[0].name = "sim2".to_string();
    new_config.tags[0].name = "t2".to_string();
    new_config.tags[0].connector = Some("sim2".to_string());
    source.replace(new_config);

    command_tx.send(Command::Reload).await.unwrap();
    scan.handle_commands().await.unwrap();

    assert_eq!(scan.connectors.len(), 1);
    assert_eq!(scan.connectors[0].name, "sim2");
    assert!(!scan.snapshot.contains("t1"));
    assert!(scan.snapshot.contains("t2"));
}

#[tokio::test]
async fn unknown_command_is_logged_and_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let db_url = dir.path().join("rtds.db").to_str().unwrap().to_string();
    let (store_tx, _store_rx) = mpsc::channel(64);
    let metrics = test_metrics().await;
    let source = Arc::new(MemConfigSource::new(RtdsConfig::default()));

    let (mut scan, command_tx) = ScanLoop::bootstrap(
        source,
        db_url,
        Duration::from_millis(20),
        16,
        store_tx,
        metrics,
    )
    .await
    .unwrap();

    command_tx
        .send(Command::Unknown("FROB".to_string()))
        .await
        .unwrap();
    // Should not error.
    scan.handle_commands().await.unwrap();
}

#[tokio::test]
async fn script_writes_flow_through_scan_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let db_url = dir.path().join("rtds.db").to_str().unwrap().to_string();
    let (store_tx, mut store_rx) = mpsc::channel(64);
    let metrics = test_metrics().await;

    let mut config = RtdsConfig::default();
    config.tags.push(TagDef {
        name: "derived".to_string(),
        tag_type: "float".to_string(),
        source: "manual".to_string(),
        min: 0.0,
        max: 0.0,
        is_log: true,
        connector: None,
        description: None,
    });
    config.scripts.push(ScriptDef {
        name: "double".to_string(),
        cycle_ms: 1,
        is_active: true,
        body: "set(\"derived\", 21.0);".to_string(),
    });
    let source = Arc::new(MemConfigSource::new(config));

    let (mut scan, _cmd_tx) = ScanLoop::bootstrap(
        source,
        db_url,
        Duration::from_millis(5),
        16,
        store_tx,
        metrics,
    )
    .await
    .unwrap();

    scan.scan_cycle().await;

    let current = scan.snapshot.get("derived").unwrap();
    assert_eq!(current.value, crate::model::TagData::Float(21.0));
    let logged = store_rx.try_recv().unwrap();
    assert_eq!(logged.name, "derived");
}
