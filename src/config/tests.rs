use super::*;
use std::io::Write;

#[test]
fn defaults_when_file_absent() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let file = Config::load_file_config(&missing);
    assert!(file.store.is_none());
    assert!(file.kafka.is_none());
}

#[test]
fn file_sections_parse_independently_of_domain_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rtds.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
bind_addr = "0.0.0.0:9999"

[scan]
cycle_ms = 250

[store]
db_url = "/var/lib/rtds/rtds.db"
batch_size = 50

[kafka]
bootstrap_servers = "kafka:9092"
topic = "custom-topic"

[[connectors]]
name = "sim1"
connection_string = "connector=simulator"
cycle_ms = 1000

[[tags]]
name = "t1"
type = "float"
source = "func=line;scale=1"
"#
    )
    .unwrap();

    let file = Config::load_file_config(&path);
    assert_eq!(file.bind_addr.as_deref(), Some("0.0.0.0:9999"));
    assert_eq!(file.scan.unwrap().cycle_ms, Some(250));
    let store = file.store.unwrap();
    assert_eq!(store.db_url.as_deref(), Some("/var/lib/rtds/rtds.db"));
    assert_eq!(store.batch_size, Some(50));
    let kafka = file.kafka.unwrap();
    assert_eq!(kafka.bootstrap_servers.as_deref(), Some("kafka:9092"));
    assert_eq!(kafka.topic.as_deref(), Some("custom-topic"));
}

#[test]
fn malformed_file_sections_fall_back_to_defaults_without_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rtds.toml");
    std::fs::write(&path, "not valid toml [[[").unwrap();
    let file = Config::load_file_config(&path);
    assert!(file.store.is_none());
}

#[test]
fn config_default_matches_documented_defaults() {
    let config = Config::default();
    assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8090");
    assert_eq!(config.scan_cycle, std::time::Duration::from_millis(100));
    assert_eq!(config.store.batch_size, 100);
    assert_eq!(config.store.history_hours, 24);
    assert_eq!(config.kafka.group_id, "rtds-consumer");
}
