use super::*;
use crate::model::{TagData, TagType};

fn snapshot() -> (Snapshot, mpsc::Receiver<TagValue>) {
    let (tx, rx) = mpsc::channel(16);
    (Snapshot::new(tx), rx)
}

#[tokio::test]
async fn set_applies_locally_and_logs_change() {
    let (mut snap, mut rx) = snapshot();
    snap.add(Tag::new("t1", TagType::Float, "sim", 0.0, 10.0, true, None));

    snap.set(TagValue::new("t1", TagData::Float(15.0), 0))
        .await
        .unwrap();

    let current = snap.get("t1").unwrap();
    assert_eq!(current.value, TagData::Float(10.0));
    assert_eq!(current.status, -1);

    let logged = rx.try_recv().unwrap();
    assert_eq!(logged.value, TagData::Float(10.0));
}

#[tokio::test]
async fn set_skips_store_when_not_loggable() {
    let (mut snap, mut rx) = snapshot();
    snap.add(Tag::new("t1", TagType::Int, "sim", 0.0, 0.0, false, None));

    snap.set(TagValue::new("t1", TagData::Int(42), 0))
        .await
        .unwrap();

    assert!(rx.try_recv().is_err());
    assert_eq!(snap.get("t1").unwrap().value, TagData::Int(42));
}

#[tokio::test]
async fn set_routes_to_connector_write_queue() {
    let (mut snap, _store_rx) = snapshot();
    snap.add(Tag::new(
        "t1",
        TagType::Bool,
        "C:0:1",
        0.0,
        0.0,
        false,
        Some("plc1".to_string()),
    ));
    let (wq_tx, mut wq_rx) = mpsc::channel(8);
    snap.register_write_queue("plc1", wq_tx);

    snap.set(TagValue::new("t1", TagData::Bool(true), 0))
        .await
        .unwrap();

    // Routed to the connector, not applied locally yet.
    assert!(snap.get("t1").is_none());
    let routed = wq_rx.try_recv().unwrap();
    assert_eq!(routed.value, TagData::Bool(true));
}

#[tokio::test]
async fn set_on_unknown_tag_is_schema_error() {
    let (mut snap, _rx) = snapshot();
    let err = snap
        .set(TagValue::new("ghost", TagData::Int(1), 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RtdsError::Schema(_)));
}

#[tokio::test]
async fn apply_rejects_wrong_type() {
    let (mut snap, _rx) = snapshot();
    snap.add(Tag::new("t1", TagType::Int, "sim", 0.0, 0.0, false, None));
    let err = snap
        .apply(TagValue::new("t1", TagData::Float(1.0), 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RtdsError::Schema(_)));
}
