//! Wire format shared between the forwarder and the consumer (spec §6 "Bus
//! message format"): a JSON array of objects, one per history row, with
//! exactly one value slot populated per the tag's declared type.

use crate::model::{TagData, TagType};
use crate::store::{from_slots, to_slots};
use serde::{Deserialize, Serialize};

/// One history row as it crosses the bus.
///
/// `tg` is the tag's stable name (`tags.name`), matching
/// `examples/original_source/rtds/producers/kafka_producer.py`'s
/// `"tg": row.tag_id` (itself a name, not a surrogate integer) — the same
/// identifier config, the HTTP API, and the store all share, so the
/// consumer can correlate a message with a tag without inventing one.
///
/// The producer writes `sv` for array/string-projected values; the legacy
/// producer wrote `av` instead. `#[serde(alias = "av")]` lets the consumer
/// keep reading messages from the old producer without a migration step,
/// per the Open Question resolution in DESIGN.md (standardize on `sv`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub tg: String,
    pub tm: String,
    pub tp: String,
    pub st: i32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bv: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub iv: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fv: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default, alias = "av")]
    pub sv: Option<String>,
}

impl BusMessage {
    pub fn new(tag_name: impl Into<String>, tag_time: String, tag_type: TagType, status: i32, value: &TagData) -> Self {
        let (bv, iv, fv, sv) = to_slots(value);
        Self {
            tg: tag_name.into(),
            tm: tag_time,
            tp: tag_type.as_str().to_string(),
            st: status,
            bv,
            iv,
            fv,
            sv,
        }
    }

    /// Reconstruct the typed value this message carries, dispatching on
    /// `tp`. `None` if `tp` doesn't name a known tag type.
    pub fn value(&self) -> Option<TagData> {
        let tag_type = TagType::parse(&self.tp).ok()?;
        from_slots(tag_type, self.bv, self.iv, self.fv, self.sv.clone())
    }
}

/// Decode one message payload off the bus: a bare JSON array of
/// `BusMessage`, or — per the legacy compatibility path spec §4.9/§9 calls
/// out — a JSON string containing that same array, doubly-encoded.
pub fn decode_batch(bytes: &[u8]) -> anyhow::Result<Vec<BusMessage>> {
    let text = std::str::from_utf8(bytes).map_err(|e| anyhow::anyhow!("bus payload is not utf-8: {e}"))?;

    if let Ok(batch) = serde_json::from_str::<Vec<BusMessage>>(text) {
        return Ok(batch);
    }

    let wrapped: String = serde_json::from_str(text)
        .map_err(|e| anyhow::anyhow!("bus payload is neither a JSON array nor a JSON string: {e}"))?;
    tracing::warn!("decoding legacy doubly-encoded bus payload; producers should send a bare JSON array");
    serde_json::from_str(&wrapped).map_err(|e| anyhow::anyhow!("legacy bus payload did not decode to an array: {e}"))
}

/// Encode a batch as the single JSON document the forwarder sends as one
/// message (spec §4.8 step 6).
pub fn encode_batch(messages: &[BusMessage]) -> anyhow::Result<String> {
    serde_json::to_string(messages).map_err(|e| anyhow::anyhow!("failed to encode bus batch: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BusMessage {
        BusMessage::new("t1", "2026-01-01T00:00:00Z".to_string(), TagType::Float, 0, &TagData::Float(1.5))
    }

    #[test]
    fn roundtrips_through_encode_decode() {
        let batch = vec![sample()];
        let encoded = encode_batch(&batch).unwrap();
        let decoded = decode_batch(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn decodes_legacy_doubly_encoded_payload() {
        let batch = vec![sample()];
        let inner = encode_batch(&batch).unwrap();
        let wrapped = serde_json::to_string(&inner).unwrap();
        let decoded = decode_batch(wrapped.as_bytes()).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn accepts_legacy_av_key_as_sv() {
        let json = r#"[{"tg":"t1","tm":"2026-01-01T00:00:00Z","tp":"array","st":0,"av":"1,2,3"}]"#;
        let decoded = decode_batch(json.as_bytes()).unwrap();
        assert_eq!(decoded[0].sv.as_deref(), Some("1,2,3"));
        assert_eq!(decoded[0].value(), Some(TagData::Array(vec![1.0, 2.0, 3.0])));
    }

    #[test]
    fn garbage_payload_is_error() {
        assert!(decode_batch(b"not json at all").is_err());
    }

    #[test]
    fn value_reconstructs_typed_data() {
        let msg = sample();
        assert_eq!(msg.value(), Some(TagData::Float(1.5)));
    }
}
