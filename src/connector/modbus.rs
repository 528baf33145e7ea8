//! Modbus/TCP connector (spec §4.4). The wire-level framing and PDU
//! encode/decode is the out-of-scope "Modbus wire parser" — `tokio-modbus`
//! owns that; this connector is responsible only for the source-string
//! grammar, the scan/pause cycle, and TagValue emission.

use super::{Connector, ConnectionString};
use crate::model::{Tag, TagData, TagValue};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;

/// `AREA:ADDR:COUNT` where AREA in {C, DI, RI, RH}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Area {
    Coil,
    DiscreteInput,
    InputRegister,
    HoldingRegister,
}

impl Area {
    fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "C" => Ok(Area::Coil),
            "DI" => Ok(Area::DiscreteInput),
            "RI" => Ok(Area::InputRegister),
            "RH" => Ok(Area::HoldingRegister),
            other => Err(anyhow::anyhow!("unknown modbus area: {other}")),
        }
    }

    fn is_writable(&self) -> bool {
        matches!(self, Area::Coil | Area::HoldingRegister)
    }
}

#[derive(Debug, Clone)]
struct ModbusTag {
    name: String,
    tag_type: crate::model::TagType,
    area: Area,
    addr: u16,
    count: u16,
}

impl ModbusTag {
    fn parse(tag: &Tag) -> anyhow::Result<Self> {
        let parts: Vec<&str> = tag.source.split(':').collect();
        if parts.len() != 3 {
            return Err(anyhow::anyhow!(
                "malformed modbus source for tag {}: {}",
                tag.name,
                tag.source
            ));
        }
        let area = Area::parse(parts[0])?;
        let addr: u16 = parts[1]
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid address in source {}", tag.source))?;
        let count: u16 = parts[2]
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid count in source {}", tag.source))?;
        Ok(Self {
            name: tag.name.clone(),
            tag_type: tag.tag_type,
            area,
            addr,
            count,
        })
    }
}

pub struct ModbusConnector {
    name: String,
    cycle: Duration,
    addr: SocketAddr,
    unit_id: u8,
    timeout: Duration,
    auto_open: bool,
    auto_close: bool,
    tags: Vec<ModbusTag>,
    ctx: Option<Context>,
}

impl ModbusConnector {
    pub fn new(
        name: String,
        cycle: Duration,
        conn_str: &ConnectionString,
        tags: Vec<Tag>,
    ) -> anyhow::Result<Self> {
        let host = conn_str
            .get("host")
            .ok_or_else(|| anyhow::anyhow!("modbus connector {name} missing host="))?;
        let port: u16 = conn_str
            .get("port")
            .unwrap_or("502")
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid port for modbus connector {name}"))?;
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid host/port for modbus connector {name}"))?;
        let unit_id: u8 = conn_str
            .get("unit_id")
            .unwrap_or("1")
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid unit_id for modbus connector {name}"))?;
        let timeout_secs: u64 = conn_str
            .get("timeout")
            .unwrap_or("5")
            .parse()
            .unwrap_or(5);
        let auto_open = conn_str.get("auto_open").unwrap_or("1") != "0";
        let auto_close = conn_str.get("auto_close").unwrap_or("0") != "0";

        let modbus_tags = tags
            .iter()
            .map(ModbusTag::parse)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            name,
            cycle,
            addr,
            unit_id,
            timeout: Duration::from_secs(timeout_secs),
            auto_open,
            auto_close,
            tags: modbus_tags,
            ctx: None,
        })
    }

    fn decode(tag: &ModbusTag, raw_bools: Option<Vec<bool>>, raw_words: Option<Vec<u16>>) -> TagData {
        if tag.count == 1 {
            if let Some(bits) = raw_bools {
                return TagData::Bool(bits[0]);
            }
            if let Some(words) = raw_words {
                return match tag.tag_type {
                    crate::model::TagType::Float => TagData::Float(words[0] as f64),
                    crate::model::TagType::Bool => TagData::Bool(words[0] != 0),
                    _ => TagData::Int(words[0] as i64),
                };
            }
        }
        if let Some(bits) = raw_bools {
            return TagData::Array(bits.into_iter().map(|b| if b { 1.0 } else { 0.0 }).collect());
        }
        if let Some(words) = raw_words {
            return TagData::Array(words.into_iter().map(|w| w as f64).collect());
        }
        TagData::Array(vec![])
    }
}

#[async_trait]
impl Connector for ModbusConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(&self) -> Duration {
        self.cycle
    }

    fn is_read_only(&self) -> bool {
        false
    }

    async fn open(&mut self) -> anyhow::Result<()> {
        if self.ctx.is_some() {
            return Ok(());
        }
        if !self.auto_open && self.ctx.is_none() {
            // auto_open=0 means the operator manages the connection
            // lifecycle out of band; treat as already open if never set.
        }
        let mut ctx = tokio::time::timeout(self.timeout, tcp::connect(self.addr)).await??;
        ctx.set_slave(Slave(self.unit_id));
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn read(&mut self, out: &mut Vec<TagValue>) -> anyhow::Result<()> {
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("modbus connector {} not connected", self.name))?;

        for tag in &self.tags {
            let timeout = self.timeout;
            let value = match tag.area {
                Area::Coil => {
                    let bits = tokio::time::timeout(timeout, ctx.read_coils(tag.addr, tag.count))
                        .await???;
                    Self::decode(tag, Some(bits), None)
                }
                Area::DiscreteInput => {
                    let bits =
                        tokio::time::timeout(timeout, ctx.read_discrete_inputs(tag.addr, tag.count))
                            .await???;
                    Self::decode(tag, Some(bits), None)
                }
                Area::InputRegister => {
                    let words = tokio::time::timeout(
                        timeout,
                        ctx.read_input_registers(tag.addr, tag.count),
                    )
                    .await???;
                    Self::decode(tag, None, Some(words))
                }
                Area::HoldingRegister => {
                    let words = tokio::time::timeout(
                        timeout,
                        ctx.read_holding_registers(tag.addr, tag.count),
                    )
                    .await???;
                    Self::decode(tag, None, Some(words))
                }
            };
            out.push(TagValue::new(tag.name.clone(), value, 0));
        }
        Ok(())
    }

    /// Queue-and-emit only: writable Modbus operations beyond that are out
    /// of scope, so this logs the pending value rather than issuing it to
    /// the device.
    async fn write(&mut self, pending: Vec<TagValue>) -> anyhow::Result<()> {
        for v in pending {
            let Some(tag) = self.tags.iter().find(|t| t.name == v.name) else {
                tracing::warn!(
                    connector = self.name.as_str(),
                    "write to tag not owned by this connector: {}",
                    v.name
                );
                continue;
            };
            if !tag.area.is_writable() {
                tracing::warn!("write to read-only modbus area for tag {}", v.name);
                continue;
            }
            tracing::debug!(connector = self.name.as_str(), tag = %v.name, value = ?v.value, "write tag");
        }
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        if self.auto_close {
            self.ctx = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TagType;

    fn modbus_tag(source: &str, tag_type: TagType) -> Tag {
        Tag::new("t1", tag_type, source, 0.0, 0.0, true, None)
    }

    #[test]
    fn parses_coil_source() {
        let tag = modbus_tag("C:0:10", TagType::Array);
        let parsed = ModbusTag::parse(&tag).unwrap();
        assert_eq!(parsed.area, Area::Coil);
        assert_eq!(parsed.addr, 0);
        assert_eq!(parsed.count, 10);
    }

    #[test]
    fn parses_holding_register_scalar() {
        let tag = modbus_tag("RH:100:1", TagType::Int);
        let parsed = ModbusTag::parse(&tag).unwrap();
        assert_eq!(parsed.area, Area::HoldingRegister);
        assert_eq!(parsed.count, 1);
    }

    #[test]
    fn malformed_source_is_error() {
        let tag = modbus_tag("C:0", TagType::Bool);
        assert!(ModbusTag::parse(&tag).is_err());
    }

    #[test]
    fn unknown_area_is_error() {
        let tag = modbus_tag("XX:0:1", TagType::Bool);
        assert!(ModbusTag::parse(&tag).is_err());
    }

    #[test]
    fn decode_scalar_coil() {
        let tag = ModbusTag {
            name: "t".into(),
            tag_type: TagType::Bool,
            area: Area::Coil,
            addr: 0,
            count: 1,
        };
        let decoded = ModbusConnector::decode(&tag, Some(vec![true]), None);
        assert_eq!(decoded, TagData::Bool(true));
    }

    #[test]
    fn decode_array_holding_registers() {
        let tag = ModbusTag {
            name: "t".into(),
            tag_type: TagType::Array,
            area: Area::HoldingRegister,
            addr: 0,
            count: 3,
        };
        let decoded = ModbusConnector::decode(&tag, None, Some(vec![1, 2, 3]));
        assert_eq!(decoded, TagData::Array(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn connection_string_fields_parsed() {
        let cs = ConnectionString::parse(
            "connector=modbus;host=127.0.0.1;port=1502;unit_id=3;timeout=2;auto_open=1;auto_close=0",
        )
        .unwrap();
        let tags = vec![modbus_tag("RH:0:1", TagType::Int)];
        let c = ModbusConnector::new("plc1".into(), Duration::from_secs(1), &cs, tags).unwrap();
        assert_eq!(c.unit_id, 3);
        assert_eq!(c.timeout, Duration::from_secs(2));
        assert!(c.auto_open);
        assert!(!c.auto_close);
    }
}
