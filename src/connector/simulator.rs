//! Synthetic periodic/random signal connector (spec §4.3).
//!
//! Source string per tag: `func=sin|cos|rnd|line;period=<sec>;scale=<float>`.

use super::{parse_kv_source, Connector};
use crate::model::{Tag, TagData, TagValue};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum SimFunc {
    Sin,
    Cos,
    Rnd,
    Line,
}

impl SimFunc {
    fn parse(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sin" => Ok(SimFunc::Sin),
            "cos" => Ok(SimFunc::Cos),
            "rnd" => Ok(SimFunc::Rnd),
            "line" => Ok(SimFunc::Line),
            other => Err(anyhow::anyhow!("unknown simulator func: {other}")),
        }
    }
}

struct SimSignal {
    tag_name: String,
    func: SimFunc,
    period: f64,
    scale: f64,
    /// Phase in degrees, advanced after every emit.
    phase_deg: f64,
}

impl SimSignal {
    fn parse(tag: &Tag) -> anyhow::Result<Self> {
        let fields = parse_kv_source(&tag.source);
        let func_str = fields
            .get("func")
            .ok_or_else(|| anyhow::anyhow!("simulator tag {} missing func=", tag.name))?;
        let func = SimFunc::parse(func_str)?;
        let period: f64 = fields
            .get("period")
            .map(|s| s.parse())
            .transpose()
            .map_err(|_| anyhow::anyhow!("invalid period for tag {}", tag.name))?
            .unwrap_or(60.0);
        let scale: f64 = fields
            .get("scale")
            .map(|s| s.parse())
            .transpose()
            .map_err(|_| anyhow::anyhow!("invalid scale for tag {}", tag.name))?
            .unwrap_or(1.0);

        Ok(Self {
            tag_name: tag.name.clone(),
            func,
            period,
            scale,
            phase_deg: 0.0,
        })
    }

    /// Emit the next value and, for sin/cos, advance the phase.
    fn next_value(&mut self, cycle_secs: f64) -> f64 {
        let value = match self.func {
            SimFunc::Line => self.scale,
            SimFunc::Rnd => rand::thread_rng().gen_range(0.0..=self.scale),
            SimFunc::Sin => self.scale * self.phase_deg.to_radians().sin(),
            SimFunc::Cos => self.scale * self.phase_deg.to_radians().cos(),
        };

        if matches!(self.func, SimFunc::Sin | SimFunc::Cos) {
            self.phase_deg += (360.0 * cycle_secs) / (60.0 * self.period);
            self.phase_deg %= 360.0;
        }

        value
    }
}

pub struct SimulatorConnector {
    name: String,
    cycle: Duration,
    signals: Vec<SimSignal>,
}

impl SimulatorConnector {
    pub fn new(name: String, cycle: Duration, tags: Vec<Tag>) -> anyhow::Result<Self> {
        let signals = tags
            .iter()
            .map(SimSignal::parse)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            name,
            cycle,
            signals,
        })
    }
}

#[async_trait]
impl Connector for SimulatorConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(&self) -> Duration {
        self.cycle
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn read(&mut self, out: &mut Vec<TagValue>) -> anyhow::Result<()> {
        let cycle_secs = self.cycle.as_secs_f64();
        for signal in self.signals.iter_mut() {
            let value = signal.next_value(cycle_secs);
            out.push(TagValue::new(
                signal.tag_name.clone(),
                TagData::Float(value),
                0,
            ));
        }
        Ok(())
    }
}
