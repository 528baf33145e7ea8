//! The tag data model: typed signals with clamping, status derivation, and
//! change emission (spec §3, §4.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

/// The declared type of a tag. Fixes which value slot is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    Bool,
    Int,
    Float,
    Array,
}

impl TagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagType::Bool => "bool",
            TagType::Int => "int",
            TagType::Float => "float",
            TagType::Array => "array",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bool" => Ok(TagType::Bool),
            "int" => Ok(TagType::Int),
            "float" => Ok(TagType::Float),
            "array" => Ok(TagType::Array),
            other => Err(anyhow::anyhow!("unknown tag type: {other}")),
        }
    }
}

/// The actual payload of a tag observation. Exactly one slot is meaningful,
/// fixed by the owning tag's `TagType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagData {
    Bool(bool),
    Int(i64),
    Float(f64),
    Array(Vec<f64>),
}

impl TagData {
    pub fn type_of(&self) -> TagType {
        match self {
            TagData::Bool(_) => TagType::Bool,
            TagData::Int(_) => TagType::Int,
            TagData::Float(_) => TagType::Float,
            TagData::Array(_) => TagType::Array,
        }
    }

    /// Numeric projection used for clamping. Bool and Array values are not
    /// clamped (min==max is the only sensible bound for them in practice);
    /// clamping only applies to Int/Float per the spec's literal scenarios.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagData::Bool(_) | TagData::Array(_) => None,
            TagData::Int(i) => Some(*i as f64),
            TagData::Float(f) => Some(*f),
        }
    }

    /// Join an `Array` value by comma into the string column the store
    /// projects it into (spec §4.7 type projection). Panics if not an array;
    /// callers must check `type_of()` first.
    pub fn join_csv(&self) -> String {
        match self {
            TagData::Array(values) => values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
            _ => panic!("join_csv called on non-array TagData"),
        }
    }

    pub fn parse_csv(s: &str) -> Self {
        TagData::Array(
            s.split(',')
                .filter(|p| !p.is_empty())
                .filter_map(|p| p.trim().parse::<f64>().ok())
                .collect(),
        )
    }
}

/// An immutable snapshot of a tag transition, emitted across component
/// boundaries (connector→scan, scan→store). Spec §3 "TagValue".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagValue {
    pub name: String,
    pub value: TagData,
    pub status: i32,
    pub update_time: DateTime<Utc>,
}

impl TagValue {
    pub fn new(name: impl Into<String>, value: TagData, status: i32) -> Self {
        Self {
            name: name.into(),
            value,
            status,
            update_time: Utc::now(),
        }
    }

    pub fn tag_type(&self) -> TagType {
        self.value.type_of()
    }
}

/// A named signal in the snapshot. Created by config load, owned by the scan
/// loop, mutated only via `clamp_and_store`. Spec §3 "Tag".
#[derive(Debug, Clone)]
pub struct Tag {
    pub name: String,
    pub tag_type: TagType,
    /// Opaque connector-specific selector, e.g. `C:0:10` or
    /// `func=sin;period=60;scale=100`.
    pub source: String,
    pub min: f64,
    pub max: f64,
    pub is_log: bool,
    pub connector_name: Option<String>,
    pub description: Option<String>,

    pub value: Option<TagData>,
    pub status: i32,
    pub update_time: Option<DateTime<Utc>>,
}

impl Tag {
    pub fn new(
        name: impl Into<String>,
        tag_type: TagType,
        source: impl Into<String>,
        min: f64,
        max: f64,
        is_log: bool,
        connector_name: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            tag_type,
            source: source.into(),
            min,
            max,
            is_log,
            connector_name,
            description: None,
            value: None,
            status: 0,
            update_time: None,
        }
    }

    /// Whether clamping is enabled for this tag (spec §4.1 clamp rule).
    pub fn clamp_enabled(&self) -> bool {
        self.min != self.max
    }

    /// Apply the clamp rule and store the result, returning the TagValue
    /// that was actually stored (post-clamp). This is the only place tag
    /// volatile state is mutated.
    pub fn clamp_and_store(&mut self, value: TagData, status: i32) -> TagValue {
        let (stored_value, stored_status) = if !self.clamp_enabled() {
            (value, status)
        } else if let Some(v) = value.as_f64() {
            if v < self.min {
                (clamp_like(&value, self.min), -1)
            } else if v > self.max {
                (clamp_like(&value, self.max), -1)
            } else {
                (value, status)
            }
        } else {
            // Bool/Array values: clamping is meaningless once min != max is
            // set deliberately for numeric tags only, so pass through.
            (value, status)
        };

        let now = Utc::now();
        self.value = Some(stored_value.clone());
        self.status = stored_status;
        self.update_time = Some(now);

        TagValue {
            name: self.name.clone(),
            value: stored_value,
            status: stored_status,
            update_time: now,
        }
    }

    /// Value-copy for `get()`.
    pub fn to_tag_value(&self) -> Option<TagValue> {
        Some(TagValue {
            name: self.name.clone(),
            value: self.value.clone()?,
            status: self.status,
            update_time: self.update_time?,
        })
    }
}

/// Replace a numeric TagData with a clamped scalar, preserving its original
/// type (Int truncates, Float keeps precision).
fn clamp_like(original: &TagData, clamped: f64) -> TagData {
    match original {
        TagData::Int(_) => TagData::Int(clamped as i64),
        TagData::Float(_) => TagData::Float(clamped),
        other => other.clone(),
    }
}
