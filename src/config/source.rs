//! Domain config (connectors/tags/scripts) behind a small trait, so the HTTP
//! `/api/config` handlers and the scan loop's reload path are not welded to
//! one file format. `TomlConfigSource` is the one concrete implementation,
//! standing in for the out-of-scope `.ods` config spreadsheet codec.

use crate::model::{Tag, TagType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One `[[connectors]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorDef {
    pub name: String,
    pub connection_string: String,
    pub cycle_ms: u64,
}

/// One `[[tags]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagDef {
    pub name: String,
    #[serde(rename = "type")]
    pub tag_type: String,
    pub source: String,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
    #[serde(default = "default_true")]
    pub is_log: bool,
    pub connector: Option<String>,
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl TagDef {
    /// Build the in-memory `Tag` this definition describes. Fails if
    /// `type` doesn't name one of the known tag types.
    pub fn to_tag(&self) -> anyhow::Result<Tag> {
        let tag_type = TagType::parse(&self.tag_type)?;
        let mut tag = Tag::new(
            self.name.clone(),
            tag_type,
            self.source.clone(),
            self.min,
            self.max,
            self.is_log,
            self.connector.clone(),
        );
        tag.description = self.description.clone();
        Ok(tag)
    }
}

/// One `[[scripts]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDef {
    pub name: String,
    pub cycle_ms: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub body: String,
}

/// The full domain configuration: connector/tag/script definitions plus the
/// time it was last loaded or saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtdsConfig {
    #[serde(default)]
    pub connectors: Vec<ConnectorDef>,
    #[serde(default)]
    pub tags: Vec<TagDef>,
    #[serde(default)]
    pub scripts: Vec<ScriptDef>,
    #[serde(default = "Utc::now")]
    pub config_time: DateTime<Utc>,
}

impl Default for RtdsConfig {
    fn default() -> Self {
        Self {
            connectors: Vec::new(),
            tags: Vec::new(),
            scripts: Vec::new(),
            config_time: Utc::now(),
        }
    }
}

/// Backing store for domain config, read and (optionally) written by the
/// `/api/config` handlers and reload path. Kept separate from `Config`
/// (the ambient process settings) per the REDESIGN FLAG calling for the
/// config spreadsheet to become a substitutable source.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> anyhow::Result<RtdsConfig>;
    fn save(&self, config: &RtdsConfig) -> anyhow::Result<()>;
}

/// The one concrete `ConfigSource`: the same TOML file the ambient
/// `[scan]`/`[store]`/`[kafka]` sections live in, under its
/// `[[connectors]]`/`[[tags]]`/`[[scripts]]` array-of-tables.
pub struct TomlConfigSource {
    path: PathBuf,
}

impl TomlConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for TomlConfigSource {
    fn load(&self) -> anyhow::Result<RtdsConfig> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let config: RtdsConfig = toml::from_str(&contents)
                    .map_err(|e| anyhow::anyhow!("invalid config file {}: {e}", self.path.display()))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RtdsConfig::default()),
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                self.path.display()
            )),
        }
    }

    fn save(&self, config: &RtdsConfig) -> anyhow::Result<()> {
        let serialized = toml::to_string_pretty(config)
            .map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serialized)
            .map_err(|e| anyhow::anyhow!("failed to write config file {}: {e}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_def_builds_tag_with_expected_fields() {
        let def = TagDef {
            name: "t1".to_string(),
            tag_type: "float".to_string(),
            source: "func=line;scale=1".to_string(),
            min: 0.0,
            max: 100.0,
            is_log: true,
            connector: Some("sim1".to_string()),
            description: Some("demo tag".to_string()),
        };
        let tag = def.to_tag().unwrap();
        assert_eq!(tag.name, "t1");
        assert_eq!(tag.tag_type, TagType::Float);
        assert!(tag.clamp_enabled());
        assert_eq!(tag.description.as_deref(), Some("demo tag"));
    }

    #[test]
    fn tag_def_rejects_unknown_type() {
        let def = TagDef {
            name: "t1".to_string(),
            tag_type: "string".to_string(),
            source: "x".to_string(),
            min: 0.0,
            max: 0.0,
            is_log: true,
            connector: None,
            description: None,
        };
        assert!(def.to_tag().is_err());
    }

    #[test]
    fn toml_source_roundtrips_through_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtds.toml");
        let source = TomlConfigSource::new(&path);

        let mut config = RtdsConfig::default();
        config.connectors.push(ConnectorDef {
            name: "sim1".to_string(),
            connection_string: "connector=simulator".to_string(),
            cycle_ms: 1000,
        });
        config.tags.push(TagDef {
            name: "t1".to_string(),
            tag_type: "float".to_string(),
            source: "func=line;scale=1".to_string(),
            min: 0.0,
            max: 0.0,
            is_log: true,
            connector: Some("sim1".to_string()),
            description: None,
        });

        source.save(&config).unwrap();
        let loaded = source.load().unwrap();
        assert_eq!(loaded.connectors.len(), 1);
        assert_eq!(loaded.tags.len(), 1);
        assert_eq!(loaded.connectors[0].name, "sim1");
    }

    #[test]
    fn missing_file_loads_as_empty_default() {
        let dir = tempfile::tempdir().unwrap();
        let source = TomlConfigSource::new(dir.path().join("missing.toml"));
        let config = source.load().unwrap();
        assert!(config.connectors.is_empty());
        assert!(config.tags.is_empty());
    }
}
