//! Custom plugin file
//!
//! An optional YAML (or JSON) document passed as the positional argument.
//! It can shard the run by a date field, add a query fragment to every
//! shard's search and reshape documents before they are written.
//!
//! ```yaml
//! sharded:
//!   field: created_at
//!   start: 2024-01-01
//!   end: 2024-03-01
//!   interval: week
//! query:
//!   _source: [user, message, created_at]
//! transform:
//!   remove_fields: [internal_score]
//!   set_fields:
//!     migrated: true
//! ```

use crate::types::Hit;
use reindex_common::{ReindexError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

/// Parsed plugin file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    #[serde(default)]
    pub sharded: Option<ShardingConfig>,
    /// Merged over the search body of every shard
    #[serde(default)]
    pub query: Option<Map<String, Value>>,
    #[serde(default)]
    pub transform: Option<TransformConfig>,
}

/// How the run is split into date-range shards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Source field the range filters apply to
    pub field: String,
    #[serde(default)]
    pub start: Option<String>,
    /// Defaults to the moment the run starts
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub interval: Option<Interval>,
    /// Explicit shards; when present `start`/`end`/`interval` are ignored
    #[serde(default)]
    pub ranges: Option<Vec<NamedRange>>,
}

/// Shard width: a day count or a keyword (`week`, `month`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Interval {
    Days(i64),
    Token(String),
}

/// One explicit shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedRange {
    pub name: String,
    pub range: RangeBounds,
}

/// Lower-inclusive, upper-exclusive bounds, passed to the range query verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub gte: Value,
    pub lt: Value,
}

/// Field edits applied to every document before it is written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub remove_fields: Vec<String>,
    #[serde(default)]
    pub set_fields: Map<String, Value>,
}

impl PluginConfig {
    /// Load and validate a plugin file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ReindexError::config(format!(
                "plugin file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let plugin: PluginConfig = serde_yaml::from_str(&content).map_err(|e| {
            ReindexError::config(format!("failed to parse plugin {}: {}", path.display(), e))
        })?;

        plugin.validate()?;
        debug!(path = %path.display(), "Loaded plugin");
        Ok(plugin)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(sharded) = &self.sharded {
            if sharded.field.trim().is_empty() {
                return Err(ReindexError::config("sharded plugin requires a field"));
            }
            match &sharded.ranges {
                Some(ranges) if ranges.is_empty() => {
                    return Err(ReindexError::config("sharded plugin has an empty range list"))
                },
                Some(_) => {},
                None if sharded.start.is_none() => {
                    return Err(ReindexError::config(
                        "Start time has to be defined in sharded indexer.",
                    ))
                },
                None => {},
            }
        }
        Ok(())
    }

    /// Transform described by the plugin, if any
    pub fn record_transform(&self) -> Option<FieldTransform> {
        self.transform.clone().map(FieldTransform::from)
    }
}

/// Reshapes a document on its way to the destination
pub trait RecordTransform: Send + Sync {
    fn transform(&self, hit: Hit) -> Hit;
}

/// Removes and overwrites top-level source fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldTransform {
    remove_fields: Vec<String>,
    set_fields: Map<String, Value>,
}

impl From<TransformConfig> for FieldTransform {
    fn from(config: TransformConfig) -> Self {
        Self {
            remove_fields: config.remove_fields,
            set_fields: config.set_fields,
        }
    }
}

impl RecordTransform for FieldTransform {
    fn transform(&self, mut hit: Hit) -> Hit {
        for field in &self.remove_fields {
            hit.source.remove(field);
        }
        for (field, value) in &self.set_fields {
            hit.source.insert(field.clone(), value.clone());
        }
        hit
    }
}
