//! Attribute configuration via TOML
//!
//! Every field has a default, so an empty document is a valid configuration
//! for a `tensor(x{})` column.
//!
//! # Example
//!
//! ```toml
//! tensor_type = "tensor<float>(x{},y[4])"
//! index_mode = "fast"
//!
//! [compaction]
//! dead_slack_bytes = 65536
//! max_dead_ratio = 0.2
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use tensorcol_core::{Error, MemoryUsage, Result, ValueType};
use tensorcol_storage::{GrowStrategy, StoreConfig};
use tensorcol_streamed::IndexMode;

/// When a commit compacts the store
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionStrategy {
    /// Dead bytes tolerated regardless of ratio
    pub dead_slack_bytes: usize,
    /// Dead bytes tolerated as a fraction of used bytes
    pub max_dead_ratio: f64,
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        CompactionStrategy {
            dead_slack_bytes: 0x10000,
            max_dead_ratio: 0.2,
        }
    }
}

impl CompactionStrategy {
    /// Whether `usage` carries enough dead space to compact
    pub fn should_compact(&self, usage: &MemoryUsage) -> bool {
        usage.dead_bytes >= self.dead_slack_bytes
            && usage.dead_bytes as f64 > usage.used_bytes as f64 * self.max_dead_ratio
    }

    fn validate(&self) -> Result<()> {
        if !(self.max_dead_ratio >= 0.0 && self.max_dead_ratio.is_finite()) {
            return Err(Error::Config(format!(
                "max_dead_ratio must be a non-negative number, got {}",
                self.max_dead_ratio
            )));
        }
        Ok(())
    }
}

fn default_tensor_type() -> String {
    "tensor(x{})".to_string()
}

/// Configuration of one tensor attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeConfig {
    /// Declared type of the column, e.g. `"tensor<float>(x{},y[3])"`
    pub tensor_type: String,
    /// Index built for values returned by reads: `"streamed"` or `"fast"`
    pub index_mode: IndexMode,
    /// Growth of the doc id table
    pub grow_strategy: GrowStrategy,
    /// Compaction trigger
    pub compaction: CompactionStrategy,
    /// Data store buffer sizing
    pub store: StoreConfig,
}

impl Default for AttributeConfig {
    fn default() -> Self {
        AttributeConfig {
            tensor_type: default_tensor_type(),
            index_mode: IndexMode::default(),
            grow_strategy: GrowStrategy::default(),
            compaction: CompactionStrategy::default(),
            store: StoreConfig::default(),
        }
    }
}

impl AttributeConfig {
    /// Default configuration for a column of `tensor_type`
    pub fn new(tensor_type: impl Into<String>) -> Self {
        AttributeConfig {
            tensor_type: tensor_type.into(),
            ..AttributeConfig::default()
        }
    }

    /// Parse the declared tensor type
    pub fn value_type(&self) -> Result<ValueType> {
        ValueType::from_spec(&self.tensor_type)
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.value_type()?;
        self.compaction.validate()?;
        self.store.validate()
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tensor attribute configuration
#
# Declared type of every value in the column
tensor_type = "tensor(x{})"

# Index used by reads: "streamed" (scan labels in place, default)
# or "fast" (build a hash index per read)
index_mode = "streamed"

[grow_strategy]
docs_initial_capacity = 1024
docs_grow_percent = 50
docs_grow_delta = 0

# A commit compacts the worst buffer when dead bytes exceed both limits
[compaction]
dead_slack_bytes = 65536
max_dead_ratio = 0.2

[store]
min_entries_per_buffer = 1024
max_entries_per_buffer = 4194304
alloc_grow_factor = 0.2
"#
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AttributeConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse attribute config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: AttributeConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this config to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }
}
