// Copyright 2025 Callbridge (https://github.com/callbridge/callbridge)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runtime configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Ceilings and toggles for the serialization engine.
///
/// Payloads under `max_direct_size` travel inline; larger ones are stored
/// behind object handles. The table and children ceilings bound what a
/// single response can carry regardless of byte size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializationLimits {
    /// Largest inline payload, in encoded bytes.
    #[serde(default = "default_max_direct_size")]
    pub max_direct_size: usize,

    /// Preview length for stored values, in characters.
    #[serde(default = "default_max_preview_length")]
    pub max_preview_length: usize,

    /// Most items consumed from a single stream.
    #[serde(default = "default_max_stream_items")]
    pub max_stream_items: usize,

    /// Sequence length beyond which complex children force handle storage.
    #[serde(default = "default_max_sequence_children")]
    pub max_sequence_children: usize,

    /// Map entry count beyond which complex children force handle storage.
    #[serde(default = "default_max_map_children")]
    pub max_map_children: usize,

    #[serde(default = "default_max_table_rows")]
    pub max_table_rows: usize,

    #[serde(default = "default_max_table_columns")]
    pub max_table_columns: usize,

    #[serde(default = "default_max_table_elements")]
    pub max_table_elements: usize,

    /// Decimal digits kept on fractional numbers in tabular payloads.
    #[serde(default = "default_float_precision")]
    pub float_precision: u32,

    /// Store byte content as readable resources. When disabled, byte
    /// content is inlined up to `max_direct_size`.
    #[serde(default = "default_true")]
    pub enable_resources: bool,
}

fn default_max_direct_size() -> usize {
    10 * 1024
}

fn default_max_preview_length() -> usize {
    200
}

fn default_max_stream_items() -> usize {
    1000
}

fn default_max_sequence_children() -> usize {
    100
}

fn default_max_map_children() -> usize {
    50
}

fn default_max_table_rows() -> usize {
    10_000
}

fn default_max_table_columns() -> usize {
    100
}

fn default_max_table_elements() -> usize {
    10_000
}

fn default_float_precision() -> u32 {
    6
}

fn default_true() -> bool {
    true
}

impl Default for SerializationLimits {
    fn default() -> Self {
        Self {
            max_direct_size: default_max_direct_size(),
            max_preview_length: default_max_preview_length(),
            max_stream_items: default_max_stream_items(),
            max_sequence_children: default_max_sequence_children(),
            max_map_children: default_max_map_children(),
            max_table_rows: default_max_table_rows(),
            max_table_columns: default_max_table_columns(),
            max_table_elements: default_max_table_elements(),
            float_precision: default_float_precision(),
            enable_resources: true,
        }
    }
}

/// Object handle store sizing and expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Most handles held at once; the least recently used is evicted first.
    #[serde(default = "default_object_capacity")]
    pub capacity: usize,

    /// Handle lifetime in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Seconds between background expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_object_capacity() -> usize {
    256
}

fn default_ttl_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            capacity: default_object_capacity(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl ObjectStoreConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Resource store sizing, expiry, and addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStoreConfig {
    #[serde(default = "default_resource_capacity")]
    pub capacity: u64,

    /// Resource lifetime in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// URI prefix for stored resources.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_resource_capacity() -> u64 {
    256
}

fn default_base_url() -> String {
    "bridge://resources".to_string()
}

impl Default for ResourceStoreConfig {
    fn default() -> Self {
        Self {
            capacity: default_resource_capacity(),
            ttl_secs: default_ttl_secs(),
            base_url: default_base_url(),
        }
    }
}

impl ResourceStoreConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Dispatcher concurrency bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Concurrent synchronous executions admitted to the worker pool.
    #[serde(default = "default_worker_permits")]
    pub worker_permits: usize,
}

fn default_worker_permits() -> usize {
    100
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_permits: default_worker_permits(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub serialization: SerializationLimits,

    #[serde(default)]
    pub objects: ObjectStoreConfig,

    #[serde(default)]
    pub resources: ResourceStoreConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Optional path to a declarative handler-rule table (JSON).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_rules: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_ceilings() {
        let config = RuntimeConfig::default();
        assert_eq!(config.serialization.max_direct_size, 10 * 1024);
        assert_eq!(config.serialization.max_stream_items, 1000);
        assert_eq!(config.serialization.max_sequence_children, 100);
        assert_eq!(config.serialization.max_map_children, 50);
        assert_eq!(config.objects.capacity, 256);
        assert_eq!(config.objects.ttl(), Duration::from_secs(1800));
        assert_eq!(config.objects.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.resources.base_url, "bridge://resources");
        assert_eq!(config.dispatch.worker_permits, 100);
        assert!(config.serialization.enable_resources);
        assert!(config.handler_rules.is_none());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[serialization]
max_direct_size = 2048
enable_resources = false

[objects]
capacity = 8
ttl_secs = 60
"#
        )
        .unwrap();

        let config = RuntimeConfig::from_path(file.path()).unwrap();
        assert_eq!(config.serialization.max_direct_size, 2048);
        assert!(!config.serialization.enable_resources);
        // Unnamed fields keep their defaults.
        assert_eq!(config.serialization.max_stream_items, 1000);
        assert_eq!(config.objects.capacity, 8);
        assert_eq!(config.objects.ttl(), Duration::from_secs(60));
        assert_eq!(config.dispatch.worker_permits, 100);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = RuntimeConfig::from_path("/nonexistent/runtime.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/runtime.toml"));
    }
}
