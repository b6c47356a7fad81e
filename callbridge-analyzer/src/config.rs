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

//! Analyzer configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::BudgetConfig;
use crate::routes::DEFAULT_PATH_PARAM_PATTERN;

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

/// Named budget presets. `Strict` exposes a small, high-confidence surface,
/// `Permissive` nearly everything above the fallback bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    Strict,
    #[default]
    Balanced,
    Permissive,
}

impl QualityMode {
    pub fn budget(self) -> BudgetConfig {
        match self {
            QualityMode::Strict => BudgetConfig::strict(),
            QualityMode::Balanced => BudgetConfig::balanced(),
            QualityMode::Permissive => BudgetConfig::permissive(),
        }
    }
}

/// Pipeline configuration.
///
/// An explicit `[budget]` section overrides the quality-mode preset
/// entirely; otherwise the preset for `quality_mode` is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Namespaces deeper than this are dropped before scoring.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Score operations and apply the admission threshold.
    #[serde(default = "default_true")]
    pub enable_quality_filter: bool,

    /// Collapse purpose-equivalent duplicates.
    #[serde(default = "default_true")]
    pub enable_deduplication: bool,

    /// Apply the two-phase namespace budget.
    #[serde(default = "default_true")]
    pub enable_adaptive_budget: bool,

    /// Drop operations whose required parameters cannot be expressed as
    /// plain JSON.
    #[serde(default = "default_true")]
    pub enable_complexity_prefilter: bool,

    #[serde(default)]
    pub quality_mode: QualityMode,

    /// Explicit budget override; wins over `quality_mode` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetConfig>,

    /// Parameter names matching this pattern become path parameters.
    #[serde(default = "default_path_param_pattern")]
    pub path_param_pattern: String,

    #[serde(default = "default_true")]
    pub enable_parallel_scoring: bool,

    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,

    #[serde(default = "default_true")]
    pub enable_cache: bool,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_max_depth() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_path_param_pattern() -> String {
    DEFAULT_PATH_PARAM_PATTERN.to_string()
}

fn default_parallel_workers() -> usize {
    4
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".callbridge_cache")
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            enable_quality_filter: true,
            enable_deduplication: true,
            enable_adaptive_budget: true,
            enable_complexity_prefilter: true,
            quality_mode: QualityMode::default(),
            budget: None,
            path_param_pattern: default_path_param_pattern(),
            enable_parallel_scoring: true,
            parallel_workers: default_parallel_workers(),
            enable_cache: true,
            cache_dir: default_cache_dir(),
        }
    }
}

impl AnalyzerConfig {
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

    /// Budget actually in force: explicit override or quality-mode preset.
    pub fn effective_budget(&self) -> BudgetConfig {
        self.budget
            .clone()
            .unwrap_or_else(|| self.quality_mode.budget())
    }

    /// Stable signature over the whole config, for cache keys.
    pub fn signature(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}
