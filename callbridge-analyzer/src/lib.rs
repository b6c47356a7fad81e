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

//! Callbridge Analyzer
//!
//! Turns a raw operation catalog into a small, conflict-free, quality-ranked
//! API surface: heuristic scoring with self-calibrating weights, duplicate
//! collapsing, two-phase budget allocation across namespaces, and
//! conflict-driven route escalation.

pub mod budget;
pub mod builder;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod docs;
pub mod pipeline;
pub mod routes;
pub mod scorer;

pub use budget::{AdaptiveBudgetAllocator, Admission, BudgetConfig, FALLBACK_TRIGGER};
pub use builder::{build_endpoint, SurfaceBuilder};
pub use cache::{cache_key, AnalysisCache, CacheError};
pub use config::{AnalyzerConfig, ConfigError, QualityMode};
pub use dedup::Deduplicator;
pub use docs::{DocBlock, DocParam, DocParser, DocReturn};
pub use pipeline::{AnalysisOutcome, SurfacePipeline, DEFAULT_SURFACE_VERSION};
pub use routes::{RouteError, RouteResolver, DEFAULT_PATH_PARAM_PATTERN};
pub use scorer::{QualityScorer, ScoreBreakdown, ScoreWeights};
