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

//! End-to-end analysis pipeline.
//!
//! Stage order: prefilters (namespace depth, opaque required inputs) →
//! scoring with adaptive weights → admission threshold → deduplication →
//! adaptive budget → route resolution → surface assembly. The quality
//! filter toggle gates the whole scoring/threshold/dedup/budget block;
//! prefilters run regardless so un-invocable operations never reach the
//! surface.

use callbridge_core::catalog::{NamespaceInfo, OperationCatalog, SkippedOperation};
use callbridge_core::descriptor::OperationDescriptor;
use callbridge_core::surface::{ApiSurface, ScoreBuckets, SurfaceStats, TopOperation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::budget::AdaptiveBudgetAllocator;
use crate::builder::SurfaceBuilder;
use crate::cache::{cache_key, AnalysisCache};
use crate::config::AnalyzerConfig;
use crate::dedup::Deduplicator;
use crate::routes::{RouteError, RouteResolver};
use crate::scorer::{QualityScorer, ScoreWeights};

pub const DEFAULT_SURFACE_VERSION: &str = "1.0.0";

/// Scoring runs in parallel only past this many candidates.
const PARALLEL_SCORING_FLOOR: usize = 64;

const TOP_OPERATIONS: usize = 10;

/// Everything one analysis pass produces: the surface document, the
/// surviving descriptors the runtime dispatches against, and the skip
/// ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub surface: ApiSurface,
    pub operations: Vec<OperationDescriptor>,
    pub skipped: Vec<SkippedOperation>,
}

#[derive(Debug)]
pub struct SurfacePipeline {
    config: AnalyzerConfig,
    resolver: RouteResolver,
}

impl SurfacePipeline {
    pub fn new(config: AnalyzerConfig) -> Result<Self, RouteError> {
        let resolver = RouteResolver::with_pattern(&config.path_param_pattern)?;
        Ok(Self { config, resolver })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Run the full pipeline over a catalog.
    pub fn analyze(&self, source_name: &str, catalog: &OperationCatalog) -> AnalysisOutcome {
        let scanned = catalog.len();
        let mut skipped: Vec<SkippedOperation> = catalog.skipped().to_vec();
        let mut candidates = self.prefilter(catalog, &mut skipped);

        if self.config.enable_quality_filter {
            let scorer = QualityScorer::new(ScoreWeights::adaptive(catalog.coverage()));
            self.score_all(&scorer, catalog, &mut candidates);

            let allocator = AdaptiveBudgetAllocator::new(self.config.effective_budget());
            let admission = allocator.admit(candidates);
            candidates = admission.admitted;

            if self.config.enable_deduplication {
                candidates = Deduplicator::new().dedup(candidates, |d| catalog.export_fact(d));
            }

            if self.config.enable_adaptive_budget {
                candidates = allocator.allocate(candidates, |namespace| {
                    catalog
                        .namespace(namespace)
                        .map(NamespaceInfo::has_export_list)
                        .unwrap_or(false)
                });
            } else {
                candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
                candidates.truncate(allocator.config().max_functions);
            }
        }

        let (survivors, route_skips) = self.resolver.resolve(candidates);
        skipped.extend(route_skips);

        let stats = collect_stats(scanned, skipped.len(), &survivors);
        info!(
            source = source_name,
            scanned,
            exposed = survivors.len(),
            skipped = skipped.len(),
            average_score = stats.average_score,
            "analysis pass complete"
        );

        let builder = SurfaceBuilder::new(format!("{source_name} API"), DEFAULT_SURFACE_VERSION);
        let surface = builder.build(&survivors, stats);
        AnalysisOutcome {
            surface,
            operations: survivors,
            skipped,
        }
    }

    /// Like [`analyze`](Self::analyze), short-circuiting through the disk
    /// cache when the source fingerprint and config both match a previous
    /// pass. Cache trouble degrades to a plain analysis, never a failure.
    pub fn analyze_cached(
        &self,
        source_name: &str,
        catalog: &OperationCatalog,
        fingerprint: &str,
    ) -> AnalysisOutcome {
        if !self.config.enable_cache {
            return self.analyze(source_name, catalog);
        }
        let cache = match AnalysisCache::new(&self.config.cache_dir) {
            Ok(cache) => cache,
            Err(err) => {
                warn!(error = %err, "analysis cache unavailable, analyzing directly");
                return self.analyze(source_name, catalog);
            }
        };
        let key = cache_key(source_name, &self.config.signature(), fingerprint);
        if let Some(outcome) = cache.load::<AnalysisOutcome>(&key) {
            info!(source = source_name, "analysis served from cache");
            return outcome;
        }
        let outcome = self.analyze(source_name, catalog);
        if let Err(err) = cache.save(&key, &outcome) {
            warn!(error = %err, "failed to persist analysis result");
        }
        outcome
    }

    /// Depth bound and opaque-required-input filter, recording one skip per
    /// dropped operation.
    fn prefilter(
        &self,
        catalog: &OperationCatalog,
        skipped: &mut Vec<SkippedOperation>,
    ) -> Vec<OperationDescriptor> {
        let mut candidates = Vec::with_capacity(catalog.len());
        for descriptor in catalog.descriptors() {
            if descriptor.depth() > self.config.max_depth {
                skipped.push(SkippedOperation {
                    qualified_name: descriptor.qualified_name.clone(),
                    reason: format!(
                        "namespace depth {} exceeds limit {}",
                        descriptor.depth(),
                        self.config.max_depth
                    ),
                });
                continue;
            }
            if self.config.enable_complexity_prefilter {
                if let Some(param) = opaque_required_param(descriptor) {
                    skipped.push(SkippedOperation {
                        qualified_name: descriptor.qualified_name.clone(),
                        reason: format!("required parameter '{param}' has no JSON rendition"),
                    });
                    continue;
                }
            }
            candidates.push(descriptor.clone());
        }
        candidates
    }

    fn score_all(
        &self,
        scorer: &QualityScorer,
        catalog: &OperationCatalog,
        candidates: &mut [OperationDescriptor],
    ) {
        let workers = self.config.parallel_workers.max(1);
        if !self.config.enable_parallel_scoring
            || workers == 1
            || candidates.len() < PARALLEL_SCORING_FLOOR
        {
            for descriptor in candidates.iter_mut() {
                descriptor.score = scorer.score(descriptor, catalog.export_fact(descriptor));
            }
            return;
        }

        let chunk_size = candidates.len().div_ceil(workers);
        std::thread::scope(|scope| {
            for chunk in candidates.chunks_mut(chunk_size) {
                scope.spawn(move || {
                    for descriptor in chunk {
                        descriptor.score =
                            scorer.score(descriptor, catalog.export_fact(descriptor));
                    }
                });
            }
        });
    }
}

fn collect_stats(scanned: usize, skipped: usize, survivors: &[OperationDescriptor]) -> SurfaceStats {
    let mut buckets = ScoreBuckets::default();
    for descriptor in survivors {
        buckets.add(descriptor.score);
    }
    let average_score = if survivors.is_empty() {
        0.0
    } else {
        survivors.iter().map(|d| d.score).sum::<f64>() / survivors.len() as f64
    };

    let mut ranked: Vec<&OperationDescriptor> = survivors.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    let top = ranked
        .iter()
        .take(TOP_OPERATIONS)
        .map(|d| TopOperation {
            qualified_name: d.qualified_name.clone(),
            score: (d.score * 10.0).round() / 10.0,
        })
        .collect();

    SurfaceStats {
        scanned,
        admitted: survivors.len(),
        skipped,
        average_score,
        buckets,
        top,
    }
}

/// First required parameter whose shape is nominal-only. Containers count
/// as expressible here even with opaque elements, since the caller can
/// still hand over JSON for them.
fn opaque_required_param(descriptor: &OperationDescriptor) -> Option<&str> {
    descriptor
        .parameters
        .iter()
        .find(|p| p.required && p.shape.kind.is_none() && p.shape.type_name.is_some())
        .map(|p| p.name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_core::descriptor::ParameterShape;
    use callbridge_core::shape::TypeShape;

    fn catalog_with(descriptors: Vec<OperationDescriptor>) -> OperationCatalog {
        let mut catalog = OperationCatalog::new();
        for d in descriptors {
            catalog.insert(d).unwrap();
        }
        catalog
    }

    fn documented(namespace: &[&str], name: &str) -> OperationDescriptor {
        let segments: Vec<String> = namespace.iter().map(|s| s.to_string()).collect();
        let mut d = OperationDescriptor::new(
            format!("{}.{name}", segments.join(".")),
            name,
            segments,
        );
        d.doc = Some(format!(
            "{name} does something well documented.\n\nArgs:\n    value (str): Input value.\n\nReturns:\n    str: The result."
        ));
        d.parameters = vec![ParameterShape::required("value", TypeShape::string())];
        d.return_shape = Some(TypeShape::string());
        d
    }

    #[test]
    fn deep_namespaces_are_skipped() {
        let pipeline = SurfacePipeline::new(AnalyzerConfig::default()).unwrap();
        let catalog = catalog_with(vec![
            documented(&["lib"], "create_thing"),
            documented(&["lib", "inner", "deep"], "create_other"),
        ]);
        let outcome = pipeline.analyze("lib", &catalog);
        assert!(outcome
            .skipped
            .iter()
            .any(|s| s.qualified_name == "lib.inner.deep.create_other"
                && s.reason.contains("depth")));
        assert_eq!(outcome.operations.len(), 1);
    }

    #[test]
    fn opaque_required_inputs_are_skipped() {
        let pipeline = SurfacePipeline::new(AnalyzerConfig::default()).unwrap();
        let mut opaque = documented(&["lib"], "create_widget");
        opaque.parameters = vec![ParameterShape::required(
            "widget",
            TypeShape::nominal("lib.Widget"),
        )];
        let mut container = documented(&["lib"], "create_batch");
        container.parameters = vec![ParameterShape::required(
            "widgets",
            TypeShape::array(TypeShape::nominal("lib.Widget")),
        )];
        let catalog = catalog_with(vec![opaque, container]);
        let outcome = pipeline.analyze("lib", &catalog);

        // Bare nominal input drops, container of nominals stays.
        assert!(outcome
            .skipped
            .iter()
            .any(|s| s.qualified_name == "lib.create_widget"));
        assert!(outcome
            .operations
            .iter()
            .any(|d| d.qualified_name == "lib.create_batch"));
    }

    #[test]
    fn disabling_the_quality_filter_skips_scoring() {
        let config = AnalyzerConfig {
            enable_quality_filter: false,
            ..AnalyzerConfig::default()
        };
        let pipeline = SurfacePipeline::new(config).unwrap();
        let mut bare = documented(&["lib"], "x");
        bare.doc = None;
        let catalog = catalog_with(vec![bare]);
        let outcome = pipeline.analyze("lib", &catalog);
        // A single-letter undocumented operation would never clear the
        // threshold; with the filter off it sails through unscored.
        assert_eq!(outcome.operations.len(), 1);
        assert_eq!(outcome.operations[0].score, 0.0);
    }

    #[test]
    fn surface_and_operations_stay_consistent() {
        let pipeline = SurfacePipeline::new(AnalyzerConfig::default()).unwrap();
        let catalog = catalog_with(vec![
            documented(&["lib"], "create_report"),
            documented(&["lib"], "get_user"),
        ]);
        let outcome = pipeline.analyze("lib", &catalog);
        assert_eq!(outcome.operations.len(), 2);
        assert_eq!(outcome.surface.len(), outcome.operations.len());
        for operation in &outcome.operations {
            assert!(
                outcome
                    .surface
                    .endpoint(&operation.route, operation.verb)
                    .is_some(),
                "operation {} missing from surface",
                operation.qualified_name
            );
        }
        assert_eq!(outcome.surface.stats.scanned, 2);
    }

    #[test]
    fn cached_analysis_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalyzerConfig {
            cache_dir: dir.path().to_path_buf(),
            ..AnalyzerConfig::default()
        };
        let pipeline = SurfacePipeline::new(config).unwrap();
        let catalog = catalog_with(vec![documented(&["lib"], "create_report")]);

        let first = pipeline.analyze_cached("lib", &catalog, "fp-1");
        let second = pipeline.analyze_cached("lib", &catalog, "fp-1");
        assert_eq!(first.operations.len(), second.operations.len());
        assert_eq!(first.surface.title, second.surface.title);

        // A changed fingerprint re-analyzes rather than serving stale data.
        let fresh = pipeline.analyze_cached("lib", &catalog, "fp-2");
        assert_eq!(fresh.operations.len(), first.operations.len());
    }
}
