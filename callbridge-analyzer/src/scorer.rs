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

//! Descriptor quality scoring.
//!
//! Each descriptor gets a score in [0, 100] from a weighted sum of five
//! independent heuristics: documentation quality, declared-type coverage,
//! visibility, naming convention, and namespace hierarchy. Usability
//! penalties deduct from the sum; a +5 bonus applies when the operation does
//! not return an opaque handle.
//!
//! Two rules override the weighted sum. A descriptor in an internal/test
//! namespace (or with a privacy-prefixed name) scores a hard 0. A
//! non-member descriptor in a namespace with an explicit export list scores
//! 0 when absent from that list and floors at 90 when present.
//!
//! Weights self-calibrate per catalog: sparsely documented sources shift
//! weight from documentation onto hierarchy, so scoring adapts to each
//! scanned source instead of using one universal constant table.

use callbridge_core::catalog::{CatalogCoverage, ExportFact};
use callbridge_core::descriptor::OperationDescriptor;
use regex::Regex;

use crate::docs::{DocBlock, DocParser};

/// Names generic enough that thin documentation is forgivable.
const STANDARD_ACTION_NAMES: &[&str] = &["make", "create", "run", "build", "generate"];

/// Relative weights of the five scoring components. Normalized to sum 100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub documentation: f64,
    pub types: f64,
    pub visibility: f64,
    pub naming: f64,
    pub hierarchy: f64,
}

impl Default for ScoreWeights {
    /// Static fallback used when no catalog statistics are available.
    fn default() -> Self {
        Self {
            documentation: 25.0,
            types: 20.0,
            visibility: 20.0,
            naming: 10.0,
            hierarchy: 25.0,
        }
    }
}

impl ScoreWeights {
    /// Derive weights from catalog coverage ratios. Well-documented sources
    /// weigh documentation up to 30; undocumented ones shift that weight
    /// onto hierarchy structure instead.
    pub fn adaptive(coverage: CatalogCoverage) -> Self {
        Self {
            documentation: 10.0 + 20.0 * coverage.doc,
            types: 10.0 + 15.0 * coverage.types,
            visibility: 15.0 + 10.0 * coverage.exports,
            naming: 10.0,
            hierarchy: 15.0 + 10.0 * (1.0 - coverage.doc),
        }
        .normalized()
    }

    pub fn sum(&self) -> f64 {
        self.documentation + self.types + self.visibility + self.naming + self.hierarchy
    }

    /// Scale so the components sum to 100.
    pub fn normalized(self) -> Self {
        let total = self.sum();
        if total <= 0.0 {
            return Self::default();
        }
        let factor = 100.0 / total;
        Self {
            documentation: self.documentation * factor,
            types: self.types * factor,
            visibility: self.visibility * factor,
            naming: self.naming * factor,
            hierarchy: self.hierarchy * factor,
        }
    }
}

/// Per-component factors of one scored descriptor, each in [0, 1], plus the
/// flat adjustments applied after weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub documentation: f64,
    pub types: f64,
    pub visibility: f64,
    pub naming: f64,
    pub hierarchy: f64,
    pub bonus: f64,
    pub penalty: f64,
}

/// Scores descriptors against a weight vector.
#[derive(Debug)]
pub struct QualityScorer {
    weights: ScoreWeights,
    docs: DocParser,
    internal_namespace: Regex,
    bad_names: Vec<Regex>,
    good_names: Vec<Regex>,
}

impl QualityScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        let bad_names = vec![
            Regex::new(r"(?i)^.*\d+$").expect("numeric suffix pattern"),
            Regex::new(r"(?i)^(test|demo|example)_").expect("test prefix pattern"),
            Regex::new(r"(?i)^(bench|benchmark)_").expect("bench prefix pattern"),
            Regex::new(r"(?i)^.*_(internal|private|impl)$").expect("internal suffix pattern"),
        ];
        let good_names = vec![
            Regex::new(r"^[a-z][a-z0-9_]*$").expect("snake case pattern"),
            Regex::new(r"^[A-Z][a-zA-Z0-9]*$").expect("camel case pattern"),
        ];
        Self {
            weights: weights.normalized(),
            docs: DocParser::new(),
            internal_namespace: Regex::new(
                r"(?i)(^|\.)(_?tests?|testing|testdata|benchmarks?|examples?|demos?|experimental|internal|_internal|private|_private|compat|legacy|deprecated|cache)(\.|$)",
            )
            .expect("internal namespace pattern"),
            bad_names,
            good_names,
        }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn score(&self, descriptor: &OperationDescriptor, fact: ExportFact) -> f64 {
        self.score_detailed(descriptor, fact).0
    }

    /// Score plus the per-component factors that produced it.
    pub fn score_detailed(
        &self,
        descriptor: &OperationDescriptor,
        fact: ExportFact,
    ) -> (f64, ScoreBreakdown) {
        let mut breakdown = ScoreBreakdown::default();

        // Export gate for non-member operations: a declared list is
        // authoritative in both directions.
        let export_gated = fact == ExportFact::Listed && !descriptor.is_member();
        if fact == ExportFact::Unlisted && !descriptor.is_member() {
            return (0.0, breakdown);
        }

        breakdown.visibility = self.visibility_factor(descriptor, fact);
        if breakdown.visibility == 0.0 {
            return (0.0, breakdown);
        }

        let doc = self
            .docs
            .parse(descriptor.doc.as_deref().unwrap_or_default());
        breakdown.documentation = self.documentation_factor(descriptor, &doc);
        breakdown.types = self.type_factor(descriptor, &doc);
        breakdown.naming = self.naming_factor(descriptor);
        breakdown.hierarchy = self.hierarchy_factor(descriptor);

        let w = &self.weights;
        let mut score = w.documentation * breakdown.documentation
            + w.types * breakdown.types
            + w.visibility * breakdown.visibility
            + w.naming * breakdown.naming
            + w.hierarchy * breakdown.hierarchy;

        // Results the caller can consume inline beat handles it must manage.
        if !descriptor.returns_handle {
            breakdown.bonus = 5.0;
            score += 5.0;
        }
        breakdown.penalty = self.usability_penalty(descriptor, &doc);
        score -= breakdown.penalty;

        let mut score = score.clamp(0.0, 100.0);
        if export_gated {
            score = score.max(90.0);
        }
        (score, breakdown)
    }

    fn documentation_factor(&self, descriptor: &OperationDescriptor, doc: &DocBlock) -> f64 {
        let standard_name = STANDARD_ACTION_NAMES.contains(&descriptor.name.as_str());
        let Some(text) = descriptor.doc.as_deref() else {
            if standard_name {
                return 0.5;
            }
            if descriptor.name.len() > 10 || descriptor.name.contains('_') {
                return 0.2;
            }
            return 0.0;
        };

        if doc.is_structured() {
            return 1.0;
        }
        if doc.short.is_some() {
            return if standard_name { 0.9 } else { 0.8 };
        }

        let doc_len = text.trim().len();
        if doc_len > 200 {
            1.0
        } else if doc_len > 100 {
            0.7
        } else if doc_len > 30 {
            0.4
        } else if standard_name {
            0.6
        } else {
            0.2
        }
    }

    fn type_factor(&self, descriptor: &OperationDescriptor, doc: &DocBlock) -> f64 {
        let total = descriptor.parameters.len();
        let declared = descriptor
            .parameters
            .iter()
            .filter(|p| p.shape.is_declared())
            .count();
        let coverage = if total == 0 {
            0.0
        } else {
            declared as f64 / total as f64
        };
        let has_return = descriptor.has_declared_return();
        let has_defaults = descriptor.parameters.iter().any(|p| !p.required);

        if total == 0 && has_return {
            1.0
        } else if coverage >= 0.8 && has_return {
            1.0
        } else if coverage >= 0.5 && has_return {
            0.8
        } else if coverage >= 0.5 || has_return || doc.has_documented_types() {
            0.7
        } else if has_defaults {
            0.6
        } else {
            0.4
        }
    }

    fn visibility_factor(&self, descriptor: &OperationDescriptor, fact: ExportFact) -> f64 {
        if self
            .internal_namespace
            .is_match(&descriptor.namespace_path())
            || descriptor.name.starts_with('_')
        {
            return 0.0;
        }
        let top_level = descriptor.depth() <= 2 && !descriptor.is_member();
        match fact {
            ExportFact::Listed => 1.0,
            ExportFact::Unlisted => {
                if top_level {
                    0.8
                } else {
                    0.5
                }
            }
            ExportFact::NoList => {
                if top_level {
                    0.9
                } else {
                    0.7
                }
            }
        }
    }

    fn naming_factor(&self, descriptor: &OperationDescriptor) -> f64 {
        let name = descriptor.name.as_str();
        if self.bad_names.iter().any(|p| p.is_match(name)) {
            return 0.2;
        }
        if self.good_names.iter().any(|p| p.is_match(name)) {
            return 1.0;
        }
        0.6
    }

    fn hierarchy_factor(&self, descriptor: &OperationDescriptor) -> f64 {
        let parts = &descriptor.namespace;
        if parts.iter().skip(1).any(|part| {
            matches!(
                part.to_lowercase().as_str(),
                "utils" | "util" | "helpers" | "helper" | "cache"
            )
        }) {
            return 0.7;
        }
        if parts.iter().any(|part| {
            part.starts_with('_')
                || matches!(part.to_lowercase().as_str(), "tests" | "testing" | "test")
        }) {
            return 0.0;
        }
        let depth = parts.len();
        if depth > 2 {
            (1.0 - 0.2 * (depth as f64 - 2.0)).max(0.4)
        } else {
            1.0
        }
    }

    /// Flat deductions for shapes that are callable but unpleasant to call.
    fn usability_penalty(&self, descriptor: &OperationDescriptor, doc: &DocBlock) -> f64 {
        let mut penalty = 0.0;
        if descriptor.name.len() <= 2 {
            penalty += 5.0;
        }
        let has_cryptic_param = descriptor
            .parameters
            .iter()
            .any(|p| p.name.len() == 1 && doc.param(&p.name).is_none());
        if has_cryptic_param {
            penalty += 3.0;
        }
        let param_count = descriptor.parameters.len();
        if param_count > 10 {
            penalty += 10.0;
        } else if param_count > 8 {
            penalty += 5.0;
        }
        if descriptor.is_constructor && descriptor.doc_len() == 0 {
            penalty += 5.0;
        }
        penalty
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}
