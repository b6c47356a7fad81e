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

//! Adaptive exposure budgeting.
//!
//! Exposing every scored operation would drown callers in endpoints, and a
//! pure global top-N would starve small namespaces. Allocation runs in two
//! phases:
//!
//! 1. Fairness floor: every namespace with candidates keeps its locally
//!    best min-keep operations.
//! 2. Merit: the remaining budget (keep-ratio of the total, minus phase-1
//!    spend) is split proportional to namespace weight
//!    `(1/depth) * (2 if exported else 1) * (0.5 + avg_score/200)`,
//!    clipped to per-namespace capacity. Rounding slack goes to the
//!    heaviest namespaces; any residual spills over to global score order.
//!
//! Admission is thresholded separately: candidates must clear the minimum
//! score, stepping down once to the fallback score when fewer than
//! [`FALLBACK_TRIGGER`] clear it, so sparsely documented sources still get
//! a usable surface.

use std::collections::BTreeMap;

use callbridge_core::descriptor::OperationDescriptor;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Below this many admitted candidates, the threshold steps down once.
pub const FALLBACK_TRIGGER: usize = 5;

/// Budget knobs. Defaults are the balanced preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Minimum score for admission.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Step-down threshold used when too few candidates clear `min_score`.
    #[serde(default = "default_fallback_score")]
    pub fallback_score: f64,
    /// Fraction of admitted candidates the budget targets.
    #[serde(default = "default_keep_ratio")]
    pub keep_ratio: f64,
    /// Fairness floor per namespace.
    #[serde(default = "default_min_keep")]
    pub min_keep: usize,
    /// Hard cap per namespace.
    #[serde(default = "default_max_keep")]
    pub max_keep: usize,
    /// Absolute ceiling on exposed operations.
    #[serde(default = "default_max_functions")]
    pub max_functions: usize,
}

fn default_min_score() -> f64 {
    75.0
}

fn default_fallback_score() -> f64 {
    60.0
}

fn default_keep_ratio() -> f64 {
    0.3
}

fn default_min_keep() -> usize {
    3
}

fn default_max_keep() -> usize {
    30
}

fn default_max_functions() -> usize {
    3000
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            fallback_score: default_fallback_score(),
            keep_ratio: default_keep_ratio(),
            min_keep: default_min_keep(),
            max_keep: default_max_keep(),
            max_functions: default_max_functions(),
        }
    }
}

impl BudgetConfig {
    /// Small, high-confidence surface.
    pub fn strict() -> Self {
        Self {
            min_score: 95.0,
            max_functions: 50,
            ..Self::default()
        }
    }

    pub fn balanced() -> Self {
        Self::default()
    }

    /// Expose nearly everything that clears the fallback bar.
    pub fn permissive() -> Self {
        Self {
            min_score: 60.0,
            max_functions: 20_000,
            ..Self::default()
        }
    }
}

/// Result of the admission threshold, carrying the threshold that ended up
/// in force.
#[derive(Debug)]
pub struct Admission {
    pub admitted: Vec<OperationDescriptor>,
    pub threshold: f64,
}

#[derive(Debug, Default)]
pub struct AdaptiveBudgetAllocator {
    config: BudgetConfig,
}

impl AdaptiveBudgetAllocator {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Apply the admission threshold, stepping down once when the surface
    /// would otherwise be unusably small.
    pub fn admit(&self, descriptors: Vec<OperationDescriptor>) -> Admission {
        let min_score = self.config.min_score;
        let fallback = self.config.fallback_score;
        let (mut admitted, rest): (Vec<_>, Vec<_>) = descriptors
            .into_iter()
            .partition(|d| d.score >= min_score);

        if admitted.len() < FALLBACK_TRIGGER && min_score > fallback {
            let rescued = rest.into_iter().filter(|d| d.score >= fallback);
            let before = admitted.len();
            admitted.extend(rescued);
            info!(
                admitted_at_minimum = before,
                admitted_at_fallback = admitted.len() - before,
                fallback,
                "stepped admission threshold down"
            );
            return Admission {
                admitted,
                threshold: fallback,
            };
        }
        Admission {
            admitted,
            threshold: min_score,
        }
    }

    /// Two-phase allocation. `has_export_list` reports whether a namespace
    /// declares an explicit export list; it doubles that namespace's weight.
    pub fn allocate<F>(
        &self,
        descriptors: Vec<OperationDescriptor>,
        has_export_list: F,
    ) -> Vec<OperationDescriptor>
    where
        F: Fn(&str) -> bool,
    {
        if descriptors.is_empty() {
            return descriptors;
        }
        let total_items = descriptors.len();

        let mut by_namespace: BTreeMap<String, Vec<OperationDescriptor>> = BTreeMap::new();
        for descriptor in descriptors {
            by_namespace
                .entry(descriptor.namespace_path())
                .or_default()
                .push(descriptor);
        }
        for items in by_namespace.values_mut() {
            items.sort_by(|a, b| b.score.total_cmp(&a.score));
        }

        let weights: BTreeMap<String, f64> = by_namespace
            .iter()
            .map(|(namespace, items)| {
                let depth = namespace.split('.').count().max(1) as f64;
                let export_factor = if has_export_list(namespace) { 2.0 } else { 1.0 };
                let avg_score =
                    items.iter().map(|d| d.score).sum::<f64>() / items.len() as f64;
                let weight = (1.0 / depth) * export_factor * (0.5 + avg_score / 200.0);
                (namespace.clone(), weight)
            })
            .collect();

        let min_needed: usize = by_namespace
            .values()
            .map(|items| self.config.min_keep.min(items.len()))
            .sum();
        let ratio_budget = (total_items as f64 * self.config.keep_ratio).round() as usize;
        let total_budget = total_items.min(ratio_budget.max(min_needed).max(1));

        // Phase 1: fairness floor.
        let mut kept: Vec<OperationDescriptor> = Vec::new();
        let mut allocated: BTreeMap<&str, usize> = BTreeMap::new();
        for (namespace, items) in &by_namespace {
            let floor = self.config.min_keep.min(self.config.max_keep).min(items.len());
            allocated.insert(namespace.as_str(), floor);
            kept.extend(items[..floor].iter().cloned());
        }

        let remaining_budget = total_budget.saturating_sub(kept.len());
        if remaining_budget == 0 {
            kept.sort_by(|a, b| b.score.total_cmp(&a.score));
            kept.truncate(total_budget);
            return self.finish(kept);
        }

        // Phase 2: weighted distribution of the remaining budget.
        let total_weight: f64 = weights.values().sum::<f64>().max(f64::MIN_POSITIVE);
        let mut extra: BTreeMap<&str, usize> = BTreeMap::new();
        for (namespace, items) in &by_namespace {
            let capacity = self.capacity(items.len()) - allocated[namespace.as_str()];
            if capacity == 0 {
                extra.insert(namespace.as_str(), 0);
                continue;
            }
            let quota =
                (remaining_budget as f64 * (weights[namespace.as_str()] / total_weight)) as usize;
            extra.insert(namespace.as_str(), quota.min(capacity));
        }

        // Hand truncation slack to the heaviest namespaces first.
        let assigned: usize = extra.values().sum();
        if assigned < remaining_budget {
            let mut ranked: Vec<&str> = by_namespace.keys().map(String::as_str).collect();
            ranked.sort_by(|a, b| weights[*b].total_cmp(&weights[*a]));
            let mut slack = remaining_budget - assigned;
            for namespace in ranked {
                if slack == 0 {
                    break;
                }
                let items = &by_namespace[namespace];
                let capacity =
                    self.capacity(items.len()) - allocated[namespace] - extra[namespace];
                let take = capacity.min(slack);
                if take > 0 {
                    if let Some(assigned) = extra.get_mut(namespace) {
                        *assigned += take;
                    }
                    slack -= take;
                }
            }
        }

        let mut candidates: Vec<OperationDescriptor> = Vec::new();
        for (namespace, items) in &by_namespace {
            let start = allocated[namespace.as_str()];
            let end = (start + extra[namespace.as_str()]).min(items.len());
            candidates.extend(items[start..end].iter().cloned());
        }

        // Residual budget spills over to pure global score order.
        if candidates.len() < remaining_budget {
            let mut spillover: Vec<OperationDescriptor> = Vec::new();
            for (namespace, items) in &by_namespace {
                let start = allocated[namespace.as_str()] + extra[namespace.as_str()];
                let end = self.capacity(items.len());
                if start < end {
                    spillover.extend(items[start..end].iter().cloned());
                }
            }
            spillover.sort_by(|a, b| b.score.total_cmp(&a.score));
            spillover.truncate(remaining_budget - candidates.len());
            candidates.extend(spillover);
        }

        candidates.truncate(remaining_budget);
        kept.extend(candidates);
        kept.sort_by(|a, b| b.score.total_cmp(&a.score));
        kept.truncate(total_budget);
        self.finish(kept)
    }

    fn capacity(&self, namespace_size: usize) -> usize {
        self.config.max_keep.min(namespace_size)
    }

    /// Final ordering and the absolute ceiling.
    fn finish(&self, mut kept: Vec<OperationDescriptor>) -> Vec<OperationDescriptor> {
        kept.sort_by(|a, b| b.score.total_cmp(&a.score));
        if kept.len() > self.config.max_functions {
            debug!(
                kept = kept.len(),
                ceiling = self.config.max_functions,
                "truncating at max functions"
            );
            kept.truncate(self.config.max_functions);
        }
        kept
    }
}
