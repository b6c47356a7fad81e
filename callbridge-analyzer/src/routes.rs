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

//! Conflict-free route assignment.
//!
//! Every operation starts with the shortest route that could work:
//! owning type (if any) plus operation name plus path parameters. Routes
//! are then grouped by (route, verb); only groups that actually collide
//! escalate, first to the immediate owning namespace, then to the full
//! namespace path. Grouping repeats until no collisions remain, so an
//! escalation that lands on another group's route is caught on the next
//! round. Operations that never collide keep their short routes.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use callbridge_core::catalog::SkippedOperation;
use callbridge_core::descriptor::{OperationDescriptor, ParamKind, Verb};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

/// Parameter names ending in `id` become path parameters.
pub const DEFAULT_PATH_PARAM_PATTERN: &str = r"(?i).*_?id$";

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid path parameter pattern '{pattern}': {source}")]
    InvalidPathParamPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Route generation strategies, shortest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteStrategy {
    /// Owning type + name.
    Simple,
    /// Immediate owning namespace + owning type + name.
    Namespace,
    /// Full namespace path + owning type + name.
    Full,
}

impl RouteStrategy {
    fn escalate(self) -> Option<Self> {
        match self {
            RouteStrategy::Simple => Some(RouteStrategy::Namespace),
            RouteStrategy::Namespace => Some(RouteStrategy::Full),
            RouteStrategy::Full => None,
        }
    }
}

#[derive(Debug)]
pub struct RouteResolver {
    path_param: Regex,
}

impl Default for RouteResolver {
    fn default() -> Self {
        Self {
            path_param: Regex::new(DEFAULT_PATH_PARAM_PATTERN).expect("default pattern compiles"),
        }
    }
}

impl RouteResolver {
    /// Build a resolver with a custom path-parameter pattern.
    pub fn with_pattern(pattern: &str) -> Result<Self, RouteError> {
        let path_param =
            Regex::new(pattern).map_err(|source| RouteError::InvalidPathParamPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self { path_param })
    }

    /// Assign verbs, classify path parameters, and resolve routes until no
    /// two survivors share (route, verb). In the rare case where even full
    /// namespace paths coincide, only the best-scoring operation keeps the
    /// route; the rest are dropped and reported.
    pub fn resolve(
        &self,
        mut descriptors: Vec<OperationDescriptor>,
    ) -> (Vec<OperationDescriptor>, Vec<SkippedOperation>) {
        for descriptor in &mut descriptors {
            descriptor.verb = Verb::infer(&descriptor.name);
            for param in &mut descriptor.parameters {
                param.kind = if self.path_param.is_match(&param.name) {
                    ParamKind::Path
                } else {
                    ParamKind::Data
                };
            }
        }

        let mut strategies = vec![RouteStrategy::Simple; descriptors.len()];
        for (descriptor, strategy) in descriptors.iter_mut().zip(&strategies) {
            descriptor.route = render_route(descriptor, *strategy);
        }

        loop {
            let mut conflicted = conflicted_indices(&descriptors);
            if conflicted.is_empty() {
                return (descriptors, Vec::new());
            }
            conflicted.sort_unstable();

            let mut progressed = false;
            for index in conflicted {
                if let Some(next) = strategies[index].escalate() {
                    strategies[index] = next;
                    let descriptor = &mut descriptors[index];
                    descriptor.route = render_route(descriptor, next);
                    debug!(
                        operation = %descriptor.qualified_name,
                        route = %descriptor.route,
                        "escalated route"
                    );
                    progressed = true;
                }
            }
            if !progressed {
                return drop_unresolvable(descriptors);
            }
        }
    }
}

fn render_route(descriptor: &OperationDescriptor, strategy: RouteStrategy) -> String {
    let mut route = String::new();
    match strategy {
        RouteStrategy::Simple => {}
        RouteStrategy::Namespace => {
            if let Some(segment) = descriptor.namespace.last() {
                route.push('/');
                route.push_str(&segment.to_lowercase());
            }
        }
        RouteStrategy::Full => {
            for segment in &descriptor.namespace {
                route.push('/');
                route.push_str(&segment.to_lowercase());
            }
        }
    }
    if let Some(owner) = &descriptor.owner_type {
        route.push('/');
        route.push_str(&owner.to_lowercase());
    }
    route.push('/');
    route.push_str(&descriptor.name);
    for param in descriptor.path_params() {
        route.push_str("/{");
        route.push_str(&param.name);
        route.push('}');
    }
    route
}

fn conflicted_indices(descriptors: &[OperationDescriptor]) -> Vec<usize> {
    let mut groups: HashMap<(&str, Verb), Vec<usize>> = HashMap::new();
    for (index, descriptor) in descriptors.iter().enumerate() {
        groups
            .entry((descriptor.route.as_str(), descriptor.verb))
            .or_default()
            .push(index);
    }
    groups
        .into_values()
        .filter(|members| members.len() > 1)
        .flatten()
        .collect()
}

/// Full routes collide only when two qualified names differ by case alone
/// (routes are lowercased). Keep the best-scoring member per group, drop
/// the rest.
fn drop_unresolvable(
    descriptors: Vec<OperationDescriptor>,
) -> (Vec<OperationDescriptor>, Vec<SkippedOperation>) {
    let mut winners: HashMap<(String, Verb), OperationDescriptor> = HashMap::new();
    let mut skipped = Vec::new();

    for descriptor in descriptors {
        let key = (descriptor.route.clone(), descriptor.verb);
        match winners.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(descriptor);
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get_mut();
                let challenger_wins = descriptor.score > current.score
                    || (descriptor.score == current.score
                        && descriptor.qualified_name < current.qualified_name);
                let loser = if challenger_wins {
                    std::mem::replace(current, descriptor)
                } else {
                    descriptor
                };
                let (route, verb) = slot.key();
                warn!(
                    operation = %loser.qualified_name,
                    route = %route,
                    verb = %verb,
                    "dropping operation with unresolvable route conflict"
                );
                skipped.push(SkippedOperation {
                    qualified_name: loser.qualified_name,
                    reason: format!("route conflict at {verb} {route}"),
                });
            }
        }
    }

    let mut kept: Vec<OperationDescriptor> = winners.into_values().collect();
    kept.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
    skipped.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
    (kept, skipped)
}
