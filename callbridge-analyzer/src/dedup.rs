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

//! Near-duplicate collapsing.
//!
//! Libraries routinely expose the same capability under several verbs
//! (`get_user` / `fetch_user`). Descriptors are grouped by
//! (normalized purpose, parameter-name-set); within a group only the best
//! representative survives. Running the pass on its own output changes
//! nothing.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use callbridge_core::catalog::ExportFact;
use callbridge_core::descriptor::OperationDescriptor;
use tracing::debug;

/// Verb prefixes stripped before purposes are compared.
const PURPOSE_PREFIXES: &[&str] = &[
    "get_", "fetch_", "query_", "find_", "search_", "create_", "add_", "insert_", "make_",
    "update_", "modify_", "edit_", "set_", "delete_", "remove_", "del_",
];

#[derive(Debug, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub fn new() -> Self {
        Self
    }

    /// Strip one leading verb prefix and case-fold.
    pub fn normalize_purpose(&self, name: &str) -> String {
        let lower = name.to_lowercase();
        for prefix in PURPOSE_PREFIXES {
            if let Some(rest) = lower.strip_prefix(prefix) {
                return rest.to_string();
            }
        }
        lower
    }

    /// Collapse each duplicate group to its best representative. `fact_of`
    /// supplies export-list membership for the tie-break.
    pub fn dedup<F>(
        &self,
        descriptors: Vec<OperationDescriptor>,
        fact_of: F,
    ) -> Vec<OperationDescriptor>
    where
        F: Fn(&OperationDescriptor) -> ExportFact,
    {
        let before = descriptors.len();
        let mut groups: HashMap<(String, BTreeSet<String>), Vec<OperationDescriptor>> =
            HashMap::new();
        let mut order: Vec<(String, BTreeSet<String>)> = Vec::new();

        for descriptor in descriptors {
            let key = (
                self.normalize_purpose(&descriptor.name),
                descriptor
                    .param_name_set()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            );
            match groups.entry(key) {
                Entry::Occupied(mut slot) => slot.get_mut().push(descriptor),
                Entry::Vacant(slot) => {
                    order.push(slot.key().clone());
                    slot.insert(vec![descriptor]);
                }
            }
        }

        let mut result = Vec::with_capacity(order.len());
        for key in order {
            let group = groups.remove(&key).unwrap_or_default();
            if let Some(best) = pick_best(group, &fact_of) {
                result.push(best);
            }
        }
        if result.len() != before {
            debug!(before, after = result.len(), "collapsed duplicate operations");
        }
        result
    }
}

/// Best descriptor by, in order: score, documentation length, fewer
/// parameters, export membership, shorter name. The first maximal element
/// wins on full ties.
fn pick_best<F>(group: Vec<OperationDescriptor>, fact_of: &F) -> Option<OperationDescriptor>
where
    F: Fn(&OperationDescriptor) -> ExportFact,
{
    let mut iter = group.into_iter();
    let mut best = iter.next()?;
    for candidate in iter {
        if compare(&candidate, &best, fact_of) == Ordering::Greater {
            best = candidate;
        }
    }
    Some(best)
}

fn compare<F>(a: &OperationDescriptor, b: &OperationDescriptor, fact_of: &F) -> Ordering
where
    F: Fn(&OperationDescriptor) -> ExportFact,
{
    let listed = |d: &OperationDescriptor| fact_of(d) == ExportFact::Listed;
    a.score
        .total_cmp(&b.score)
        .then_with(|| a.doc_len().cmp(&b.doc_len()))
        .then_with(|| b.parameters.len().cmp(&a.parameters.len()))
        .then_with(|| listed(a).cmp(&listed(b)))
        .then_with(|| b.name.len().cmp(&a.name.len()))
}
