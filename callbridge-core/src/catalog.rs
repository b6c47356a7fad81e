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

//! Operation catalog.
//!
//! The catalog is the hand-off point between the external scanner and the
//! analysis pipeline. It holds raw descriptors, per-namespace export facts,
//! and a ledger of items the scanner (or a later filter) skipped together
//! with the reason. The scanner owns discovery; the catalog never re-derives
//! export lists or metadata from source text.
//!
//! Qualified names are unique across the whole catalog; inserting a
//! duplicate is rejected rather than silently overwritten.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::descriptor::OperationDescriptor;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("operation '{qualified_name}' is already present in the catalog")]
    DuplicateOperation { qualified_name: String },
}

/// Export facts for one namespace, as reported by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    /// Dotted namespace path.
    pub path: String,
    /// Explicit export-name list, when the namespace declares one. `Some`
    /// with an empty set means "declared, exports nothing".
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub export_list: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub doc: Option<String>,
}

impl NamespaceInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            export_list: None,
            doc: None,
        }
    }

    pub fn with_exports<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.export_list = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn has_export_list(&self) -> bool {
        self.export_list.is_some()
    }
}

/// Whether a name appears in its namespace's export list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFact {
    /// Namespace declares a list and the name is on it.
    Listed,
    /// Namespace declares a list and the name is absent.
    Unlisted,
    /// Namespace declares no list.
    NoList,
}

/// A discovered item that was dropped before scoring, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedOperation {
    pub qualified_name: String,
    pub reason: String,
}

/// Raw descriptors plus namespace facts, as handed in by the scanner.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    descriptors: Vec<OperationDescriptor>,
    namespaces: BTreeMap<String, NamespaceInfo>,
    skipped: Vec<SkippedOperation>,
    names: HashSet<String>,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one descriptor. Rejects a qualified name already present.
    pub fn insert(&mut self, descriptor: OperationDescriptor) -> Result<(), CatalogError> {
        if !self.names.insert(descriptor.qualified_name.clone()) {
            return Err(CatalogError::DuplicateOperation {
                qualified_name: descriptor.qualified_name,
            });
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Record export facts for a namespace, replacing any previous record.
    pub fn record_namespace(&mut self, info: NamespaceInfo) {
        self.namespaces.insert(info.path.clone(), info);
    }

    /// Record an item the scanner could not introspect. Never fails; a bad
    /// namespace must not abort the whole pass.
    pub fn record_skip(&mut self, qualified_name: impl Into<String>, reason: impl Into<String>) {
        let skip = SkippedOperation {
            qualified_name: qualified_name.into(),
            reason: reason.into(),
        };
        debug!(item = %skip.qualified_name, reason = %skip.reason, "catalog skip");
        self.skipped.push(skip);
    }

    pub fn descriptors(&self) -> &[OperationDescriptor] {
        &self.descriptors
    }

    pub fn namespace(&self, path: &str) -> Option<&NamespaceInfo> {
        self.namespaces.get(path)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &NamespaceInfo> {
        self.namespaces.values()
    }

    pub fn skipped(&self) -> &[SkippedOperation] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Export-list membership fact for one descriptor.
    pub fn export_fact(&self, descriptor: &OperationDescriptor) -> ExportFact {
        match self
            .namespaces
            .get(&descriptor.namespace_path())
            .and_then(|ns| ns.export_list.as_ref())
        {
            Some(list) if list.contains(&descriptor.name) => ExportFact::Listed,
            Some(_) => ExportFact::Unlisted,
            None => ExportFact::NoList,
        }
    }

    /// Aggregate coverage ratios feeding adaptive weight derivation:
    /// fraction of descriptors with documentation, with a declared return
    /// shape, and living in a namespace that declares an export list.
    pub fn coverage(&self) -> CatalogCoverage {
        if self.descriptors.is_empty() {
            return CatalogCoverage::default();
        }
        let total = self.descriptors.len() as f64;
        let documented = self
            .descriptors
            .iter()
            .filter(|d| d.doc_len() > 0)
            .count() as f64;
        let typed = self
            .descriptors
            .iter()
            .filter(|d| d.has_declared_return())
            .count() as f64;
        let exported = self
            .descriptors
            .iter()
            .filter(|d| self.export_fact(d) != ExportFact::NoList)
            .count() as f64;
        CatalogCoverage {
            doc: documented / total,
            types: typed / total,
            exports: exported / total,
        }
    }
}

/// Aggregate coverage ratios over a catalog, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CatalogCoverage {
    pub doc: f64,
    pub types: f64,
    pub exports: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(qualified: &str, name: &str, namespace: &[&str]) -> OperationDescriptor {
        OperationDescriptor::new(
            qualified,
            name,
            namespace.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn duplicate_qualified_names_are_rejected() {
        let mut catalog = OperationCatalog::new();
        catalog
            .insert(descriptor("lib.run", "run", &["lib"]))
            .unwrap();
        let err = catalog
            .insert(descriptor("lib.run", "run", &["lib"]))
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateOperation { .. }));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn export_facts_reflect_namespace_lists() {
        let mut catalog = OperationCatalog::new();
        catalog.record_namespace(NamespaceInfo::new("lib").with_exports(["run"]));
        catalog
            .insert(descriptor("lib.run", "run", &["lib"]))
            .unwrap();
        catalog
            .insert(descriptor("lib.helper", "helper", &["lib"]))
            .unwrap();
        catalog
            .insert(descriptor("other.thing", "thing", &["other"]))
            .unwrap();

        let facts: Vec<ExportFact> = catalog
            .descriptors()
            .iter()
            .map(|d| catalog.export_fact(d))
            .collect();
        assert_eq!(
            facts,
            vec![ExportFact::Listed, ExportFact::Unlisted, ExportFact::NoList]
        );
    }

    #[test]
    fn skip_ledger_accumulates() {
        let mut catalog = OperationCatalog::new();
        catalog.record_skip("lib.broken", "introspection raised");
        catalog.record_skip("lib.native", "opaque required parameter");
        assert_eq!(catalog.skipped().len(), 2);
        assert_eq!(catalog.skipped()[0].reason, "introspection raised");
    }

    #[test]
    fn coverage_ratios() {
        let mut catalog = OperationCatalog::new();
        catalog.record_namespace(NamespaceInfo::new("lib").with_exports(["a"]));
        let mut a = descriptor("lib.a", "a", &["lib"]);
        a.doc = Some("Documented.".into());
        a.return_shape = Some(crate::shape::TypeShape::string());
        let b = descriptor("other.b", "b", &["other"]);
        catalog.insert(a).unwrap();
        catalog.insert(b).unwrap();

        let cov = catalog.coverage();
        assert_eq!(cov.doc, 0.5);
        // Export coverage counts namespaces that declare a list at all.
        assert_eq!(cov.exports, 0.5);
        assert_eq!(cov.types, 0.5);
    }
}
