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

//! The machine-readable API surface.
//!
//! An [`ApiSurface`] is the pipeline's final product: a versioned map of
//! route + verb to endpoint description. Routes are keyed through `BTreeMap`
//! so the serialized document is deterministic. The runtime treats a built
//! surface as read-only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::descriptor::{MethodSpec, Verb};
use crate::shape::TypeShape;

/// Schema version carried by every surface document.
pub const SURFACE_SCHEMA_VERSION: &str = "1.0";

/// One parameter of an endpoint, path- or query-positioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    #[serde(default)]
    pub shape: TypeShape,
}

/// One exposed endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Stable operation id, the qualified name with separators flattened.
    pub operation_id: String,
    pub route: String,
    pub verb: Verb,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub path_params: Vec<ParamSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub query_params: Vec<ParamSpec>,
    /// Structured request body for create/update-like verbs.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<TypeShape>,
    pub response: TypeShape,
}

/// Score distribution buckets over admitted operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBuckets {
    pub s90_100: usize,
    pub s80_89: usize,
    pub s70_79: usize,
    pub s60_69: usize,
}

impl ScoreBuckets {
    pub fn add(&mut self, score: f64) {
        if score >= 90.0 {
            self.s90_100 += 1;
        } else if score >= 80.0 {
            self.s80_89 += 1;
        } else if score >= 70.0 {
            self.s70_79 += 1;
        } else if score >= 60.0 {
            self.s60_69 += 1;
        }
    }
}

/// A top-ranked operation in the stats block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopOperation {
    pub qualified_name: String,
    pub score: f64,
}

/// Quality statistics recorded on the built surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceStats {
    /// Descriptors offered to the pipeline.
    pub scanned: usize,
    /// Operations that made it onto the surface.
    pub admitted: usize,
    /// Items skipped with a reason before scoring.
    pub skipped: usize,
    pub average_score: f64,
    pub buckets: ScoreBuckets,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub top: Vec<TopOperation>,
}

/// The final, versioned API surface document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSurface {
    pub title: String,
    pub version: String,
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub description: String,
    /// route → verb → endpoint.
    pub routes: BTreeMap<String, BTreeMap<Verb, Endpoint>>,
    #[serde(default)]
    pub stats: SurfaceStats,
}

impl ApiSurface {
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            version: version.into(),
            schema_version: SURFACE_SCHEMA_VERSION.to_string(),
            description: String::new(),
            routes: BTreeMap::new(),
            stats: SurfaceStats::default(),
        }
    }

    pub fn insert(&mut self, endpoint: Endpoint) {
        self.routes
            .entry(endpoint.route.clone())
            .or_default()
            .insert(endpoint.verb, endpoint);
    }

    pub fn endpoint(&self, route: &str, verb: Verb) -> Option<&Endpoint> {
        self.routes.get(route).and_then(|verbs| verbs.get(&verb))
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.routes.values().flat_map(|verbs| verbs.values())
    }

    /// Look up an endpoint by its stable operation id.
    pub fn find_operation(&self, operation_id: &str) -> Option<&Endpoint> {
        self.endpoints().find(|e| e.operation_id == operation_id)
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Response schema for operations returning an opaque object handle:
/// `{success, object_id, object_type, available_methods}`.
pub fn handle_envelope_shape(methods: &[MethodSpec]) -> TypeShape {
    let mut properties = BTreeMap::new();
    properties.insert("success".to_string(), TypeShape::boolean());
    properties.insert("object_id".to_string(), TypeShape::string());
    properties.insert("object_type".to_string(), TypeShape::string());
    let mut methods_shape = TypeShape::array(TypeShape::string());
    if !methods.is_empty() {
        methods_shape = methods_shape.with_description(format!(
            "Methods invocable on the stored object: {}",
            methods
                .iter()
                .map(|m| m.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    properties.insert("available_methods".to_string(), methods_shape);
    TypeShape::object_of(
        properties,
        vec![
            "success".to_string(),
            "object_id".to_string(),
            "object_type".to_string(),
            "available_methods".to_string(),
        ],
    )
}
