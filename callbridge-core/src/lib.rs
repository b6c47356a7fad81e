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

//! Callbridge Core
//!
//! Shared data model for the Callbridge pipeline and runtime: operation
//! descriptors as delivered by an external scanner, the catalog that holds
//! them, JSON-schema-like type shapes, and the API surface document the
//! analysis pipeline ultimately emits.

pub mod catalog;
pub mod descriptor;
pub mod shape;
pub mod surface;

pub use catalog::{
    CatalogCoverage, CatalogError, ExportFact, NamespaceInfo, OperationCatalog, SkippedOperation,
};
pub use descriptor::{MethodSpec, OperationDescriptor, ParamKind, ParameterShape, Verb};
pub use shape::{ShapeKind, TypeShape};
pub use surface::{
    handle_envelope_shape, ApiSurface, Endpoint, ParamSpec, ScoreBuckets, SurfaceStats,
    TopOperation, SURFACE_SCHEMA_VERSION,
};
