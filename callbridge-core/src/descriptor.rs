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

//! Operation descriptors.
//!
//! An [`OperationDescriptor`] is one discovered callable plus its reflected
//! metadata: where it lives, what it takes, what it returns, and how it is
//! documented. Descriptors are produced by an external scanner, scored and
//! possibly dropped by the analysis pipeline, and become immutable once an
//! API surface has been built from them.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shape::TypeShape;

/// Where a parameter travels in a resolved route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Embedded in the route path.
    Path,
    /// Carried as query or body data, decided per verb when the surface is
    /// built.
    #[default]
    Data,
}

/// One declared parameter of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterShape {
    pub name: String,
    pub required: bool,
    #[serde(default)]
    pub shape: TypeShape,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub kind: ParamKind,
}

impl ParameterShape {
    pub fn required(name: impl Into<String>, shape: TypeShape) -> Self {
        Self {
            name: name.into(),
            required: true,
            shape,
            default: None,
            kind: ParamKind::Data,
        }
    }

    pub fn optional(name: impl Into<String>, shape: TypeShape) -> Self {
        Self {
            name: name.into(),
            required: false,
            shape,
            default: None,
            kind: ParamKind::Data,
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self.required = false;
        self
    }
}

/// Advertised method of an opaque return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    /// Parameter names in declaration order.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub params: Vec<String>,
    /// Subset of `params` that must be supplied.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub required: Vec<String>,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            required: Vec::new(),
        }
    }
}

/// HTTP-like verb for a resolved endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Read,
    Create,
    Update,
    Patch,
    Delete,
}

const READ_PREFIXES: &[&str] = &["get", "list", "fetch", "search", "query", "find"];
const CREATE_PREFIXES: &[&str] = &["create", "add", "insert"];
const UPDATE_PREFIXES: &[&str] = &["update", "modify", "edit"];
const DELETE_PREFIXES: &[&str] = &["delete", "remove"];
const READ_NAMES: &[&str] = &["load", "loads", "read", "parse", "decode"];
const CREATE_NAMES: &[&str] = &["dump", "dumps", "write", "save", "encode"];

impl Verb {
    /// Infer a verb from the operation name. Unrecognized names default to
    /// the create-like verb since invoking an unknown operation is assumed
    /// to have effects.
    pub fn infer(name: &str) -> Self {
        let lower = name.to_lowercase();
        if READ_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return Verb::Read;
        }
        if CREATE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return Verb::Create;
        }
        if UPDATE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return Verb::Update;
        }
        if lower.starts_with("patch") {
            return Verb::Patch;
        }
        if DELETE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return Verb::Delete;
        }
        if READ_NAMES.contains(&lower.as_str()) {
            return Verb::Read;
        }
        if CREATE_NAMES.contains(&lower.as_str()) {
            return Verb::Create;
        }
        Verb::Create
    }

    /// Whether non-path parameters travel in a request body rather than as
    /// query-style parameters.
    pub fn carries_body(self) -> bool {
        matches!(self, Verb::Create | Verb::Update | Verb::Patch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Read => "read",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discovered callable operation plus its reflected metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    /// Globally unique identity, e.g. `imagelib.filters.blur`.
    pub qualified_name: String,
    /// Display name, without namespace or owner.
    pub name: String,
    /// Ordered namespace segments, outermost first.
    pub namespace: Vec<String>,
    /// Owning type for member operations.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner_type: Option<String>,
    /// Raw documentation text as reflected by the scanner.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub doc: Option<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub is_constructor: bool,
    #[serde(default)]
    pub parameters: Vec<ParameterShape>,
    /// Declared return shape, if the scanner resolved one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub return_shape: Option<TypeShape>,
    /// Synthesized route. Empty until the route resolver runs.
    #[serde(default)]
    pub route: String,
    /// Inferred verb. Meaningful only after the route resolver runs.
    #[serde(default = "default_verb")]
    pub verb: Verb,
    /// Quality score in [0, 100], assigned by the scorer.
    #[serde(default)]
    pub score: f64,
    /// Whether invoking this operation yields an opaque object handle.
    #[serde(default)]
    pub returns_handle: bool,
    /// Advertised methods of the returned handle, when opaque.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub handle_methods: Vec<MethodSpec>,
}

fn default_verb() -> Verb {
    Verb::Create
}

impl OperationDescriptor {
    pub fn new(
        qualified_name: impl Into<String>,
        name: impl Into<String>,
        namespace: Vec<String>,
    ) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            name: name.into(),
            namespace,
            owner_type: None,
            doc: None,
            is_async: false,
            is_constructor: false,
            parameters: Vec::new(),
            return_shape: None,
            route: String::new(),
            verb: default_verb(),
            score: 0.0,
            returns_handle: false,
            handle_methods: Vec::new(),
        }
    }

    /// Member operation (owned by a type) rather than a free function.
    pub fn is_member(&self) -> bool {
        self.owner_type.is_some()
    }

    /// Namespace depth in segments.
    pub fn depth(&self) -> usize {
        self.namespace.len()
    }

    /// Dotted namespace path.
    pub fn namespace_path(&self) -> String {
        self.namespace.join(".")
    }

    /// Surface operation id: the qualified name with namespace separators
    /// flattened to underscores.
    pub fn operation_id(&self) -> String {
        self.qualified_name.replace('.', "_")
    }

    pub fn doc_len(&self) -> usize {
        self.doc.as_deref().map_or(0, str::len)
    }

    pub fn has_declared_return(&self) -> bool {
        self.return_shape.as_ref().is_some_and(TypeShape::is_declared)
    }

    /// Parameter names as a set, used for duplicate grouping.
    pub fn param_name_set(&self) -> BTreeSet<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn path_params(&self) -> impl Iterator<Item = &ParameterShape> {
        self.parameters.iter().filter(|p| p.kind == ParamKind::Path)
    }

    pub fn data_params(&self) -> impl Iterator<Item = &ParameterShape> {
        self.parameters.iter().filter(|p| p.kind == ParamKind::Data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_inference_follows_name_prefixes() {
        assert_eq!(Verb::infer("get_user"), Verb::Read);
        assert_eq!(Verb::infer("list_items"), Verb::Read);
        assert_eq!(Verb::infer("find_by_name"), Verb::Read);
        assert_eq!(Verb::infer("create_widget"), Verb::Create);
        assert_eq!(Verb::infer("add_entry"), Verb::Create);
        assert_eq!(Verb::infer("update_config"), Verb::Update);
        assert_eq!(Verb::infer("patch_record"), Verb::Patch);
        assert_eq!(Verb::infer("delete_user"), Verb::Delete);
        assert_eq!(Verb::infer("remove_tag"), Verb::Delete);
    }

    #[test]
    fn exact_io_names_map_to_read_and_create() {
        assert_eq!(Verb::infer("loads"), Verb::Read);
        assert_eq!(Verb::infer("parse"), Verb::Read);
        assert_eq!(Verb::infer("dumps"), Verb::Create);
        assert_eq!(Verb::infer("save"), Verb::Create);
        // Exact-name rules do not apply to prefixed forms.
        assert_eq!(Verb::infer("load_config"), Verb::Create);
    }

    #[test]
    fn unknown_names_default_to_create() {
        assert_eq!(Verb::infer("transmogrify"), Verb::Create);
        assert!(Verb::infer("transmogrify").carries_body());
        assert!(!Verb::infer("get_x").carries_body());
    }

    #[test]
    fn descriptor_helpers() {
        let mut d = OperationDescriptor::new(
            "lib.sub.tool",
            "tool",
            vec!["lib".into(), "sub".into()],
        );
        d.parameters = vec![
            ParameterShape::required("name", TypeShape::string()),
            ParameterShape::optional("count", TypeShape::integer()),
        ];
        assert_eq!(d.depth(), 2);
        assert_eq!(d.namespace_path(), "lib.sub");
        assert!(!d.is_member());
        assert_eq!(d.param_name_set().len(), 2);
        assert_eq!(d.data_params().count(), 2);
        assert_eq!(d.path_params().count(), 0);
    }
}
