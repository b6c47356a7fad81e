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

//! Declarative per-type serialization rules.
//!
//! Rules are data, not code: a JSON table maps type names to field
//! extraction recipes. [`RuleSet::compile`] resolves `extends` inheritance
//! once at startup so evaluation never walks the raw table again. A rule
//! that cannot be evaluated for a given object (failed limits, broken
//! attribute path) defers, and the engine falls through to its generic
//! handling.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;
use tracing::warn;

use crate::value::OpaqueObject;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("failed to read handler rules {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse handler rules: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Raw handler-rule table, as loaded from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerRules {
    #[serde(default)]
    pub handlers: BTreeMap<String, TypeRule>,
}

impl HandlerRules {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RulesError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| RulesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn from_json(value: Json) -> Result<Self, RulesError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// One type's serialization recipe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeRule {
    /// Parent rule to inherit from. Child fields win key by key; a child
    /// list of conditional fields replaces the parent's list.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extends: Option<String>,

    /// Whether a successful evaluation yields inline data or a handle.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<ResultKind>,

    #[serde(default)]
    pub fields: BTreeMap<String, FieldRule>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub conditional_fields: Vec<ConditionalField>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub limits: Option<SizeLimits>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    #[default]
    Direct,
    ObjectRef,
}

/// How one output field is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldRule {
    /// A fixed value.
    Literal { value: Json },
    /// An attribute path on the object, e.g. `"shape[0]"` or `"meta.name"`.
    Attribute {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        default: Option<Json>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        transform: Option<Transform>,
    },
    /// A named expression: `type_name`, `preview`, `size_estimate`,
    /// `json_size`, or `format:<template>` with `{path}` placeholders.
    Computed { expression: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    String,
    Int,
    Float,
    List,
    Base64,
}

/// A field included only when its condition holds for the object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalField {
    pub condition: Condition,
    pub field: String,
    #[serde(flatten)]
    pub rule: FieldRule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Include the field when the object exposes this attribute.
    pub has_field: String,
}

/// Dimension ceilings. An object over any limit makes the whole rule
/// defer; a missing getter measures zero and passes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizeLimits {
    #[serde(default)]
    pub dimensions: Vec<DimensionLimit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionLimit {
    /// Attribute path yielding the measured value, e.g. `"shape[0]"`.
    pub getter: String,
    pub max: u64,
}

/// Extends-resolved rule table, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: BTreeMap<String, Arc<CompiledRule>>,
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub result: ResultKind,
    pub fields: BTreeMap<String, FieldRule>,
    pub conditional_fields: Vec<ConditionalField>,
    pub limits: Option<SizeLimits>,
}

impl RuleSet {
    pub fn compile(raw: HandlerRules) -> Self {
        let mut rules = BTreeMap::new();
        for name in raw.handlers.keys() {
            let mut seen = HashSet::new();
            if let Some(rule) = Self::resolve(&raw, name, &mut seen) {
                rules.insert(name.clone(), Arc::new(rule));
            }
        }
        Self { rules }
    }

    /// Resolve one rule with its inheritance chain. A cycle breaks at the
    /// revisited rule, which then resolves without a parent.
    fn resolve(raw: &HandlerRules, name: &str, seen: &mut HashSet<String>) -> Option<CompiledRule> {
        let rule = raw.handlers.get(name)?;
        if !seen.insert(name.to_string()) {
            warn!(rule = name, "handler rule cycle; resolving without parent");
            return Some(CompiledRule::from_rule(rule));
        }
        let parent = rule.extends.as_deref().and_then(|parent_name| {
            let resolved = Self::resolve(raw, parent_name, seen);
            if resolved.is_none() {
                warn!(rule = name, parent = parent_name, "unknown parent rule");
            }
            resolved
        });
        Some(match parent {
            Some(parent) => parent.merged_with(rule),
            None => CompiledRule::from_rule(rule),
        })
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<CompiledRule>> {
        self.rules.get(type_name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl CompiledRule {
    fn from_rule(rule: &TypeRule) -> Self {
        Self {
            result: rule.result.unwrap_or_default(),
            fields: rule.fields.clone(),
            conditional_fields: rule.conditional_fields.clone(),
            limits: rule.limits.clone(),
        }
    }

    fn merged_with(mut self, child: &TypeRule) -> Self {
        if let Some(result) = child.result {
            self.result = result;
        }
        for (name, rule) in &child.fields {
            self.fields.insert(name.clone(), rule.clone());
        }
        if !child.conditional_fields.is_empty() {
            self.conditional_fields = child.conditional_fields.clone();
        }
        if child.limits.is_some() {
            self.limits = child.limits.clone();
        }
        self
    }

    /// Whether the object fits every dimension ceiling.
    pub fn within_limits(&self, object: &dyn OpaqueObject) -> bool {
        let Some(limits) = &self.limits else {
            return true;
        };
        limits.dimensions.iter().all(|dim| {
            let measured = lookup_path(object, &dim.getter)
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            measured <= dim.max
        })
    }

    /// Evaluate the recipe against an object. `None` defers to generic
    /// handling.
    pub fn evaluate(
        &self,
        object: &dyn OpaqueObject,
        preview_limit: usize,
    ) -> Option<(ResultKind, serde_json::Map<String, Json>)> {
        if !self.within_limits(object) {
            return None;
        }
        let mut data = serde_json::Map::new();
        let mut deferred_sizes = Vec::new();
        for (name, rule) in &self.fields {
            // json_size measures the assembled payload, so it runs last.
            if let FieldRule::Computed { expression } = rule {
                if expression == "json_size" {
                    deferred_sizes.push(name.clone());
                    continue;
                }
            }
            data.insert(name.clone(), eval_field(rule, object, preview_limit));
        }
        for conditional in &self.conditional_fields {
            if object.field(&conditional.condition.has_field).is_some() {
                data.insert(
                    conditional.field.clone(),
                    eval_field(&conditional.rule, object, preview_limit),
                );
            }
        }
        if !deferred_sizes.is_empty() {
            let size = serde_json::to_vec(&data).map_or(0, |bytes| bytes.len());
            for name in deferred_sizes {
                data.insert(name, size.into());
            }
        }
        Some((self.result, data))
    }
}

fn eval_field(rule: &FieldRule, object: &dyn OpaqueObject, preview_limit: usize) -> Json {
    match rule {
        FieldRule::Literal { value } => value.clone(),
        FieldRule::Attribute {
            path,
            default,
            transform,
        } => {
            let value = lookup_path(object, path)
                .or_else(|| default.clone())
                .unwrap_or(Json::Null);
            match transform {
                Some(transform) => apply_transform(value, *transform),
                None => value,
            }
        }
        FieldRule::Computed { expression } => eval_expression(expression, object, preview_limit),
    }
}

fn eval_expression(expression: &str, object: &dyn OpaqueObject, preview_limit: usize) -> Json {
    match expression {
        "type_name" => object.type_name().into(),
        "preview" => {
            let preview: String = object.preview().chars().take(preview_limit).collect();
            preview.into()
        }
        "size_estimate" => object.size_estimate().into(),
        other => match other.strip_prefix("format:") {
            Some(template) => format_template(template, object),
            None => Json::Null,
        },
    }
}

/// Fill `{path}` placeholders with attribute values; an unresolvable path
/// renders as empty, an unterminated brace is kept literally.
fn format_template(template: &str, object: &dyn OpaqueObject) -> Json {
    let mut out = String::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                if let Some(value) = lookup_path(object, &after[..close]) {
                    match value {
                        Json::String(s) => out.push_str(&s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Json::String(out)
}

/// Resolve a dotted attribute path with optional `[index]` steps. The first
/// segment reads the object; deeper steps navigate the returned JSON.
pub fn lookup_path(object: &dyn OpaqueObject, path: &str) -> Option<Json> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let (attr, indices) = split_indices(first);
    if attr.is_empty() {
        return None;
    }
    let mut current = object.field(attr)?;
    for index in indices {
        current = current.get(index)?.clone();
    }
    for segment in segments {
        let (attr, indices) = split_indices(segment);
        if !attr.is_empty() {
            current = current.get(attr)?.clone();
        }
        for index in indices {
            current = current.get(index)?.clone();
        }
    }
    Some(current)
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    match segment.find('[') {
        None => (segment, Vec::new()),
        Some(pos) => {
            let indices = segment[pos..]
                .split('[')
                .filter(|part| !part.is_empty())
                .filter_map(|part| part.strip_suffix(']'))
                .filter_map(|index| index.parse().ok())
                .collect();
            (&segment[..pos], indices)
        }
    }
}

fn apply_transform(value: Json, transform: Transform) -> Json {
    match transform {
        Transform::String => match value {
            Json::Null => Json::String(String::new()),
            Json::String(_) => value,
            other => Json::String(other.to_string()),
        },
        Transform::Int => {
            if value.is_i64() || value.is_u64() {
                value
            } else if let Some(f) = value.as_f64() {
                Json::from(f as i64)
            } else if let Some(s) = value.as_str() {
                s.trim().parse::<i64>().map(Json::from).unwrap_or(value)
            } else if value.is_null() {
                Json::from(0)
            } else {
                value
            }
        }
        Transform::Float => {
            if let Some(f) = value.as_f64() {
                Json::from(f)
            } else if let Some(s) = value.as_str() {
                s.trim().parse::<f64>().map(Json::from).unwrap_or(value)
            } else if value.is_null() {
                Json::from(0.0)
            } else {
                value
            }
        }
        Transform::List => match value {
            Json::Array(_) => value,
            Json::Null => Json::Array(Vec::new()),
            other => Json::Array(vec![other]),
        },
        Transform::Base64 => match &value {
            Json::Array(items) => {
                let bytes: Option<Vec<u8>> = items
                    .iter()
                    .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
                    .collect();
                match bytes {
                    Some(bytes) => Json::String(general_purpose::STANDARD.encode(bytes)),
                    None => value,
                }
            }
            _ => value,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_core::MethodSpec;
    use serde_json::json;

    use crate::value::{MethodArgs, ObjectError, Value};

    struct FakeImage {
        width: u64,
        height: u64,
    }

    impl OpaqueObject for FakeImage {
        fn type_name(&self) -> &str {
            "imagelib.Image"
        }

        fn preview(&self) -> String {
            format!("<Image {}x{}>", self.width, self.height)
        }

        fn methods(&self) -> Vec<MethodSpec> {
            vec![MethodSpec::new("resize")]
        }

        fn field(&self, name: &str) -> Option<Json> {
            match name {
                "width" => Some(self.width.into()),
                "height" => Some(self.height.into()),
                "mode" => Some("RGB".into()),
                "shape" => Some(json!([self.height, self.width])),
                _ => None,
            }
        }

        fn call(&self, method: &str, _args: &MethodArgs) -> Result<Value, ObjectError> {
            Err(ObjectError::UnknownMethod {
                method: method.to_string(),
                type_name: self.type_name().to_string(),
            })
        }
    }

    fn rules_json() -> Json {
        json!({
            "handlers": {
                "imagelib.Image": {
                    "result": "direct",
                    "fields": {
                        "kind": { "kind": "literal", "value": "image" },
                        "width": { "kind": "attribute", "path": "width" },
                        "label": { "kind": "computed", "expression": "format:{width}x{height} {mode}" },
                        "payload_size": { "kind": "computed", "expression": "json_size" }
                    },
                    "conditional_fields": [
                        {
                            "condition": { "has_field": "mode" },
                            "field": "mode",
                            "kind": "attribute",
                            "path": "mode"
                        }
                    ]
                },
                "imagelib.Thumbnail": {
                    "extends": "imagelib.Image",
                    "fields": {
                        "kind": { "kind": "literal", "value": "thumbnail" }
                    }
                },
                "stats.Matrix": {
                    "result": "object_ref",
                    "fields": {
                        "rows": { "kind": "attribute", "path": "shape[0]" }
                    },
                    "limits": {
                        "dimensions": [
                            { "getter": "shape[0]", "max": 100 }
                        ]
                    }
                }
            }
        })
    }

    fn compiled() -> RuleSet {
        RuleSet::compile(HandlerRules::from_json(rules_json()).unwrap())
    }

    #[test]
    fn fields_extract_literals_attributes_and_templates() {
        let rules = compiled();
        let image = FakeImage {
            width: 640,
            height: 480,
        };
        let (result, data) = rules
            .get("imagelib.Image")
            .unwrap()
            .evaluate(&image, 200)
            .unwrap();

        assert_eq!(result, ResultKind::Direct);
        assert_eq!(data["kind"], "image");
        assert_eq!(data["width"], 640);
        assert_eq!(data["label"], "640x480 RGB");
        // Conditional field fired because the object exposes `mode`.
        assert_eq!(data["mode"], "RGB");
        // json_size measures the payload assembled so far.
        assert!(data["payload_size"].as_u64().unwrap() > 0);
    }

    #[test]
    fn extends_overrides_child_fields_and_keeps_the_rest() {
        let rules = compiled();
        let image = FakeImage {
            width: 64,
            height: 64,
        };
        let (_, data) = rules
            .get("imagelib.Thumbnail")
            .unwrap()
            .evaluate(&image, 200)
            .unwrap();

        assert_eq!(data["kind"], "thumbnail");
        // Inherited from the parent rule.
        assert_eq!(data["width"], 64);
        assert_eq!(data["label"], "64x64 RGB");
    }

    #[test]
    fn limits_defer_oversized_objects() {
        let rules = compiled();
        let rule = rules.get("stats.Matrix").unwrap();

        let small = FakeImage {
            width: 10,
            height: 50,
        };
        let (result, data) = rule.evaluate(&small, 200).unwrap();
        assert_eq!(result, ResultKind::ObjectRef);
        assert_eq!(data["rows"], 50);

        let tall = FakeImage {
            width: 10,
            height: 500,
        };
        assert!(rule.evaluate(&tall, 200).is_none());
    }

    #[test]
    fn unknown_parent_resolves_without_inheritance() {
        let raw = HandlerRules::from_json(json!({
            "handlers": {
                "a.B": {
                    "extends": "missing.Parent",
                    "fields": { "name": { "kind": "computed", "expression": "type_name" } }
                }
            }
        }))
        .unwrap();
        let rules = RuleSet::compile(raw);
        let image = FakeImage {
            width: 1,
            height: 1,
        };
        let (_, data) = rules.get("a.B").unwrap().evaluate(&image, 200).unwrap();
        assert_eq!(data["name"], "imagelib.Image");
    }

    #[test]
    fn extends_cycle_resolves_each_rule_standalone() {
        let raw = HandlerRules::from_json(json!({
            "handlers": {
                "a.A": { "extends": "a.B", "fields": { "a": { "kind": "literal", "value": 1 } } },
                "a.B": { "extends": "a.A", "fields": { "b": { "kind": "literal", "value": 2 } } }
            }
        }))
        .unwrap();
        let rules = RuleSet::compile(raw);
        let image = FakeImage {
            width: 1,
            height: 1,
        };
        // Both rules exist and carry their own plus the other's fields once.
        let (_, a) = rules.get("a.A").unwrap().evaluate(&image, 200).unwrap();
        assert_eq!(a["a"], 1);
        assert_eq!(a["b"], 2);
        let (_, b) = rules.get("a.B").unwrap().evaluate(&image, 200).unwrap();
        assert_eq!(b["b"], 2);
    }

    #[test]
    fn transforms_shape_values() {
        assert_eq!(apply_transform(json!("42"), Transform::Int), json!(42));
        assert_eq!(apply_transform(json!(3.7), Transform::Int), json!(3));
        assert_eq!(apply_transform(Json::Null, Transform::Int), json!(0));
        assert_eq!(apply_transform(json!("1.5"), Transform::Float), json!(1.5));
        assert_eq!(
            apply_transform(json!(7), Transform::String),
            json!("7")
        );
        assert_eq!(apply_transform(Json::Null, Transform::String), json!(""));
        assert_eq!(apply_transform(json!(5), Transform::List), json!([5]));
        assert_eq!(apply_transform(Json::Null, Transform::List), json!([]));
        assert_eq!(
            apply_transform(json!([72, 105]), Transform::Base64),
            json!("SGk=")
        );
        // Non-byte arrays pass through unchanged.
        assert_eq!(
            apply_transform(json!([300]), Transform::Base64),
            json!([300])
        );
    }

    #[test]
    fn attribute_paths_navigate_indices_and_keys() {
        let image = FakeImage {
            width: 640,
            height: 480,
        };
        assert_eq!(lookup_path(&image, "shape[0]"), Some(json!(480)));
        assert_eq!(lookup_path(&image, "shape[1]"), Some(json!(640)));
        assert_eq!(lookup_path(&image, "width"), Some(json!(640)));
        assert!(lookup_path(&image, "shape[9]").is_none());
        assert!(lookup_path(&image, "missing.deep").is_none());
    }
}
