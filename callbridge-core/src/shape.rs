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

//! JSON-schema-like type shapes.
//!
//! A [`TypeShape`] describes what a parameter or return value looks like on
//! the wire. The empty node (all fields unset) means "any value"; scanners
//! that cannot resolve a declared type hand in the empty node rather than
//! guessing. A node with only a `type_name` is a nominal (opaque) type the
//! invocation boundary cannot carry inline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Structural kind of a shape node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

/// A JSON-schema-like description of a value shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeShape {
    /// Structural kind. `None` with no `type_name` means "any".
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<ShapeKind>,

    /// Nominal type name for values with no structural rendition.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub type_name: Option<String>,

    /// Element shape for arrays.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub items: Option<Box<TypeShape>>,

    /// Value shape for maps with uniform values.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub values: Option<Box<TypeShape>>,

    /// Named properties for structured objects.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub properties: Option<BTreeMap<String, TypeShape>>,

    /// Names of required properties.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub required: Vec<String>,

    /// Closed set of admissible values.
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none", default)]
    pub enum_values: Option<Vec<serde_json::Value>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

impl TypeShape {
    /// The "any value" node.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn string() -> Self {
        Self {
            kind: Some(ShapeKind::String),
            ..Self::default()
        }
    }

    pub fn integer() -> Self {
        Self {
            kind: Some(ShapeKind::Integer),
            ..Self::default()
        }
    }

    pub fn number() -> Self {
        Self {
            kind: Some(ShapeKind::Number),
            ..Self::default()
        }
    }

    pub fn boolean() -> Self {
        Self {
            kind: Some(ShapeKind::Boolean),
            ..Self::default()
        }
    }

    pub fn array(items: TypeShape) -> Self {
        Self {
            kind: Some(ShapeKind::Array),
            items: Some(Box::new(items)),
            ..Self::default()
        }
    }

    /// A map with uniform value shapes.
    pub fn map_of(values: TypeShape) -> Self {
        Self {
            kind: Some(ShapeKind::Object),
            values: Some(Box::new(values)),
            ..Self::default()
        }
    }

    /// A structured object with named properties.
    pub fn object_of(properties: BTreeMap<String, TypeShape>, required: Vec<String>) -> Self {
        Self {
            kind: Some(ShapeKind::Object),
            properties: Some(properties),
            required,
            ..Self::default()
        }
    }

    /// A nominal type the wire cannot carry inline.
    pub fn nominal(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// True when nothing at all is declared.
    pub fn is_any(&self) -> bool {
        self.kind.is_none() && self.type_name.is_none()
    }

    /// True when the scanner declared something, structural or nominal.
    pub fn is_declared(&self) -> bool {
        !self.is_any()
    }

    /// Whether a value of this shape can cross the invocation boundary as
    /// plain JSON. Nominal-only shapes cannot; containers are expressible
    /// when their element shapes are.
    pub fn is_json_expressible(&self) -> bool {
        match self.kind {
            Some(ShapeKind::Array) => self
                .items
                .as_deref()
                .map_or(true, TypeShape::is_json_expressible),
            Some(ShapeKind::Object) => {
                let values_ok = self
                    .values
                    .as_deref()
                    .map_or(true, TypeShape::is_json_expressible);
                let props_ok = self.properties.as_ref().map_or(true, |props| {
                    props.values().all(TypeShape::is_json_expressible)
                });
                values_ok && props_ok
            }
            Some(_) => true,
            None => self.type_name.is_none(),
        }
    }
}
