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

//! The closed value model operations produce and consume.
//!
//! The runtime never reflects over arbitrary host values. An operation hands
//! back exactly one of the [`Value`] variants and the serialization engine
//! decides how it crosses the wire. Live objects enter the model only
//! through the [`OpaqueObject`] trait.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Seek};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use callbridge_core::MethodSpec;

/// A result value produced by a target operation.
pub enum Value {
    /// Plain JSON data: primitives, arrays, and maps with no live children.
    Json(serde_json::Value),
    /// A sequence whose elements may themselves be complex values.
    Array(Vec<Value>),
    /// A keyed collection, insertion order preserved.
    Map(Vec<(String, Value)>),
    /// Byte content backed by memory or a reader.
    Blob(Blob),
    /// A lazily produced sequence, consumed exactly once.
    Stream(ValueStream),
    /// Tabular or n-dimensional data with a known shape.
    Table(TabularValue),
    /// A live object exposed through an opaque handle.
    Object(Arc<dyn OpaqueObject>),
}

impl Value {
    pub fn null() -> Self {
        Value::Json(serde_json::Value::Null)
    }

    pub fn json(value: impl Into<serde_json::Value>) -> Self {
        Value::Json(value.into())
    }

    pub fn bytes(bytes: Vec<u8>) -> Self {
        Value::Blob(Blob::from_bytes(bytes))
    }

    pub fn stream<I>(iter: I) -> Self
    where
        I: Iterator<Item = Value> + Send + 'static,
    {
        Value::Stream(ValueStream::new(iter))
    }

    pub fn object(object: impl OpaqueObject + 'static) -> Self {
        Value::Object(Arc::new(object))
    }

    /// JSON scalar: null, boolean, number, or string.
    pub fn is_primitive(&self) -> bool {
        matches!(self, Value::Json(j) if !j.is_array() && !j.is_object())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Json(json) => f.debug_tuple("Json").field(json).finish(),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Value::Blob(blob) => f.debug_tuple("Blob").field(blob).finish(),
            Value::Stream(_) => f.write_str("Stream(..)"),
            Value::Table(table) => f.debug_tuple("Table").field(table).finish(),
            Value::Object(object) => write!(f, "Object({})", object.type_name()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

/// A reader whose cursor can be restored after a full read.
pub trait SeekableRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekableRead for T {}

/// Where a blob's bytes come from. Reader-backed sources are consumed once;
/// seekable sources have their cursor restored afterwards.
pub enum BlobSource {
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send>),
    Seekable(Box<dyn SeekableRead>),
}

/// Byte content plus an optional content-type hint. Without a hint the
/// engine sniffs one from the leading bytes.
pub struct Blob {
    pub source: BlobSource,
    pub content_type: Option<String>,
}

impl Blob {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            source: BlobSource::Bytes(bytes),
            content_type: None,
        }
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self {
            source: BlobSource::Reader(Box::new(reader)),
            content_type: None,
        }
    }

    pub fn from_seekable(reader: impl Read + Seek + Send + 'static) -> Self {
        Self {
            source: BlobSource::Seekable(Box::new(reader)),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            BlobSource::Bytes(bytes) => format!("Bytes({})", bytes.len()),
            BlobSource::Reader(_) => "Reader(..)".to_string(),
            BlobSource::Seekable(_) => "Seekable(..)".to_string(),
        };
        f.debug_struct("Blob")
            .field("source", &source)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// A once-consumable sequence of values. Byte chunks are expressed as
/// in-memory blobs; anything else is serialized element-wise.
pub struct ValueStream {
    inner: Box<dyn Iterator<Item = Value> + Send>,
}

impl ValueStream {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Value> + Send + 'static,
    {
        Self {
            inner: Box::new(iter),
        }
    }
}

impl Iterator for ValueStream {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.inner.next()
    }
}

/// Tabular or n-dimensional data with a known shape, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularValue {
    /// Producer-reported kind, e.g. `"dataframe"` or `"ndarray"`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Dimensions, outermost first.
    pub shape: Vec<usize>,
    /// Column labels, for two-dimensional labelled data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub columns: Option<Vec<String>>,
    /// Element type label, for homogeneous arrays.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dtype: Option<String>,
    /// The data itself, nested per `shape`.
    pub data: serde_json::Value,
}

impl TabularValue {
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn column_count(&self) -> usize {
        self.shape.get(1).copied().unwrap_or(1)
    }

    pub fn element_count(&self) -> usize {
        if self.shape.is_empty() {
            0
        } else {
            self.shape.iter().product()
        }
    }

    pub fn preview(&self) -> String {
        format!("{}(shape={:?})", self.type_name, self.shape)
    }
}

/// Positional and keyword arguments for a stored-method call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodArgs {
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl MethodArgs {
    pub fn positional(args: Vec<serde_json::Value>) -> Self {
        Self {
            args,
            kwargs: serde_json::Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

/// Failure raised by an opaque object's method.
#[derive(Debug, Clone, Error)]
pub enum ObjectError {
    #[error("method '{method}' not found on {type_name}")]
    UnknownMethod { method: String, type_name: String },
    #[error("method '{method}' failed: {message}")]
    Failed { method: String, message: String },
}

/// A live object retained by the runtime and exposed through a handle.
///
/// `type_name` is the identifier the serialization engine dispatches
/// handler rules on, exact name first and then `ancestors` in order.
/// Method access from the wire is gated by the advertised set captured when
/// the object is stored, not by what `call` happens to accept.
pub trait OpaqueObject: Send + Sync {
    /// Stable dotted type identifier, e.g. `"imagelib.Canvas"`.
    fn type_name(&self) -> &str;

    /// Ancestor type identifiers, nearest first.
    fn ancestors(&self) -> Vec<String> {
        Vec::new()
    }

    /// Rough in-memory footprint in bytes. Zero when unknown.
    fn size_estimate(&self) -> usize {
        0
    }

    /// Short human-readable rendition, truncated by the engine.
    fn preview(&self) -> String;

    /// Methods callable through the stored-method boundary. Captured once
    /// at store time; later changes do not widen access.
    fn methods(&self) -> Vec<MethodSpec>;

    /// Read a single named attribute as JSON. Deeper paths are navigated by
    /// the rules engine through the returned value.
    fn field(&self, name: &str) -> Option<serde_json::Value> {
        let _ = name;
        None
    }

    /// Whole-value JSON rendition, when one exists. `None` marks the object
    /// as not directly serializable.
    fn to_json(&self) -> Option<serde_json::Value> {
        None
    }

    fn call(&self, method: &str, args: &MethodArgs) -> Result<Value, ObjectError>;
}

/// One prepared argument: plain JSON, or a live object substituted from the
/// handle store.
#[derive(Clone)]
pub enum ArgValue {
    Json(serde_json::Value),
    Object(Arc<dyn OpaqueObject>),
}

impl ArgValue {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ArgValue::Json(json) => Some(json),
            ArgValue::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<dyn OpaqueObject>> {
        match self {
            ArgValue::Json(_) => None,
            ArgValue::Object(object) => Some(object),
        }
    }
}

impl fmt::Debug for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Json(json) => f.debug_tuple("Json").field(json).finish(),
            ArgValue::Object(object) => write!(f, "Object({})", object.type_name()),
        }
    }
}

/// Named arguments handed to an operation handler, already cleaned,
/// coerced, and substituted by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    named: BTreeMap<String, ArgValue>,
}

impl CallArgs {
    pub fn new(named: BTreeMap<String, ArgValue>) -> Self {
        Self { named }
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.named.get(name)
    }

    pub fn json(&self, name: &str) -> Option<&serde_json::Value> {
        self.get(name).and_then(ArgValue::as_json)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.json(name).and_then(serde_json::Value::as_str)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.json(name).and_then(serde_json::Value::as_i64)
    }

    pub fn object(&self, name: &str) -> Option<&Arc<dyn OpaqueObject>> {
        self.get(name).and_then(ArgValue::as_object)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArgValue)> {
        self.named.iter()
    }
}
