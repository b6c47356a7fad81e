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

//! The serialization engine.
//!
//! Every operation result passes through [`SerializationEngine::serialize`],
//! which decides between three outcomes: inline data, an object handle, or
//! a resource URI. Serialization is total; when a value cannot travel
//! inline it is parked in a store and an envelope travels instead, so a
//! large or live result never fails the request that produced it.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use tracing::debug;

use callbridge_core::MethodSpec;

use crate::config::SerializationLimits;
use crate::resources::{sniff_content_type, ResourceContent, ResourceStore};
use crate::rules::{CompiledRule, ResultKind, RuleSet};
use crate::store::{ObjectStore, StoredValue};
use crate::value::{Blob, BlobSource, OpaqueObject, TabularValue, Value, ValueStream};

pub(crate) const STORED_OBJECT_NOTE: &str =
    "Object stored. Use call_stored_method to invoke methods.";
const RESOURCE_NOTE: &str = "Content stored as a readable resource.";

/// Contents of a handle envelope, before rendering to JSON.
#[derive(Debug, Clone)]
pub struct HandleEnvelope {
    pub object_id: String,
    pub object_type: String,
    pub available_methods: Vec<MethodSpec>,
    pub preview: String,
    pub size_estimate: usize,
    pub created_at: DateTime<Utc>,
}

impl HandleEnvelope {
    /// Render the wire-facing envelope body.
    pub fn to_data(&self) -> Json {
        let methods = serde_json::to_value(&self.available_methods).unwrap_or_else(|_| json!([]));
        json!({
            "object_id": self.object_id,
            "object_type": self.object_type,
            "available_methods": methods,
            "preview": self.preview,
            "note": STORED_OBJECT_NOTE,
        })
    }
}

/// Outcome of serializing one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Serialized {
    /// Inline JSON data.
    Direct {
        data: Json,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        metadata: Option<Map<String, Json>>,
    },
    /// The value lives behind an object handle; `data` is the envelope.
    ObjectRef {
        data: Json,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        metadata: Option<Map<String, Json>>,
    },
    /// The value lives behind a resource URI.
    Resource {
        data: Json,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        metadata: Option<Map<String, Json>>,
    },
}

impl Serialized {
    fn direct(data: impl Into<Json>) -> Self {
        Serialized::Direct {
            data: data.into(),
            metadata: None,
        }
    }

    fn direct_with(data: impl Into<Json>, metadata: Map<String, Json>) -> Self {
        Serialized::Direct {
            data: data.into(),
            metadata: Some(metadata),
        }
    }

    pub fn data(&self) -> &Json {
        match self {
            Serialized::Direct { data, .. }
            | Serialized::ObjectRef { data, .. }
            | Serialized::Resource { data, .. } => data,
        }
    }

    pub fn into_data(self) -> Json {
        match self {
            Serialized::Direct { data, .. }
            | Serialized::ObjectRef { data, .. }
            | Serialized::Resource { data, .. } => data,
        }
    }

    pub fn metadata(&self) -> Option<&Map<String, Json>> {
        match self {
            Serialized::Direct { metadata, .. }
            | Serialized::ObjectRef { metadata, .. }
            | Serialized::Resource { metadata, .. } => metadata.as_ref(),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Serialized::Direct { .. })
    }

    pub fn is_object_ref(&self) -> bool {
        matches!(self, Serialized::ObjectRef { .. })
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Serialized::Resource { .. })
    }
}

/// Decides how a runtime value crosses the wire.
pub struct SerializationEngine {
    limits: SerializationLimits,
    rules: RuleSet,
    store: Arc<ObjectStore>,
    resources: Arc<ResourceStore>,
    // concrete type name -> matched rule key; None caches a definitive miss.
    rule_memo: DashMap<String, Option<String>>,
}

impl SerializationEngine {
    pub fn new(
        limits: SerializationLimits,
        rules: RuleSet,
        store: Arc<ObjectStore>,
        resources: Arc<ResourceStore>,
    ) -> Self {
        Self {
            limits,
            rules,
            store,
            resources,
            rule_memo: DashMap::new(),
        }
    }

    pub fn limits(&self) -> &SerializationLimits {
        &self.limits
    }

    /// Serialize one value.
    pub fn serialize(&self, value: Value) -> Serialized {
        match value {
            Value::Json(json) => self.serialize_json(json),
            Value::Array(items) => self.serialize_array(items),
            Value::Map(entries) => self.serialize_map(entries),
            Value::Blob(blob) => self.serialize_blob(blob),
            Value::Stream(stream) => self.serialize_stream(stream),
            Value::Table(table) => self.serialize_table(table),
            Value::Object(object) => self.serialize_object(object),
        }
    }

    /// Park a live object and return its envelope. Used directly by the
    /// dispatcher when a descriptor is flagged opaque.
    pub fn store_opaque(&self, object: Arc<dyn OpaqueObject>) -> HandleEnvelope {
        let size = object.size_estimate();
        let preview = self.clip(&object.preview());
        self.store_with(StoredValue::Object(object), size, preview)
    }

    fn serialize_json(&self, json: Json) -> Serialized {
        if !json.is_array() && !json.is_object() {
            return Serialized::direct(json);
        }
        let size = encoded_size(&json);
        if size <= self.limits.max_direct_size {
            return Serialized::direct_with(json, size_metadata(size));
        }
        let preview = self.clip(&json.to_string());
        let envelope = self.store_with(StoredValue::Json(json), size, preview);
        self.object_ref(envelope)
    }

    fn serialize_array(&self, items: Vec<Value>) -> Serialized {
        let count = items.len();
        let mut rendered = Vec::with_capacity(count);
        let mut total_size = 0usize;
        let mut non_direct = false;
        for item in items {
            let child = self.serialize(item);
            if !child.is_direct() {
                non_direct = true;
            }
            let data = child.into_data();
            total_size += encoded_size(&data);
            rendered.push(data);
        }
        let oversized = total_size > self.limits.max_direct_size
            || (non_direct && count > self.limits.max_sequence_children);
        self.finish_container(Json::Array(rendered), total_size, oversized)
    }

    fn serialize_map(&self, entries: Vec<(String, Value)>) -> Serialized {
        let count = entries.len();
        let mut rendered = Map::new();
        let mut total_size = 0usize;
        let mut non_direct = false;
        for (key, item) in entries {
            let child = self.serialize(item);
            if !child.is_direct() {
                non_direct = true;
            }
            let data = child.into_data();
            total_size += key.len() + encoded_size(&data);
            rendered.insert(key, data);
        }
        let oversized = total_size > self.limits.max_direct_size
            || (non_direct && count > self.limits.max_map_children);
        self.finish_container(Json::Object(rendered), total_size, oversized)
    }

    fn finish_container(&self, rendered: Json, total_size: usize, oversized: bool) -> Serialized {
        if oversized {
            let preview = self.clip(&rendered.to_string());
            let envelope = self.store_with(StoredValue::Json(rendered), total_size, preview);
            return self.object_ref(envelope);
        }
        Serialized::direct_with(rendered, size_metadata(total_size))
    }

    fn serialize_stream(&self, mut stream: ValueStream) -> Serialized {
        let max_items = self.limits.max_stream_items;
        let byte_ceiling = self.limits.max_direct_size;
        let mut items = Vec::new();
        let mut total_size = 0usize;
        let mut truncated = false;
        while let Some(item) = stream.next() {
            if items.len() >= max_items {
                truncated = true;
                break;
            }
            let estimate = match &item {
                Value::Blob(Blob {
                    source: BlobSource::Bytes(bytes),
                    ..
                }) => bytes.len(),
                Value::Json(json) => encoded_size(json),
                _ => 100,
            };
            items.push(item);
            total_size += estimate;
            if total_size > byte_ceiling {
                truncated = true;
                break;
            }
        }

        let all_bytes = !items.is_empty()
            && items.iter().all(|item| {
                matches!(
                    item,
                    Value::Blob(Blob {
                        source: BlobSource::Bytes(_),
                        ..
                    })
                )
            });
        if all_bytes {
            let mut combined = Vec::with_capacity(total_size);
            for item in items {
                if let Value::Blob(Blob {
                    source: BlobSource::Bytes(bytes),
                    ..
                }) = item
                {
                    combined.extend_from_slice(&bytes);
                }
            }
            let size = combined.len();
            return match String::from_utf8(combined) {
                Ok(text) => Serialized::direct(json!({
                    "type": "stream",
                    "content_type": "text",
                    "content": text,
                    "size_bytes": size,
                    "truncated": truncated,
                })),
                Err(raw) => {
                    let encoded = general_purpose::STANDARD.encode(raw.into_bytes());
                    Serialized::direct(json!({
                        "type": "stream",
                        "content_type": "binary",
                        "content_base64": encoded,
                        "size_bytes": size,
                        "truncated": truncated,
                    }))
                }
            };
        }

        let rendered: Vec<Json> = items
            .into_iter()
            .map(|item| self.serialize(item).into_data())
            .collect();
        let item_count = rendered.len();
        Serialized::direct(json!({
            "type": "stream",
            "content_type": "list",
            "items": rendered,
            "item_count": item_count,
            "size_bytes": total_size,
            "truncated": truncated,
        }))
    }

    fn serialize_blob(&self, blob: Blob) -> Serialized {
        let hint = blob.content_type;
        let content = match read_blob(blob.source) {
            Ok(content) => content,
            Err(error) => {
                debug!(error = %error, "blob source could not be read");
                let mut metadata = Map::new();
                metadata.insert(
                    "note".to_string(),
                    format!("blob source could not be read: {error}").into(),
                );
                return Serialized::direct_with(Json::Null, metadata);
            }
        };
        let content_type = hint.unwrap_or_else(|| sniff_content_type(&content).to_string());
        let size = content.len();

        if self.limits.enable_resources {
            let stored = match String::from_utf8(content) {
                Ok(text) => ResourceContent::Text(text),
                Err(raw) => ResourceContent::Binary(raw.into_bytes()),
            };
            let uri = self.resources.store(stored, content_type.clone());
            let mut metadata = Map::new();
            let resource_id = uri.rsplit('/').next().unwrap_or_default().to_string();
            metadata.insert("resource_id".to_string(), resource_id.into());
            metadata.insert("note".to_string(), RESOURCE_NOTE.into());
            return Serialized::Resource {
                data: json!({
                    "uri": uri,
                    "content_type": content_type,
                    "size": size,
                }),
                metadata: Some(metadata),
            };
        }

        // Resources disabled: inline up to the direct ceiling.
        let ceiling = self.limits.max_direct_size;
        match String::from_utf8(content) {
            Ok(mut text) => {
                let truncated = text.len() > ceiling;
                if truncated {
                    truncate_on_char_boundary(&mut text, ceiling);
                }
                Serialized::direct(json!({
                    "type": "blob",
                    "content_type": content_type,
                    "content": text,
                    "size_bytes": size,
                    "truncated": truncated,
                }))
            }
            Err(raw) => {
                let bytes = raw.into_bytes();
                let truncated = bytes.len() > ceiling;
                let window = &bytes[..bytes.len().min(ceiling)];
                Serialized::direct(json!({
                    "type": "blob",
                    "content_type": content_type,
                    "content_base64": general_purpose::STANDARD.encode(window),
                    "size_bytes": size,
                    "truncated": truncated,
                }))
            }
        }
    }

    fn serialize_table(&self, table: TabularValue) -> Serialized {
        let within = table.rows() <= self.limits.max_table_rows
            && table.column_count() <= self.limits.max_table_columns
            && table.element_count() <= self.limits.max_table_elements;
        if !within {
            // Rough numeric payload estimate: eight bytes per element.
            let estimate = table.element_count() * 8;
            let preview = table.preview();
            let envelope = self.store_with(StoredValue::Table(table), estimate, preview);
            return self.object_ref(envelope);
        }

        let TabularValue {
            type_name,
            shape,
            columns,
            dtype,
            mut data,
        } = table;
        round_floats(&mut data, self.limits.float_precision);
        let mut payload = Map::new();
        payload.insert("type".to_string(), type_name.into());
        payload.insert(
            "shape".to_string(),
            Json::Array(shape.into_iter().map(|dim| dim.into()).collect()),
        );
        if let Some(columns) = columns {
            payload.insert("columns".to_string(), columns.into());
        }
        if let Some(dtype) = dtype {
            payload.insert("dtype".to_string(), dtype.into());
        }
        payload.insert("data".to_string(), data);
        let size = encoded_size(&payload);
        Serialized::direct_with(Json::Object(payload), size_metadata(size))
    }

    fn serialize_object(&self, object: Arc<dyn OpaqueObject>) -> Serialized {
        if let Some(rule) = self.resolve_rule(object.as_ref()) {
            if let Some((kind, data)) = rule.evaluate(object.as_ref(), self.limits.max_preview_length)
            {
                match kind {
                    ResultKind::Direct => {
                        let mut metadata = Map::new();
                        metadata
                            .insert("object_type".to_string(), object.type_name().into());
                        return Serialized::direct_with(Json::Object(data), metadata);
                    }
                    ResultKind::ObjectRef => {
                        let envelope = self.store_opaque(object);
                        return self.object_ref_with(envelope, data);
                    }
                }
            }
        }

        match object.to_json() {
            Some(json) => {
                let size = encoded_size(&json);
                if size <= self.limits.max_direct_size {
                    Serialized::direct_with(json, size_metadata(size))
                } else {
                    // Too big to inline; the object itself is parked so its
                    // methods stay callable.
                    let preview = self.clip(&json.to_string());
                    let envelope =
                        self.store_with(StoredValue::Object(object), size, preview);
                    self.object_ref(envelope)
                }
            }
            None => {
                let envelope = self.store_opaque(object);
                self.object_ref(envelope)
            }
        }
    }

    /// Exact type name first, then ancestors in order; resolution is
    /// memoized per concrete type, including misses.
    fn resolve_rule(&self, object: &dyn OpaqueObject) -> Option<Arc<CompiledRule>> {
        let type_name = object.type_name();
        if let Some(cached) = self.rule_memo.get(type_name) {
            return cached
                .as_ref()
                .and_then(|key| self.rules.get(key).cloned());
        }
        let mut matched = None;
        if self.rules.get(type_name).is_some() {
            matched = Some(type_name.to_string());
        } else {
            for ancestor in object.ancestors() {
                if self.rules.get(&ancestor).is_some() {
                    matched = Some(ancestor);
                    break;
                }
            }
        }
        self.rule_memo.insert(type_name.to_string(), matched.clone());
        matched.and_then(|key| self.rules.get(&key).cloned())
    }

    fn store_with(
        &self,
        value: StoredValue,
        size_estimate: usize,
        preview: String,
    ) -> HandleEnvelope {
        let object_type = value.type_label();
        let methods = match &value {
            StoredValue::Object(object) => object.methods(),
            _ => Vec::new(),
        };
        let preview = self.clip(&preview);
        let object_id = self
            .store
            .insert(value, size_estimate, preview.clone(), methods.clone());
        HandleEnvelope {
            object_id,
            object_type,
            available_methods: methods,
            preview,
            size_estimate,
            created_at: Utc::now(),
        }
    }

    fn object_ref(&self, envelope: HandleEnvelope) -> Serialized {
        let data = envelope.to_data();
        let mut metadata = Map::new();
        metadata.insert("object_id".to_string(), envelope.object_id.into());
        metadata.insert("object_type".to_string(), envelope.object_type.into());
        metadata.insert(
            "size_estimate".to_string(),
            (envelope.size_estimate as u64).into(),
        );
        metadata.insert(
            "created_at".to_string(),
            envelope.created_at.to_rfc3339().into(),
        );
        Serialized::ObjectRef {
            data,
            metadata: Some(metadata),
        }
    }

    /// Envelope plus extracted rule fields; envelope keys win on collision.
    fn object_ref_with(&self, envelope: HandleEnvelope, extra: Map<String, Json>) -> Serialized {
        let mut serialized = self.object_ref(envelope);
        if let Serialized::ObjectRef {
            data: Json::Object(body),
            ..
        } = &mut serialized
        {
            for (key, value) in extra {
                body.entry(key).or_insert(value);
            }
        }
        serialized
    }

    fn clip(&self, text: &str) -> String {
        text.chars().take(self.limits.max_preview_length).collect()
    }
}

fn encoded_size<T: Serialize>(value: &T) -> usize {
    serde_json::to_vec(value).map_or(0, |bytes| bytes.len())
}

fn size_metadata(size: usize) -> Map<String, Json> {
    let mut metadata = Map::new();
    metadata.insert("size_bytes".to_string(), (size as u64).into());
    metadata
}

fn read_blob(source: BlobSource) -> io::Result<Vec<u8>> {
    match source {
        BlobSource::Bytes(bytes) => Ok(bytes),
        BlobSource::Reader(mut reader) => {
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer)?;
            Ok(buffer)
        }
        BlobSource::Seekable(mut reader) => {
            let position = reader.stream_position()?;
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer)?;
            reader.seek(SeekFrom::Start(position))?;
            Ok(buffer)
        }
    }
}

fn truncate_on_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

/// Round every fractional number in place to `precision` decimal digits.
fn round_floats(value: &mut Json, precision: u32) {
    match value {
        Json::Number(number) => {
            if number.is_i64() || number.is_u64() {
                return;
            }
            if let Some(f) = number.as_f64() {
                let factor = 10f64.powi(precision as i32);
                let rounded = (f * factor).round() / factor;
                if let Some(replacement) = serde_json::Number::from_f64(rounded) {
                    *value = Json::Number(replacement);
                }
            }
        }
        Json::Array(items) => {
            for item in items {
                round_floats(item, precision);
            }
        }
        Json::Object(map) => {
            for item in map.values_mut() {
                round_floats(item, precision);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceStoreConfig;
    use crate::rules::HandlerRules;
    use crate::value::{MethodArgs, ObjectError};
    use std::io::Cursor;

    fn small_limits() -> SerializationLimits {
        SerializationLimits {
            max_direct_size: 256,
            max_sequence_children: 2,
            max_map_children: 2,
            max_table_rows: 3,
            max_stream_items: 4,
            ..SerializationLimits::default()
        }
    }

    fn engine_with(limits: SerializationLimits, rules: RuleSet) -> SerializationEngine {
        let store = Arc::new(ObjectStore::new(32));
        let resources = Arc::new(ResourceStore::new(&ResourceStoreConfig::default()));
        SerializationEngine::new(limits, rules, store, resources)
    }

    fn engine() -> SerializationEngine {
        engine_with(small_limits(), RuleSet::default())
    }

    struct Canvas {
        label: String,
    }

    impl OpaqueObject for Canvas {
        fn type_name(&self) -> &str {
            "imagelib.Canvas"
        }

        fn size_estimate(&self) -> usize {
            4096
        }

        fn preview(&self) -> String {
            format!("<Canvas {}>", self.label)
        }

        fn methods(&self) -> Vec<MethodSpec> {
            vec![MethodSpec::new("resize"), MethodSpec::new("save")]
        }

        fn call(&self, method: &str, _args: &MethodArgs) -> Result<Value, ObjectError> {
            Err(ObjectError::UnknownMethod {
                method: method.to_string(),
                type_name: self.type_name().to_string(),
            })
        }
    }

    struct Point {
        x: i64,
        y: i64,
    }

    impl OpaqueObject for Point {
        fn type_name(&self) -> &str {
            "geo.Point"
        }

        fn preview(&self) -> String {
            format!("({}, {})", self.x, self.y)
        }

        fn methods(&self) -> Vec<MethodSpec> {
            Vec::new()
        }

        fn to_json(&self) -> Option<Json> {
            Some(json!({ "x": self.x, "y": self.y }))
        }

        fn call(&self, method: &str, _args: &MethodArgs) -> Result<Value, ObjectError> {
            Err(ObjectError::UnknownMethod {
                method: method.to_string(),
                type_name: self.type_name().to_string(),
            })
        }
    }

    #[test]
    fn primitives_pass_through_unchanged() {
        let engine = engine();
        for value in [json!(null), json!(true), json!(42), json!(3.25), json!("text")] {
            let serialized = engine.serialize(Value::Json(value.clone()));
            assert!(serialized.is_direct());
            assert_eq!(serialized.data(), &value);
            assert!(serialized.metadata().is_none());
        }
    }

    #[test]
    fn small_containers_inline_with_size_metadata() {
        let engine = engine();
        let value = json!({"a": 1, "b": [1, 2, 3]});
        let serialized = engine.serialize(Value::Json(value.clone()));
        assert!(serialized.is_direct());
        assert_eq!(serialized.data(), &value);
        let metadata = serialized.metadata().unwrap();
        assert!(metadata["size_bytes"].as_u64().unwrap() > 0);
    }

    #[test]
    fn oversized_json_is_stored_and_reads_back_identical() {
        let engine = engine();
        let large: Json = json!((0..200).map(|i| format!("row-{i}")).collect::<Vec<_>>());
        let serialized = engine.serialize(Value::Json(large.clone()));
        assert!(serialized.is_object_ref());

        let data = serialized.data();
        assert_eq!(data["object_type"], "list");
        assert_eq!(data["note"], STORED_OBJECT_NOTE);
        let object_id = data["object_id"].as_str().unwrap();

        // The stored value is the original, byte for byte.
        match engine.store.get(object_id).unwrap() {
            StoredValue::Json(stored) => assert_eq!(stored, large),
            other => panic!("unexpected stored value: {other:?}"),
        }
    }

    #[test]
    fn complex_children_over_count_ceiling_force_storage() {
        let engine = engine();
        let items = vec![
            Value::object(Canvas {
                label: "a".to_string(),
            }),
            Value::object(Canvas {
                label: "b".to_string(),
            }),
            Value::object(Canvas {
                label: "c".to_string(),
            }),
        ];
        let serialized = engine.serialize(Value::Array(items));
        // Three children with complex members exceeds the ceiling of two.
        assert!(serialized.is_object_ref());
    }

    #[test]
    fn pure_json_children_ignore_the_count_ceiling() {
        let engine = engine();
        let items: Vec<Value> = (0..5).map(|i| Value::json(i)).collect();
        let serialized = engine.serialize(Value::Array(items));
        assert!(serialized.is_direct());
        assert_eq!(serialized.data(), &json!([0, 1, 2, 3, 4]));
    }

    #[test]
    fn text_byte_streams_concatenate_and_decode() {
        let engine = engine();
        let chunks = vec![
            Value::bytes(b"hello ".to_vec()),
            Value::bytes(b"world".to_vec()),
        ];
        let serialized = engine.serialize(Value::stream(chunks.into_iter()));
        assert!(serialized.is_direct());
        let data = serialized.data();
        assert_eq!(data["type"], "stream");
        assert_eq!(data["content_type"], "text");
        assert_eq!(data["content"], "hello world");
        assert_eq!(data["truncated"], false);
    }

    #[test]
    fn binary_byte_streams_fall_back_to_base64() {
        let engine = engine();
        let chunks = vec![Value::bytes(vec![0xFF, 0xFE]), Value::bytes(vec![0x00])];
        let serialized = engine.serialize(Value::stream(chunks.into_iter()));
        let data = serialized.data();
        assert_eq!(data["content_type"], "binary");
        assert_eq!(
            general_purpose::STANDARD
                .decode(data["content_base64"].as_str().unwrap())
                .unwrap(),
            vec![0xFF, 0xFE, 0x00]
        );
    }

    #[test]
    fn mixed_streams_render_items_and_flag_truncation() {
        let engine = engine();
        // max_stream_items is 4; the fifth element marks truncation.
        let serialized = engine.serialize(Value::stream((0..10).map(|i| Value::json(i))));
        let data = serialized.data();
        assert_eq!(data["content_type"], "list");
        assert_eq!(data["item_count"], 4);
        assert_eq!(data["items"], json!([0, 1, 2, 3]));
        assert_eq!(data["truncated"], true);
    }

    #[test]
    fn blobs_become_resources_and_read_back() {
        let engine = engine();
        let png = [b"\x89PNG\r\n\x1a\n".as_slice(), &[0u8; 16]].concat();
        let serialized = engine.serialize(Value::bytes(png.clone()));
        assert!(serialized.is_resource());

        let data = serialized.data();
        assert_eq!(data["content_type"], "image/png");
        assert_eq!(data["size"], png.len() as u64);

        let uri = data["uri"].as_str().unwrap();
        let reading = engine.resources.read(uri).unwrap();
        assert!(reading.base64);
        assert_eq!(
            general_purpose::STANDARD.decode(&reading.content).unwrap(),
            png
        );
    }

    #[test]
    fn seekable_blob_sources_get_their_cursor_restored() {
        let engine = engine();
        let mut cursor = Cursor::new(b"some text content".to_vec());
        cursor.set_position(5);
        let blob = Blob::from_seekable(cursor);
        let serialized = engine.serialize(Value::Blob(blob));
        // Reads from the current position onward.
        let uri = serialized.data()["uri"].as_str().unwrap().to_string();
        let reading = engine.resources.read(&uri).unwrap();
        assert_eq!(reading.content, "text content");
    }

    #[test]
    fn blobs_inline_when_resources_are_disabled() {
        let limits = SerializationLimits {
            enable_resources: false,
            ..small_limits()
        };
        let engine = engine_with(limits, RuleSet::default());
        let serialized = engine.serialize(Value::bytes(b"plain words".to_vec()));
        assert!(serialized.is_direct());
        let data = serialized.data();
        assert_eq!(data["type"], "blob");
        assert_eq!(data["content_type"], "text/plain");
        assert_eq!(data["content"], "plain words");
        assert_eq!(data["truncated"], false);
    }

    #[test]
    fn tables_within_ceilings_inline_with_rounding() {
        let engine = engine();
        let table = TabularValue {
            type_name: "dataframe".to_string(),
            shape: vec![2, 2],
            columns: Some(vec!["a".to_string(), "b".to_string()]),
            dtype: None,
            data: json!([[1.23456789, 2.0], [3.0, 4.987654321]]),
        };
        let serialized = engine.serialize(Value::Table(table));
        assert!(serialized.is_direct());
        let data = serialized.data();
        assert_eq!(data["type"], "dataframe");
        assert_eq!(data["shape"], json!([2, 2]));
        assert_eq!(data["data"][0][0], 1.234568);
        assert_eq!(data["data"][1][1], 4.987654);
    }

    #[test]
    fn tables_over_the_row_ceiling_are_stored() {
        let engine = engine();
        let table = TabularValue {
            type_name: "dataframe".to_string(),
            shape: vec![500, 2],
            columns: None,
            dtype: None,
            data: json!([]),
        };
        let serialized = engine.serialize(Value::Table(table));
        assert!(serialized.is_object_ref());
        assert_eq!(serialized.data()["object_type"], "dataframe");
    }

    #[test]
    fn handler_rules_produce_direct_payloads() {
        let rules = RuleSet::compile(
            HandlerRules::from_json(json!({
                "handlers": {
                    "imagelib.Canvas": {
                        "result": "direct",
                        "fields": {
                            "kind": { "kind": "literal", "value": "canvas" },
                            "preview": { "kind": "computed", "expression": "preview" }
                        }
                    }
                }
            }))
            .unwrap(),
        );
        let engine = engine_with(small_limits(), rules);
        let serialized = engine.serialize(Value::object(Canvas {
            label: "main".to_string(),
        }));
        assert!(serialized.is_direct());
        let data = serialized.data();
        assert_eq!(data["kind"], "canvas");
        assert_eq!(data["preview"], "<Canvas main>");
        assert_eq!(
            serialized.metadata().unwrap()["object_type"],
            "imagelib.Canvas"
        );
    }

    #[test]
    fn ancestor_rules_apply_and_memoize() {
        struct Sub;
        impl OpaqueObject for Sub {
            fn type_name(&self) -> &str {
                "imagelib.RasterCanvas"
            }
            fn ancestors(&self) -> Vec<String> {
                vec!["imagelib.Canvas".to_string()]
            }
            fn preview(&self) -> String {
                "<RasterCanvas>".to_string()
            }
            fn methods(&self) -> Vec<MethodSpec> {
                Vec::new()
            }
            fn call(&self, method: &str, _args: &MethodArgs) -> Result<Value, ObjectError> {
                Err(ObjectError::UnknownMethod {
                    method: method.to_string(),
                    type_name: "imagelib.RasterCanvas".to_string(),
                })
            }
        }

        let rules = RuleSet::compile(
            HandlerRules::from_json(json!({
                "handlers": {
                    "imagelib.Canvas": {
                        "fields": { "kind": { "kind": "literal", "value": "canvas" } }
                    }
                }
            }))
            .unwrap(),
        );
        let engine = engine_with(small_limits(), rules);
        let first = engine.serialize(Value::object(Sub));
        assert_eq!(first.data()["kind"], "canvas");
        // Second hit uses the memoized resolution.
        let second = engine.serialize(Value::object(Sub));
        assert_eq!(second.data()["kind"], "canvas");
        assert_eq!(
            engine
                .rule_memo
                .get("imagelib.RasterCanvas")
                .unwrap()
                .value()
                .clone(),
            Some("imagelib.Canvas".to_string())
        );
    }

    #[test]
    fn probe_results_inline_when_small() {
        let engine = engine();
        let serialized = engine.serialize(Value::object(Point { x: 3, y: 4 }));
        assert!(serialized.is_direct());
        assert_eq!(serialized.data(), &json!({ "x": 3, "y": 4 }));
    }

    #[test]
    fn unprobeable_objects_store_with_their_methods() {
        let engine = engine();
        let serialized = engine.serialize(Value::object(Canvas {
            label: "big".to_string(),
        }));
        assert!(serialized.is_object_ref());

        let data = serialized.data();
        assert_eq!(data["object_type"], "imagelib.Canvas");
        assert_eq!(data["preview"], "<Canvas big>");
        let methods: Vec<MethodSpec> =
            serde_json::from_value(data["available_methods"].clone()).unwrap();
        assert_eq!(methods.len(), 2);
        assert_eq!(methods[0].name, "resize");

        // The stored value keeps the live object callable.
        let object_id = data["object_id"].as_str().unwrap();
        let snapshot = engine.store.fetch(object_id).unwrap();
        assert!(snapshot.advertises("resize"));
        assert!(matches!(snapshot.value, StoredValue::Object(_)));
    }

    #[test]
    fn float_rounding_is_recursive() {
        let mut value = json!({"a": [1.123456789, {"b": 2.000000123}], "c": 3});
        round_floats(&mut value, 6);
        assert_eq!(value["a"][0], 1.123457);
        assert_eq!(value["a"][1]["b"], 2.0);
        assert_eq!(value["c"], 3);
    }
}
