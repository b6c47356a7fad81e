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

//! Integration test driving the runtime end to end over a fictional image
//! library: configuration from disk, handler rules, handle round-trips
//! through the object store, argument substitution, resource delivery, and
//! store expiry.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Map, Value as Json};

use callbridge_core::{MethodSpec, OperationDescriptor, ParameterShape, TypeShape};
use callbridge_runtime::{
    AsyncOperation, Blob, CallArgs, Dispatcher, HandlerRules, InvokeResponse, MethodArgs,
    ObjectError, ObjectStore, OpaqueObject, OperationFailure, ResourceStore, RuleSet,
    RuntimeConfig, SerializationEngine, Value, OBJECT_ID_PREFIX,
};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

struct Image {
    width: u32,
    height: u32,
    mode: &'static str,
}

impl OpaqueObject for Image {
    fn type_name(&self) -> &str {
        "photolab.Image"
    }

    fn ancestors(&self) -> Vec<String> {
        vec!["photolab.RasterBase".to_string()]
    }

    fn size_estimate(&self) -> usize {
        (self.width * self.height * 3) as usize
    }

    fn preview(&self) -> String {
        format!("Image({}x{} {})", self.width, self.height, self.mode)
    }

    fn methods(&self) -> Vec<MethodSpec> {
        vec![
            MethodSpec::new("histogram"),
            MethodSpec::new("thumbnail"),
        ]
    }

    fn field(&self, name: &str) -> Option<Json> {
        match name {
            "width" => Some(self.width.into()),
            "height" => Some(self.height.into()),
            "mode" => Some(self.mode.into()),
            _ => None,
        }
    }

    fn call(&self, method: &str, args: &MethodArgs) -> Result<Value, ObjectError> {
        match method {
            "histogram" => Ok(Value::json(json!({
                "buckets": [12, 40, 30, 18],
                "mode": self.mode,
            }))),
            "thumbnail" => {
                let edge = args.args.first().and_then(Json::as_u64).unwrap_or(128) as u32;
                Ok(Value::object(Image {
                    width: edge,
                    height: edge,
                    mode: self.mode,
                }))
            }
            other => Err(ObjectError::UnknownMethod {
                method: other.to_string(),
                type_name: self.type_name().to_string(),
            }),
        }
    }
}

/// Metadata record with a rule-driven direct rendering.
struct Exif {
    camera: &'static str,
    iso: u32,
}

impl OpaqueObject for Exif {
    fn type_name(&self) -> &str {
        "photolab.Exif"
    }

    fn preview(&self) -> String {
        format!("Exif({})", self.camera)
    }

    fn methods(&self) -> Vec<MethodSpec> {
        Vec::new()
    }

    fn field(&self, name: &str) -> Option<Json> {
        match name {
            "camera" => Some(self.camera.into()),
            "iso" => Some(self.iso.into()),
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

struct ImageStats;

#[async_trait]
impl AsyncOperation for ImageStats {
    async fn invoke(&self, args: CallArgs) -> Result<Value, OperationFailure> {
        let image = args
            .object("image")
            .ok_or("image argument must be a live handle")?;
        let width = image.field("width").and_then(|v| v.as_u64()).unwrap_or(0);
        let height = image.field("height").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(Value::json(json!({
            "width": width,
            "height": height,
            "pixels": width * height,
        })))
    }
}

fn build_runtime(
    config: &RuntimeConfig,
    rules: RuleSet,
) -> (Dispatcher, Arc<ObjectStore>, Arc<ResourceStore>) {
    let store = Arc::new(ObjectStore::new(config.objects.capacity));
    let resources = Arc::new(ResourceStore::new(&config.resources));
    let engine = Arc::new(SerializationEngine::new(
        config.serialization.clone(),
        rules,
        Arc::clone(&store),
        Arc::clone(&resources),
    ));
    let dispatcher = Dispatcher::new(
        engine,
        Arc::clone(&store),
        Arc::clone(&resources),
        config.dispatch.worker_permits,
    );
    (dispatcher, store, resources)
}

fn register_photolab(dispatcher: &Dispatcher) {
    let mut open = OperationDescriptor::new(
        "photolab.open_image",
        "open_image",
        vec!["photolab".to_string()],
    );
    open.parameters = vec![
        ParameterShape::required("path", TypeShape::string()),
        ParameterShape::optional("width", TypeShape::integer()),
    ];
    open.returns_handle = true;
    open.handle_methods = vec![MethodSpec::new("histogram"), MethodSpec::new("thumbnail")];
    dispatcher
        .register_sync(open, |args| {
            let width = args.integer("width").unwrap_or(800) as u32;
            Ok(Value::object(Image {
                width,
                height: width * 3 / 4,
                mode: "RGB",
            }))
        })
        .unwrap();

    let mut stats = OperationDescriptor::new(
        "photolab.image_stats",
        "image_stats",
        vec!["photolab".to_string()],
    );
    stats.parameters = vec![ParameterShape::required(
        "image",
        TypeShape::nominal("photolab.Image"),
    )];
    stats.is_async = true;
    dispatcher.register_async(stats, ImageStats).unwrap();

    let render = OperationDescriptor::new(
        "photolab.render_preview",
        "render_preview",
        vec!["photolab".to_string()],
    );
    dispatcher
        .register_sync(render, |_| {
            let mut bytes = PNG_MAGIC.to_vec();
            bytes.extend_from_slice(&[0u8; 32]);
            Ok(Value::Blob(Blob::from_bytes(bytes)))
        })
        .unwrap();

    let exif = OperationDescriptor::new(
        "photolab.read_exif",
        "read_exif",
        vec!["photolab".to_string()],
    );
    dispatcher
        .register_sync(exif, |_| {
            Ok(Value::object(Exif {
                camera: "QX-1",
                iso: 400,
            }))
        })
        .unwrap();
}

fn named_args(pairs: &[(&str, Json)]) -> Map<String, Json> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

fn handle_id(response: InvokeResponse) -> String {
    match response {
        InvokeResponse::Handle { object_id, .. } => object_id,
        other => panic!("expected a handle response: {other:?}"),
    }
}

#[test]
fn configuration_and_rules_load_from_disk() {
    let mut rules_file = tempfile::NamedTempFile::new().unwrap();
    rules_file
        .write_all(
            json!({
                "handlers": {
                    "photolab.Exif": {
                        "result": "direct",
                        "fields": {
                            "camera": { "kind": "attribute", "path": "camera" },
                            "iso": { "kind": "attribute", "path": "iso", "transform": "int" },
                            "kind": { "kind": "literal", "value": "exif" }
                        }
                    }
                }
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();

    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    write!(
        config_file,
        r#"
handler_rules = "{}"

[serialization]
max_direct_size = 4096

[objects]
capacity = 16
"#,
        rules_file.path().display()
    )
    .unwrap();

    let config = RuntimeConfig::from_path(config_file.path()).unwrap();
    assert_eq!(config.serialization.max_direct_size, 4096);
    assert_eq!(config.objects.capacity, 16);
    // Untouched sections keep their defaults.
    assert_eq!(config.dispatch.worker_permits, 100);

    let rules_path = config.handler_rules.as_ref().expect("rules path");
    let rules = RuleSet::compile(HandlerRules::from_path(rules_path).unwrap());
    assert!(rules.get("photolab.Exif").is_some());
}

#[tokio::test]
async fn rule_driven_objects_render_direct() {
    let rules = RuleSet::compile(
        HandlerRules::from_json(json!({
            "handlers": {
                "photolab.Exif": {
                    "result": "direct",
                    "fields": {
                        "camera": { "kind": "attribute", "path": "camera" },
                        "iso": { "kind": "attribute", "path": "iso" },
                        "kind": { "kind": "literal", "value": "exif" }
                    }
                }
            }
        }))
        .unwrap(),
    );
    let (dispatcher, _store, _resources) = build_runtime(&RuntimeConfig::default(), rules);
    register_photolab(&dispatcher);

    let response = dispatcher.execute("photolab_read_exif", Map::new()).await;
    let data = response.inline_data().expect("direct data");
    assert_eq!(data["camera"], "QX-1");
    assert_eq!(data["iso"], 400);
    assert_eq!(data["kind"], "exif");
}

#[tokio::test]
async fn handles_round_trip_through_stored_methods() {
    let (dispatcher, store, _resources) =
        build_runtime(&RuntimeConfig::default(), RuleSet::default());
    register_photolab(&dispatcher);

    let response = dispatcher
        .execute("photolab_open_image", named_args(&[("path", json!("a.png"))]))
        .await;
    let object_id = handle_id(response);
    assert!(object_id.starts_with(OBJECT_ID_PREFIX));
    assert!(store.contains(&object_id));

    // Advertised method with an inline result.
    let histogram = dispatcher
        .call_stored_method(&object_id, "histogram", MethodArgs::default())
        .await;
    let data = histogram.inline_data().expect("histogram data");
    assert_eq!(data["mode"], "RGB");

    // A method returning a fresh opaque object yields a nested handle
    // envelope, and that handle is itself live.
    let thumbnail = dispatcher
        .call_stored_method(
            &object_id,
            "thumbnail",
            MethodArgs::positional(vec![json!(64)]),
        )
        .await;
    let envelope = thumbnail.inline_data().expect("thumbnail envelope");
    let nested_id = envelope["object_id"].as_str().expect("nested id");
    assert_eq!(envelope["object_type"], "photolab.Image");
    assert!(store.contains(nested_id));

    let nested_histogram = dispatcher
        .call_stored_method(nested_id, "histogram", MethodArgs::default())
        .await;
    assert!(nested_histogram.is_success());
}

#[tokio::test]
async fn object_ids_substitute_into_operation_arguments() {
    let (dispatcher, _store, _resources) =
        build_runtime(&RuntimeConfig::default(), RuleSet::default());
    register_photolab(&dispatcher);

    let object_id = handle_id(
        dispatcher
            .execute(
                "photolab_open_image",
                named_args(&[("path", json!("b.png")), ("width", json!(640))]),
            )
            .await,
    );

    let response = dispatcher
        .execute("photolab_image_stats", named_args(&[("image", json!(object_id))]))
        .await;
    let data = response.inline_data().expect("stats data");
    assert_eq!(data["width"], 640);
    assert_eq!(data["height"], 480);
    assert_eq!(data["pixels"], 640 * 480);
}

#[tokio::test]
async fn blobs_become_readable_resources() {
    let (dispatcher, _store, resources) =
        build_runtime(&RuntimeConfig::default(), RuleSet::default());
    register_photolab(&dispatcher);

    let response = dispatcher.execute("photolab_render_preview", Map::new()).await;
    let data = response.inline_data().expect("resource data");
    assert_eq!(data["content_type"], "image/png");
    let uri = data["uri"].as_str().expect("resource uri");

    let reading = dispatcher.read_resource(uri).expect("readable resource");
    assert!(reading.base64);
    let bytes = general_purpose::STANDARD.decode(&reading.content).unwrap();
    assert_eq!(&bytes[..PNG_MAGIC.len()], PNG_MAGIC);

    let listed = dispatcher.list_resources();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uri, uri);
    assert_eq!(resources.len(), 1);

    assert!(dispatcher.read_resource("bridge://resources/res_missing").is_err());
}

#[tokio::test]
async fn stats_track_calls_and_errors() {
    let (dispatcher, _store, _resources) =
        build_runtime(&RuntimeConfig::default(), RuleSet::default());
    register_photolab(&dispatcher);

    let _ = dispatcher.execute("photolab_read_exif", Map::new()).await;
    let _ = dispatcher.execute("photolab_read_exif", Map::new()).await;
    let _ = dispatcher.execute("photolab_missing", Map::new()).await;

    let stats = dispatcher.stats();
    assert_eq!(stats["photolab_read_exif"].calls, 2);
    assert_eq!(stats["photolab_read_exif"].errors, 0);
    assert_eq!(stats["photolab_missing"].calls, 1);
    assert_eq!(stats["photolab_missing"].errors, 1);
}

#[tokio::test]
async fn expired_handles_are_swept_and_shutdown_is_bounded() {
    let store = Arc::new(ObjectStore::new(8));
    let sweeper = store.spawn_sweeper(Duration::from_millis(10), Duration::from_millis(20));

    let object_id = store.insert(
        callbridge_runtime::StoredValue::Json(json!([1, 2, 3])),
        3,
        "[1,2,3]",
        Vec::new(),
    );
    assert!(store.contains(&object_id));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!store.contains(&object_id));

    let started = std::time::Instant::now();
    sweeper.shutdown(Duration::from_secs(1)).await;
    assert!(started.elapsed() < Duration::from_secs(1));
}
