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

//! The invocation boundary.
//!
//! The dispatcher resolves requests to registered operations, cleans and
//! coerces arguments, runs the operation on the right execution strategy,
//! and routes the result through the serialization engine. Request errors
//! never escape as panics or transport failures; they come back as an
//! `{error}` response.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use callbridge_core::{MethodSpec, OperationDescriptor, ShapeKind};

use crate::coerce::{coerce_argument, CoerceError};
use crate::engine::{SerializationEngine, STORED_OBJECT_NOTE};
use crate::resources::{ResourceInfo, ResourceReading, ResourceStore};
use crate::store::{ObjectStore, StoredValue, OBJECT_ID_PREFIX};
use crate::value::{ArgValue, CallArgs, MethodArgs, Value};

/// Methods whose name starts with this marker are never callable from the
/// wire.
pub const PRIVACY_MARKER: char = '_';

/// Failure surfaced by a target operation.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct OperationFailure(pub String);

impl OperationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for OperationFailure {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for OperationFailure {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Asynchronous execution strategy, awaited cooperatively.
#[async_trait]
pub trait AsyncOperation: Send + Sync {
    async fn invoke(&self, args: CallArgs) -> Result<Value, OperationFailure>;
}

/// Synchronous execution strategy, run on the blocking pool under a worker
/// permit.
pub type SyncOperation = dyn Fn(CallArgs) -> Result<Value, OperationFailure> + Send + Sync;

/// One registered target behind the two execution strategies.
pub enum OperationHandler {
    Sync(Arc<SyncOperation>),
    Async(Arc<dyn AsyncOperation>),
}

impl OperationHandler {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(CallArgs) -> Result<Value, OperationFailure> + Send + Sync + 'static,
    {
        OperationHandler::Sync(Arc::new(f))
    }
}

struct RegisteredOperation {
    descriptor: OperationDescriptor,
    handler: OperationHandler,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown operation '{operation_id}'")]
    UnknownOperation { operation_id: String },
    #[error("operation '{operation_id}' is already registered")]
    DuplicateOperation { operation_id: String },
    #[error("object '{object_id}' not found or expired")]
    UnknownObject { object_id: String },
    #[error("method name must be a non-empty string")]
    EmptyMethodName,
    #[error("access to private methods is not allowed")]
    PrivateMethod,
    #[error("object '{object_id}' holds stored data with no callable methods")]
    NoCallableInterface { object_id: String },
    #[error("method '{method}' is not allowed on object '{object_id}'")]
    MethodNotAllowed { method: String, object_id: String },
    #[error("argument '{param}': {source}")]
    Coercion {
        param: String,
        #[source]
        source: CoerceError,
    },
    #[error("operation '{operation_id}' failed: {message}")]
    Execution {
        operation_id: String,
        message: String,
    },
    #[error("method '{method}' failed: {message}")]
    MethodFailed { method: String, message: String },
    #[error("worker pool is shut down")]
    WorkerPool,
    #[error("resource '{uri}' not found")]
    UnknownResource { uri: String },
}

/// Per-operation invocation counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OperationStats {
    pub calls: u64,
    pub errors: u64,
    pub total_latency_ms: u64,
}

/// Invocation boundary response: inline data, an object handle, or an
/// error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvokeResponse {
    Data { success: bool, data: Json },
    Handle {
        success: bool,
        object_id: String,
        object_type: String,
        available_methods: Vec<MethodSpec>,
        note: String,
    },
    Error { error: String },
}

impl InvokeResponse {
    fn success(data: Json) -> Self {
        InvokeResponse::Data {
            success: true,
            data,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        InvokeResponse::Error {
            error: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, InvokeResponse::Error { .. })
    }

    pub fn inline_data(&self) -> Option<&Json> {
        match self {
            InvokeResponse::Data { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            InvokeResponse::Error { error } => Some(error),
            _ => None,
        }
    }
}

/// Resolves invocation requests to registered operations.
pub struct Dispatcher {
    operations: DashMap<String, Arc<RegisteredOperation>>,
    engine: Arc<SerializationEngine>,
    store: Arc<ObjectStore>,
    resources: Arc<ResourceStore>,
    workers: Arc<Semaphore>,
    stats: DashMap<String, OperationStats>,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<SerializationEngine>,
        store: Arc<ObjectStore>,
        resources: Arc<ResourceStore>,
        worker_permits: usize,
    ) -> Self {
        Self {
            operations: DashMap::new(),
            engine,
            store,
            resources,
            workers: Arc::new(Semaphore::new(worker_permits.max(1))),
            stats: DashMap::new(),
        }
    }

    /// Register an operation under its surface operation id.
    pub fn register(
        &self,
        descriptor: OperationDescriptor,
        handler: OperationHandler,
    ) -> Result<(), DispatchError> {
        let operation_id = descriptor.operation_id();
        if self.operations.contains_key(&operation_id) {
            return Err(DispatchError::DuplicateOperation { operation_id });
        }
        debug!(operation = %operation_id, "registered operation");
        self.operations
            .insert(operation_id, Arc::new(RegisteredOperation { descriptor, handler }));
        Ok(())
    }

    pub fn register_sync<F>(
        &self,
        descriptor: OperationDescriptor,
        f: F,
    ) -> Result<(), DispatchError>
    where
        F: Fn(CallArgs) -> Result<Value, OperationFailure> + Send + Sync + 'static,
    {
        self.register(descriptor, OperationHandler::sync(f))
    }

    pub fn register_async<H>(
        &self,
        descriptor: OperationDescriptor,
        handler: H,
    ) -> Result<(), DispatchError>
    where
        H: AsyncOperation + 'static,
    {
        self.register(descriptor, OperationHandler::Async(Arc::new(handler)))
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Invoke a registered operation with named JSON arguments.
    pub async fn execute(&self, operation_id: &str, arguments: Map<String, Json>) -> InvokeResponse {
        let started = Instant::now();
        let outcome = self.run_operation(operation_id, arguments).await;
        self.record(operation_id, started.elapsed().as_millis() as u64, outcome.is_err());
        match outcome {
            Ok(response) => response,
            Err(error) => {
                warn!(operation = %operation_id, error = %error, "invocation failed");
                InvokeResponse::failure(error.to_string())
            }
        }
    }

    async fn run_operation(
        &self,
        operation_id: &str,
        arguments: Map<String, Json>,
    ) -> Result<InvokeResponse, DispatchError> {
        let operation = self
            .operations
            .get(operation_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DispatchError::UnknownOperation {
                operation_id: operation_id.to_string(),
            })?;
        let args = self.prepare_arguments(&operation.descriptor, arguments)?;
        let result = self.run_handler(&operation, args).await?;

        // An opaque-flagged result that fails the direct-serializability
        // probe skips the engine and goes straight to the store.
        if operation.descriptor.returns_handle {
            if let Value::Object(object) = &result {
                if object.to_json().is_none() {
                    let envelope = self.engine.store_opaque(Arc::clone(object));
                    return Ok(InvokeResponse::Handle {
                        success: true,
                        object_id: envelope.object_id,
                        object_type: envelope.object_type,
                        available_methods: envelope.available_methods,
                        note: STORED_OBJECT_NOTE.to_string(),
                    });
                }
            }
        }

        let serialized = self.engine.serialize(result);
        Ok(InvokeResponse::success(serialized.into_data()))
    }

    /// Drop omitted arguments, substitute live object ids, and coerce the
    /// rest toward declared shapes.
    fn prepare_arguments(
        &self,
        descriptor: &OperationDescriptor,
        arguments: Map<String, Json>,
    ) -> Result<CallArgs, DispatchError> {
        let mut named = BTreeMap::new();
        for (name, value) in arguments {
            // Null and empty-string arguments count as omitted.
            if value.is_null() || value.as_str() == Some("") {
                continue;
            }
            let shape = descriptor
                .parameters
                .iter()
                .find(|param| param.name == name)
                .map(|param| &param.shape);

            if let Some(candidate) = value.as_str() {
                let plain_string =
                    shape.is_some_and(|shape| shape.kind == Some(ShapeKind::String));
                if !plain_string && candidate.starts_with(OBJECT_ID_PREFIX) {
                    if let Some(stored) = self.store.get(candidate) {
                        debug!(param = %name, object = %candidate, "substituted stored value");
                        named.insert(name, substituted(stored));
                        continue;
                    }
                }
            }

            let prepared = match shape {
                Some(shape) => coerce_argument(value, shape).map_err(|source| {
                    DispatchError::Coercion {
                        param: name.clone(),
                        source,
                    }
                })?,
                None => value,
            };
            named.insert(name, ArgValue::Json(prepared));
        }
        Ok(CallArgs::new(named))
    }

    async fn run_handler(
        &self,
        operation: &RegisteredOperation,
        args: CallArgs,
    ) -> Result<Value, DispatchError> {
        match &operation.handler {
            OperationHandler::Async(handler) => {
                let operation_id = operation.descriptor.operation_id();
                handler.invoke(args).await.map_err(|failure| {
                    DispatchError::Execution {
                        operation_id,
                        message: failure.to_string(),
                    }
                })
            }
            OperationHandler::Sync(f) => {
                let operation_id = operation.descriptor.operation_id();
                let permit = Arc::clone(&self.workers)
                    .acquire_owned()
                    .await
                    .map_err(|_| DispatchError::WorkerPool)?;
                let f = Arc::clone(f);
                let joined = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    f(args)
                })
                .await;
                match joined {
                    Ok(result) => result.map_err(|failure| DispatchError::Execution {
                        operation_id,
                        message: failure.to_string(),
                    }),
                    Err(join_error) => Err(DispatchError::Execution {
                        operation_id,
                        message: format!("worker task failed: {join_error}"),
                    }),
                }
            }
        }
    }

    /// Invoke an advertised method on a stored object. The result goes
    /// through the engine like any other, producing a fresh handle when it
    /// is itself complex.
    pub async fn call_stored_method(
        &self,
        object_id: &str,
        method: &str,
        args: MethodArgs,
    ) -> InvokeResponse {
        let started = Instant::now();
        let outcome = self.run_stored_method(object_id, method, args).await;
        self.record(
            "call_stored_method",
            started.elapsed().as_millis() as u64,
            outcome.is_err(),
        );
        match outcome {
            Ok(response) => response,
            Err(error) => {
                warn!(object = %object_id, method = %method, error = %error, "stored-method call failed");
                InvokeResponse::failure(error.to_string())
            }
        }
    }

    async fn run_stored_method(
        &self,
        object_id: &str,
        method: &str,
        args: MethodArgs,
    ) -> Result<InvokeResponse, DispatchError> {
        if method.is_empty() {
            return Err(DispatchError::EmptyMethodName);
        }
        if method.starts_with(PRIVACY_MARKER) {
            return Err(DispatchError::PrivateMethod);
        }
        let snapshot = self
            .store
            .fetch(object_id)
            .ok_or_else(|| DispatchError::UnknownObject {
                object_id: object_id.to_string(),
            })?;
        let StoredValue::Object(ref object) = snapshot.value else {
            return Err(DispatchError::NoCallableInterface {
                object_id: object_id.to_string(),
            });
        };
        if !snapshot.advertises(method) {
            return Err(DispatchError::MethodNotAllowed {
                method: method.to_string(),
                object_id: object_id.to_string(),
            });
        }

        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::WorkerPool)?;
        let method_name = method.to_string();
        let object = Arc::clone(object);
        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            object.call(&method_name, &args)
        })
        .await;
        let result = match joined {
            Ok(result) => result.map_err(|error| DispatchError::MethodFailed {
                method: method.to_string(),
                message: error.to_string(),
            })?,
            Err(join_error) => {
                return Err(DispatchError::MethodFailed {
                    method: method.to_string(),
                    message: format!("worker task failed: {join_error}"),
                })
            }
        };

        let serialized = self.engine.serialize(result);
        Ok(InvokeResponse::success(serialized.into_data()))
    }

    /// Resolve a resource URI at the read boundary.
    pub fn read_resource(&self, uri: &str) -> Result<ResourceReading, DispatchError> {
        self.resources
            .read(uri)
            .ok_or_else(|| DispatchError::UnknownResource {
                uri: uri.to_string(),
            })
    }

    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        self.resources.list()
    }

    /// Snapshot of the per-operation counters.
    pub fn stats(&self) -> BTreeMap<String, OperationStats> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    fn record(&self, key: &str, latency_ms: u64, failed: bool) {
        let mut entry = self.stats.entry(key.to_string()).or_default();
        entry.calls += 1;
        entry.total_latency_ms += latency_ms;
        if failed {
            entry.errors += 1;
        }
    }
}

fn substituted(stored: StoredValue) -> ArgValue {
    match stored {
        StoredValue::Object(object) => ArgValue::Object(object),
        StoredValue::Json(json) => ArgValue::Json(json),
        StoredValue::Table(table) => ArgValue::Json(table.data),
    }
}
