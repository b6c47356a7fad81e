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

//! Callbridge Runtime
//!
//! Executes the surface the analysis pipeline publishes: a dispatcher that
//! resolves invocations to registered operations, a serialization engine
//! that turns arbitrary operation results into wire-safe JSON, a bounded
//! object store for results that cannot travel inline, and a resource store
//! for binary content.

pub mod coerce;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod resources;
pub mod rules;
pub mod store;
pub mod value;

pub use coerce::{coerce_argument, CoerceError};
pub use config::{
    ConfigError, DispatchConfig, ObjectStoreConfig, ResourceStoreConfig, RuntimeConfig,
    SerializationLimits,
};
pub use dispatch::{
    AsyncOperation, DispatchError, Dispatcher, InvokeResponse, OperationFailure,
    OperationHandler, OperationStats, SyncOperation, PRIVACY_MARKER,
};
pub use engine::{HandleEnvelope, SerializationEngine, Serialized};
pub use resources::{
    sniff_content_type, ResourceContent, ResourceInfo, ResourceReading, ResourceStore,
    RESOURCE_ID_PREFIX,
};
pub use rules::{HandlerRules, ResultKind, RuleSet, RulesError};
pub use store::{ObjectSnapshot, ObjectStore, StoredValue, SweepHandle, OBJECT_ID_PREFIX};
pub use value::{
    ArgValue, Blob, BlobSource, CallArgs, MethodArgs, ObjectError, OpaqueObject, SeekableRead,
    TabularValue, Value, ValueStream,
};
