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

//! Bounded store of object handles.
//!
//! Values too large or too live to inline are parked here under process-
//! unique ids. The store is an LRU: reads refresh recency, inserting at
//! capacity evicts exactly one least-recently-used entry, and a background
//! sweeper retires entries past their TTL.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use callbridge_core::MethodSpec;

use crate::value::{OpaqueObject, TabularValue};

/// Handle ids are `"obj_"` plus twelve hex digits.
pub const OBJECT_ID_PREFIX: &str = "obj_";

// The id counter is the only process-wide state in the runtime; it sits
// under its own lock so ids stay unique across stores.
static NEXT_OBJECT_ID: Mutex<u64> = Mutex::new(1);

fn next_object_id() -> String {
    let mut counter = NEXT_OBJECT_ID.lock();
    let id = *counter;
    *counter += 1;
    format!("{OBJECT_ID_PREFIX}{id:012x}")
}

/// A value retained behind an object handle.
#[derive(Clone)]
pub enum StoredValue {
    /// JSON data too large to inline.
    Json(serde_json::Value),
    /// Tabular data beyond the inline ceilings.
    Table(TabularValue),
    /// A live object with callable methods.
    Object(Arc<dyn OpaqueObject>),
}

impl StoredValue {
    /// Type label used in handle envelopes.
    pub fn type_label(&self) -> String {
        match self {
            StoredValue::Json(serde_json::Value::Array(_)) => "list".to_string(),
            StoredValue::Json(serde_json::Value::Object(_)) => "map".to_string(),
            StoredValue::Json(_) => "json".to_string(),
            StoredValue::Table(table) => table.type_name.clone(),
            StoredValue::Object(object) => object.type_name().to_string(),
        }
    }
}

impl fmt::Debug for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredValue::Json(_) => f.write_str("Json(..)"),
            StoredValue::Table(table) => write!(f, "Table({})", table.type_name),
            StoredValue::Object(object) => write!(f, "Object({})", object.type_name()),
        }
    }
}

struct StoredEntry {
    value: StoredValue,
    type_name: String,
    size_estimate: usize,
    preview: String,
    created: Instant,
    created_at: DateTime<Utc>,
    methods: Vec<MethodSpec>,
    advertised: HashSet<String>,
    stamp: u64,
}

/// Read-time view of one handle.
#[derive(Debug, Clone)]
pub struct ObjectSnapshot {
    pub value: StoredValue,
    pub type_name: String,
    pub size_estimate: usize,
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub methods: Vec<MethodSpec>,
    advertised: HashSet<String>,
}

impl ObjectSnapshot {
    /// Whether a method is in the advertised set captured at store time.
    pub fn advertises(&self, method: &str) -> bool {
        self.advertised.contains(method)
    }
}

struct StoreInner {
    entries: HashMap<String, StoredEntry>,
    // recency stamp -> id; the lowest stamp is the eviction victim.
    recency: BTreeMap<u64, String>,
    clock: u64,
}

/// Bounded LRU map of object handles.
pub struct ObjectStore {
    inner: Mutex<StoreInner>,
    capacity: usize,
}

impl ObjectStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                clock: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Park a value and return its handle id. At capacity the least
    /// recently used entry is evicted first.
    pub fn insert(
        &self,
        value: StoredValue,
        size_estimate: usize,
        preview: impl Into<String>,
        methods: Vec<MethodSpec>,
    ) -> String {
        let object_id = next_object_id();
        let type_name = value.type_label();
        let advertised = methods.iter().map(|m| m.name.clone()).collect();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.entries.len() >= self.capacity {
            if let Some((_, victim)) = inner.recency.pop_first() {
                inner.entries.remove(&victim);
                debug!(evicted = %victim, "object store at capacity; evicted least recently used handle");
            }
        }
        inner.clock += 1;
        let stamp = inner.clock;
        inner.recency.insert(stamp, object_id.clone());
        inner.entries.insert(
            object_id.clone(),
            StoredEntry {
                value,
                type_name: type_name.clone(),
                size_estimate,
                preview: preview.into(),
                created: Instant::now(),
                created_at: Utc::now(),
                methods,
                advertised,
                stamp,
            },
        );
        debug!(object_id = %object_id, object_type = %type_name, "stored object handle");
        object_id
    }

    /// Fetch a handle, refreshing its recency.
    pub fn fetch(&self, object_id: &str) -> Option<ObjectSnapshot> {
        let mut guard = self.inner.lock();
        let StoreInner {
            entries,
            recency,
            clock,
        } = &mut *guard;
        let entry = entries.get_mut(object_id)?;
        *clock += 1;
        recency.remove(&entry.stamp);
        entry.stamp = *clock;
        recency.insert(entry.stamp, object_id.to_string());
        Some(ObjectSnapshot {
            value: entry.value.clone(),
            type_name: entry.type_name.clone(),
            size_estimate: entry.size_estimate,
            preview: entry.preview.clone(),
            created_at: entry.created_at,
            methods: entry.methods.clone(),
            advertised: entry.advertised.clone(),
        })
    }

    /// Fetch just the stored value, refreshing recency.
    pub fn get(&self, object_id: &str) -> Option<StoredValue> {
        self.fetch(object_id).map(|snapshot| snapshot.value)
    }

    pub fn contains(&self, object_id: &str) -> bool {
        self.inner.lock().entries.contains_key(object_id)
    }

    /// Remove every entry strictly older than `max_age`. Returns how many
    /// were removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let mut guard = self.inner.lock();
        let StoreInner {
            entries, recency, ..
        } = &mut *guard;
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.created) > max_age)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(entry) = entries.remove(id) {
                recency.remove(&entry.stamp);
            }
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start the background TTL sweep. The returned handle stops it with a
    /// bounded join; a failed sweep never kills the loop.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, ttl: Duration) -> SweepHandle {
        let (shutdown, mut rx) = watch::channel(false);
        let store = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.cleanup(ttl);
                        if removed > 0 {
                            info!(removed, "swept expired object handles");
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("object store sweeper stopped");
        });
        SweepHandle { shutdown, task }
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Handle to the background TTL sweep task.
pub struct SweepHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Signal shutdown and wait up to `grace` for the task to stop.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(grace, self.task).await.is_err() {
            warn!("object store sweeper did not stop within the grace period");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored_json(value: serde_json::Value) -> StoredValue {
        StoredValue::Json(value)
    }

    #[test]
    fn ids_are_unique_and_prefixed() {
        let store = ObjectStore::new(8);
        let a = store.insert(stored_json(json!(1)), 1, "1", Vec::new());
        let b = store.insert(stored_json(json!(2)), 1, "2", Vec::new());
        assert_ne!(a, b);
        assert!(a.starts_with(OBJECT_ID_PREFIX));
        // Prefix plus twelve hex digits.
        assert_eq!(a.len(), OBJECT_ID_PREFIX.len() + 12);
    }

    #[test]
    fn fetch_returns_stored_value_and_labels() {
        let store = ObjectStore::new(8);
        let id = store.insert(stored_json(json!([1, 2, 3])), 7, "[1,2,3]", Vec::new());

        let snapshot = store.fetch(&id).unwrap();
        assert_eq!(snapshot.type_name, "list");
        assert_eq!(snapshot.preview, "[1,2,3]");
        assert_eq!(snapshot.size_estimate, 7);
        assert!(!snapshot.advertises("anything"));
        match snapshot.value {
            StoredValue::Json(value) => assert_eq!(value, json!([1, 2, 3])),
            other => panic!("unexpected stored value: {other:?}"),
        }
    }

    #[test]
    fn capacity_evicts_exactly_the_least_recently_used() {
        let store = ObjectStore::new(2);
        let a = store.insert(stored_json(json!("a")), 1, "a", Vec::new());
        let b = store.insert(stored_json(json!("b")), 1, "b", Vec::new());

        // Touch `a` so `b` becomes the oldest.
        assert!(store.fetch(&a).is_some());

        let c = store.insert(stored_json(json!("c")), 1, "c", Vec::new());
        assert_eq!(store.len(), 2);
        assert!(store.contains(&a));
        assert!(store.contains(&c));
        assert!(!store.contains(&b));
    }

    #[test]
    fn cleanup_removes_only_entries_older_than_max_age() {
        let store = ObjectStore::new(8);
        let old = store.insert(stored_json(json!("old")), 1, "old", Vec::new());
        std::thread::sleep(Duration::from_millis(40));
        let young = store.insert(stored_json(json!("young")), 1, "young", Vec::new());

        let removed = store.cleanup(Duration::from_millis(20));
        assert_eq!(removed, 1);
        assert!(!store.contains(&old));
        assert!(store.contains(&young));
    }

    #[test]
    fn cleanup_with_long_age_removes_nothing() {
        let store = ObjectStore::new(8);
        store.insert(stored_json(json!(1)), 1, "1", Vec::new());
        assert_eq!(store.cleanup(Duration::from_secs(3600)), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn advertised_set_comes_from_method_specs() {
        let store = ObjectStore::new(8);
        let id = store.insert(
            stored_json(json!({})),
            1,
            "{}",
            vec![MethodSpec::new("resize"), MethodSpec::new("crop")],
        );
        let snapshot = store.fetch(&id).unwrap();
        assert!(snapshot.advertises("resize"));
        assert!(snapshot.advertises("crop"));
        assert!(!snapshot.advertises("_private"));
    }

    #[tokio::test]
    async fn sweeper_expires_entries_and_stops_within_grace() {
        let store = Arc::new(ObjectStore::new(8));
        store.insert(stored_json(json!("x")), 1, "x", Vec::new());

        let handle = store.spawn_sweeper(Duration::from_millis(10), Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.is_empty());

        // Bounded join: must complete well within the grace period.
        let started = Instant::now();
        handle.shutdown(Duration::from_secs(1)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
