//! In-memory [`StoreClient`] used to exercise the engine without a cluster.
//!
//! Objects are kept as JSON keyed by (kind, namespace, name). The store bumps
//! resourceVersion on every write, rejects stale updates with a conflict, and
//! records every mutation so tests can assert on exactly which writes a
//! reconciliation pass performed. Failures can be injected per (verb, kind).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use kube::core::ErrorResponse;
use kube::ResourceExt;
use serde_json::Value;

use super::{ClusterObject, StoreClient, StoreError};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Create,
    Update,
    UpdateStatus,
    List,
}

type Key = (String, String, String);

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<Key, Value>,
    next_rv: u64,
    next_uid: u64,
    log: Vec<String>,
    failures: HashSet<(Verb, String)>,
}

fn kind_of<K: ClusterObject>() -> String {
    K::kind(&()).to_string()
}

fn key_of<K: ClusterObject>(obj: &K) -> Key {
    (
        kind_of::<K>(),
        obj.namespace().unwrap_or_default(),
        obj.name_any(),
    )
}

fn injected_failure() -> StoreError {
    StoreError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: "injected failure".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

fn resource_version(v: &Value) -> Option<&str> {
    v.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

fn labels_match(v: &Value, selector: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, want)| {
        v.pointer(&format!("/metadata/labels/{k}"))
            .and_then(Value::as_str)
            == Some(want.as_str())
    })
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Seed an object without logging it as a reconciliation write. The
    /// metadata is stored verbatim apart from a resourceVersion, so a seeded
    /// object with no uid stays uid-less.
    pub fn seed<K: ClusterObject>(&self, obj: &K) {
        let mut inner = self.inner.lock().expect("mem store poisoned");
        let mut v = serde_json::to_value(obj).expect("seed object serializes");
        inner.next_rv += 1;
        let rv = inner.next_rv.to_string();
        if let Some(meta) = v.pointer_mut("/metadata").and_then(Value::as_object_mut) {
            meta.entry("resourceVersion")
                .or_insert_with(|| Value::String(rv));
        }
        inner.objects.insert(key_of(obj), v);
    }

    /// Make every subsequent `verb` on `kind` fail with a server error.
    pub fn fail_on(&self, verb: Verb, kind: &str) {
        let mut inner = self.inner.lock().expect("mem store poisoned");
        inner.failures.insert((verb, kind.to_string()));
    }

    /// Mutation log, entries like `"create Service default/history"`.
    pub fn log(&self) -> Vec<String> {
        self.inner.lock().expect("mem store poisoned").log.clone()
    }

    pub fn stored<K: ClusterObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let inner = self.inner.lock().expect("mem store poisoned");
        let key = (kind_of::<K>(), namespace.to_string(), name.to_string());
        inner
            .objects
            .get(&key)
            .cloned()
            .map(|v| serde_json::from_value(v).expect("stored object deserializes"))
    }

    /// Raw stored JSON with resourceVersion stripped, for no-net-change checks.
    pub fn stored_raw(&self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        let inner = self.inner.lock().expect("mem store poisoned");
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        inner.objects.get(&key).cloned().map(|mut v| {
            if let Some(meta) = v.pointer_mut("/metadata").and_then(Value::as_object_mut) {
                meta.remove("resourceVersion");
            }
            v
        })
    }

    fn check_failure(&self, inner: &Inner, verb: Verb, kind: &str) -> Result<(), StoreError> {
        if inner.failures.contains(&(verb, kind.to_string())) {
            Err(injected_failure())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoreClient for MemStore {
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        let inner = self.inner.lock().expect("mem store poisoned");
        let kind = kind_of::<K>();
        self.check_failure(&inner, Verb::Get, &kind)?;
        let key = (kind, namespace.to_string(), name.to_string());
        match inner.objects.get(&key) {
            Some(v) => Ok(serde_json::from_value(v.clone())?),
            None => Err(StoreError::NotFound),
        }
    }

    async fn create<K: ClusterObject>(&self, obj: &K) -> Result<K, StoreError> {
        let mut inner = self.inner.lock().expect("mem store poisoned");
        let key = key_of(obj);
        self.check_failure(&inner, Verb::Create, &key.0)?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        let mut v = serde_json::to_value(obj)?;
        inner.next_rv += 1;
        inner.next_uid += 1;
        let rv = inner.next_rv.to_string();
        let uid = format!("uid-{}", inner.next_uid);
        if let Some(meta) = v.pointer_mut("/metadata").and_then(Value::as_object_mut) {
            meta.insert("resourceVersion".to_string(), Value::String(rv));
            meta.entry("uid").or_insert_with(|| Value::String(uid));
        }
        let stored = serde_json::from_value(v.clone())?;
        inner.log.push(format!("create {} {}/{}", key.0, key.1, key.2));
        inner.objects.insert(key, v);
        Ok(stored)
    }

    async fn update<K: ClusterObject>(&self, obj: &K) -> Result<K, StoreError> {
        let mut inner = self.inner.lock().expect("mem store poisoned");
        let key = key_of(obj);
        self.check_failure(&inner, Verb::Update, &key.0)?;
        let mut v = serde_json::to_value(obj)?;
        let current_rv = match inner.objects.get(&key) {
            Some(current) => resource_version(current).map(str::to_string),
            None => return Err(StoreError::NotFound),
        };
        if let (Some(sent), Some(current)) = (resource_version(&v), current_rv.as_deref()) {
            if sent != current {
                return Err(StoreError::Conflict);
            }
        }
        inner.next_rv += 1;
        let rv = inner.next_rv.to_string();
        if let Some(meta) = v.pointer_mut("/metadata").and_then(Value::as_object_mut) {
            meta.insert("resourceVersion".to_string(), Value::String(rv));
        }
        let stored = serde_json::from_value(v.clone())?;
        inner.log.push(format!("update {} {}/{}", key.0, key.1, key.2));
        inner.objects.insert(key, v);
        Ok(stored)
    }

    async fn update_status<K: ClusterObject>(&self, obj: &K) -> Result<K, StoreError> {
        let mut inner = self.inner.lock().expect("mem store poisoned");
        let key = key_of(obj);
        self.check_failure(&inner, Verb::UpdateStatus, &key.0)?;
        let sent = serde_json::to_value(obj)?;
        let mut current = match inner.objects.get(&key) {
            Some(current) => current.clone(),
            None => return Err(StoreError::NotFound),
        };
        if let Some(obj_map) = current.as_object_mut() {
            match sent.get("status") {
                Some(status) => {
                    obj_map.insert("status".to_string(), status.clone());
                }
                None => {
                    obj_map.remove("status");
                }
            }
        }
        inner.next_rv += 1;
        let rv = inner.next_rv.to_string();
        if let Some(meta) = current.pointer_mut("/metadata").and_then(Value::as_object_mut) {
            meta.insert("resourceVersion".to_string(), Value::String(rv));
        }
        let stored = serde_json::from_value(current.clone())?;
        inner
            .log
            .push(format!("status {} {}/{}", key.0, key.1, key.2));
        inner.objects.insert(key, current);
        Ok(stored)
    }

    async fn list_labeled<K: ClusterObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError> {
        let inner = self.inner.lock().expect("mem store poisoned");
        let kind = kind_of::<K>();
        self.check_failure(&inner, Verb::List, &kind)?;
        let mut items = Vec::new();
        for ((k, ns, _), v) in &inner.objects {
            if *k == kind && ns == namespace && labels_match(v, labels) {
                items.push(serde_json::from_value(v.clone())?);
            }
        }
        Ok(items)
    }
}
