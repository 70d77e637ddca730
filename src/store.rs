//! Object-store capability injected into the engine.
//!
//! Every remote operation the engine performs goes through [`StoreClient`]:
//! get, create, update, update-status and list-by-labels. [`KubeStore`] backs
//! the trait with a real API server; [`mem::MemStore`] backs it with an
//! in-process map for tests.

pub mod mem;

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Bounds shared by every kind the store can hold.
pub trait ClusterObject:
    kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ClusterObject for K where
    K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("object already exists")]
    AlreadyExists,
    #[error("conflicting concurrent write")]
    Conflict,
    #[error("api request failed: {0}")]
    Api(#[source] kube::Error),
    #[error("object serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    fn classify(err: kube::Error) -> StoreError {
        match &err {
            kube::Error::Api(resp) => match resp.reason.as_str() {
                "NotFound" => StoreError::NotFound,
                "AlreadyExists" => StoreError::AlreadyExists,
                "Conflict" => StoreError::Conflict,
                _ => StoreError::Api(err),
            },
            _ => StoreError::Api(err),
        }
    }
}

#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError>;

    async fn create<K: ClusterObject>(&self, obj: &K) -> Result<K, StoreError>;

    async fn update<K: ClusterObject>(&self, obj: &K) -> Result<K, StoreError>;

    async fn update_status<K: ClusterObject>(&self, obj: &K) -> Result<K, StoreError>;

    async fn list_labeled<K: ClusterObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError>;
}

/// Production store backed by a `kube::Client`.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        KubeStore { client }
    }

    fn api<K: ClusterObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl StoreClient for KubeStore {
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(StoreError::classify)
    }

    async fn create<K: ClusterObject>(&self, obj: &K) -> Result<K, StoreError> {
        self.api::<K>(&obj.namespace().unwrap_or_default())
            .create(&PostParams::default(), obj)
            .await
            .map_err(StoreError::classify)
    }

    async fn update<K: ClusterObject>(&self, obj: &K) -> Result<K, StoreError> {
        self.api::<K>(&obj.namespace().unwrap_or_default())
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
            .map_err(StoreError::classify)
    }

    async fn update_status<K: ClusterObject>(&self, obj: &K) -> Result<K, StoreError> {
        let data = serde_json::to_vec(obj)?;
        self.api::<K>(&obj.namespace().unwrap_or_default())
            .replace_status(&obj.name_any(), &PostParams::default(), data)
            .await
            .map_err(StoreError::classify)
    }

    async fn list_labeled<K: ClusterObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError> {
        let lp = ListParams::default().labels(&selector_string(labels));
        let list = self
            .api::<K>(namespace)
            .list(&lp)
            .await
            .map_err(StoreError::classify)?;
        Ok(list.items)
    }
}
