/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/management_api/src/client.rs
*
* The typed-client seam. `ResourceClient<K>` is the only way the controllers
* and stores read or write cluster state; `KubeResourceClient<K>` implements
* it on top of `kube::Api`, and `crate::fake::FakeClient<K>` implements it in
* memory for tests.
*
* Scope is decided once, at construction: namespaced kinds are addressed with
* `Api::namespaced` when a namespace is given and `Api::all` otherwise (which
* lists across namespaces); cluster-scoped kinds always use `Api::all`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::labels::Selector;
use async_trait::async_trait;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::marker::PhantomData;
use thiserror::Error;

// --- Error Handling ---

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("operation cannot be fulfilled on {kind} \"{name}\": the object has been modified")]
    Conflict { kind: String, name: String },

    #[error("invalid {kind}: {message}")]
    Invalid { kind: String, message: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClientError::AlreadyExists { .. })
    }

    fn from_kube(kind: &str, name: &str, error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(response) if response.code == 404 => ClientError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
                ClientError::AlreadyExists { kind: kind.to_string(), name: name.to_string() }
            }
            kube::Error::Api(response) if response.code == 409 => ClientError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            _ => ClientError::Kube(error),
        }
    }
}

// --- Typed Client Trait ---

/// Typed access to one resource kind.
///
/// `namespace` is ignored for cluster-scoped kinds. For namespaced kinds,
/// `None` on `list` means all namespaces. `create` and `update` take the
/// namespace from the object's metadata.
#[async_trait]
pub trait ResourceClient<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, ClientError>;

    async fn list(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<K>, ClientError>;

    async fn create(&self, object: &K) -> Result<K, ClientError>;

    /// Replaces the object. A stale `resourceVersion` yields `Conflict`.
    async fn update(&self, object: &K) -> Result<K, ClientError>;

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), ClientError>;
}

// --- kube-backed Implementation ---

type NamespacedApi<K> = fn(Client, &str) -> Api<K>;

pub struct KubeResourceClient<K> {
    client: Client,
    namespaced: Option<NamespacedApi<K>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeResourceClient<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            namespaced: self.namespaced,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeResourceClient<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    pub fn namespaced(client: Client) -> Self
    where
        K: Resource<Scope = NamespaceResourceScope>,
    {
        Self {
            client,
            namespaced: Some(Api::<K>::namespaced),
            _kind: PhantomData,
        }
    }

    pub fn cluster_scoped(client: Client) -> Self
    where
        K: Resource<Scope = ClusterResourceScope>,
    {
        Self { client, namespaced: None, _kind: PhantomData }
    }

    fn api(&self, namespace: Option<&str>) -> Api<K> {
        match (self.namespaced, namespace) {
            (Some(namespaced), Some(ns)) if !ns.is_empty() => namespaced(self.client.clone(), ns),
            _ => Api::all(self.client.clone()),
        }
    }

    fn kind() -> String {
        K::kind(&()).into_owned()
    }
}

#[async_trait]
impl<K> ResourceClient<K> for KubeResourceClient<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, ClientError> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| ClientError::from_kube(&Self::kind(), name, e))
    }

    async fn list(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<K>, ClientError> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector.to_string());
        }
        self.api(namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| ClientError::from_kube(&Self::kind(), "", e))
    }

    async fn create(&self, object: &K) -> Result<K, ClientError> {
        let name = object.meta().name.clone().unwrap_or_default();
        self.api(object.namespace().as_deref())
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| ClientError::from_kube(&Self::kind(), &name, e))
    }

    async fn update(&self, object: &K) -> Result<K, ClientError> {
        let name = object.name_any();
        self.api(object.namespace().as_deref())
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| ClientError::from_kube(&Self::kind(), &name, e))
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), ClientError> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| ClientError::from_kube(&Self::kind(), name, e))
    }
}
