/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/management_api/src/fake.rs
*
* In-memory fake clients. `FakeClient<K>` stores objects keyed by namespace
* and name and behaves like a small API server for one kind:
*
* - every write bumps a cluster-wide resource version; an `update` carrying a
*   stale `resourceVersion` fails with `Conflict`;
* - `create` honours `generateName` and assigns a UID;
* - every call is recorded as an `Action` so tests can assert on traffic;
* - errors can be injected per verb with `inject_error`.
*
* `FakeClientset` builds a full `Clientset` from fakes and keeps typed handles
* to each fake for seeding and assertions.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::client::{ClientError, ResourceClient};
use crate::clientset::Clientset;
use crate::labels::Selector;
use crate::v3::{Cluster, ClusterRoleTemplateBinding, Project, RoleTemplate, Token, User};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Delete,
}

/// One recorded call against a fake client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    pub verb: Verb,
    pub namespace: Option<String>,
    pub name: String,
}

type ErrorFactory = Box<dyn Fn() -> ClientError + Send + Sync>;

struct Reactor {
    verb: Verb,
    remaining: usize,
    make: ErrorFactory,
}

struct FakeState<K> {
    objects: BTreeMap<(String, String), K>,
    actions: Vec<Action>,
    reactors: Vec<Reactor>,
    next_version: u64,
}

pub struct FakeClient<K> {
    state: Mutex<FakeState<K>>,
}

impl<K> Default for FakeClient<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                objects: BTreeMap::new(),
                actions: Vec::new(),
                reactors: Vec::new(),
                next_version: 1,
            }),
        }
    }
}

impl<K> FakeClient<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState<K>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(namespace: Option<&str>, name: &str) -> (String, String) {
        (namespace.unwrap_or_default().to_string(), name.to_string())
    }

    fn kind() -> String {
        K::kind(&()).into_owned()
    }

    /// Stores an object without recording an action. Missing resource
    /// versions and UIDs are filled in.
    pub fn seed(&self, mut object: K) -> K {
        let mut state = self.lock();
        let version = state.next_version;
        state.next_version += 1;
        let meta = object.meta_mut();
        meta.resource_version = Some(version.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{version}"));
        }
        let key = Self::key(object.namespace().as_deref(), &object.name_any());
        state.objects.insert(key, object.clone());
        object
    }

    /// Returns the stored object without recording an action.
    pub fn peek(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        self.lock().objects.get(&Self::key(namespace, name)).cloned()
    }

    /// All stored objects, in namespace/name order.
    pub fn objects(&self) -> Vec<K> {
        self.lock().objects.values().cloned().collect()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    pub fn actions_for(&self, verb: Verb) -> Vec<Action> {
        self.lock().actions.iter().filter(|a| a.verb == verb).cloned().collect()
    }

    pub fn clear_actions(&self) {
        self.lock().actions.clear();
    }

    /// Makes the next `times` calls of `verb` fail with the produced error.
    pub fn inject_error<F>(&self, verb: Verb, times: usize, make: F)
    where
        F: Fn() -> ClientError + Send + Sync + 'static,
    {
        self.lock().reactors.push(Reactor { verb, remaining: times, make: Box::new(make) });
    }

    fn record(state: &mut FakeState<K>, verb: Verb, namespace: Option<&str>, name: &str) -> Result<(), ClientError> {
        state.actions.push(Action {
            verb,
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.to_string(),
        });
        if let Some(reactor) = state.reactors.iter_mut().find(|r| r.verb == verb && r.remaining > 0) {
            reactor.remaining -= 1;
            return Err((reactor.make)());
        }
        Ok(())
    }

    fn not_found(name: &str) -> ClientError {
        ClientError::NotFound { kind: Self::kind(), name: name.to_string() }
    }
}

#[async_trait]
impl<K> ResourceClient<K> for FakeClient<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, ClientError> {
        let mut state = self.lock();
        Self::record(&mut state, Verb::Get, namespace, name)?;
        state
            .objects
            .get(&Self::key(namespace, name))
            .cloned()
            .ok_or_else(|| Self::not_found(name))
    }

    async fn list(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<K>, ClientError> {
        let mut state = self.lock();
        Self::record(&mut state, Verb::List, namespace, "")?;
        let namespace = namespace.filter(|ns| !ns.is_empty());
        Ok(state
            .objects
            .iter()
            .filter(|((ns, _), _)| namespace.map_or(true, |wanted| wanted == ns))
            .filter(|(_, object)| selector.matches(object.labels()))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, object: &K) -> Result<K, ClientError> {
        let mut state = self.lock();
        let mut object = object.clone();
        let version = state.next_version;
        {
            let meta = object.meta_mut();
            if meta.name.as_deref().unwrap_or_default().is_empty() {
                match meta.generate_name.as_deref() {
                    Some(prefix) if !prefix.is_empty() => meta.name = Some(format!("{prefix}{version:05}")),
                    _ => {
                        return Err(ClientError::Invalid {
                            kind: Self::kind(),
                            message: "name or generateName is required".to_string(),
                        })
                    }
                }
            }
        }
        let namespace = object.namespace();
        let name = object.name_any();
        Self::record(&mut state, Verb::Create, namespace.as_deref(), &name)?;

        let key = Self::key(namespace.as_deref(), &name);
        if state.objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists { kind: Self::kind(), name });
        }
        state.next_version += 1;
        let meta = object.meta_mut();
        meta.resource_version = Some(version.to_string());
        meta.uid.get_or_insert_with(|| format!("uid-{version}"));
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update(&self, object: &K) -> Result<K, ClientError> {
        let mut state = self.lock();
        let namespace = object.namespace();
        let name = object.name_any();
        Self::record(&mut state, Verb::Update, namespace.as_deref(), &name)?;

        let key = Self::key(namespace.as_deref(), &name);
        let stored_version = match state.objects.get(&key) {
            Some(stored) => stored.meta().resource_version.clone(),
            None => return Err(Self::not_found(&name)),
        };
        let sent_version = object.meta().resource_version.clone();
        if sent_version.is_some() && sent_version != stored_version {
            return Err(ClientError::Conflict { kind: Self::kind(), name });
        }

        let version = state.next_version;
        state.next_version += 1;
        let mut object = object.clone();
        object.meta_mut().resource_version = Some(version.to_string());
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), ClientError> {
        let mut state = self.lock();
        Self::record(&mut state, Verb::Delete, namespace, name)?;
        state
            .objects
            .remove(&Self::key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(name))
    }
}

// --- Fake Clientset ---

/// A `Clientset` whose every client is a `FakeClient`, with typed handles kept
/// for seeding state and inspecting recorded actions.
#[derive(Default)]
pub struct FakeClientset {
    pub crtbs: Arc<FakeClient<ClusterRoleTemplateBinding>>,
    pub role_templates: Arc<FakeClient<RoleTemplate>>,
    pub clusters: Arc<FakeClient<Cluster>>,
    pub projects: Arc<FakeClient<Project>>,
    pub users: Arc<FakeClient<User>>,
    pub tokens: Arc<FakeClient<Token>>,
    pub cluster_roles: Arc<FakeClient<ClusterRole>>,
    pub cluster_role_bindings: Arc<FakeClient<ClusterRoleBinding>>,
    pub roles: Arc<FakeClient<Role>>,
    pub role_bindings: Arc<FakeClient<RoleBinding>>,
    pub secrets: Arc<FakeClient<Secret>>,
}

impl FakeClientset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clientset(&self) -> Clientset {
        Clientset {
            crtbs: self.crtbs.clone(),
            role_templates: self.role_templates.clone(),
            clusters: self.clusters.clone(),
            projects: self.projects.clone(),
            users: self.users.clone(),
            tokens: self.tokens.clone(),
            cluster_roles: self.cluster_roles.clone(),
            cluster_role_bindings: self.cluster_role_bindings.clone(),
            roles: self.roles.clone(),
            role_bindings: self.role_bindings.clone(),
            secrets: self.secrets.clone(),
        }
    }
}
