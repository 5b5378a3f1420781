/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/management_api/src/clientset.rs
*
* One typed client per resource kind the auth controllers and stores touch.
* Production code builds it from a `kube::Client`; tests build it from
* `crate::fake::FakeClientset`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::client::{KubeResourceClient, ResourceClient};
use crate::v3::{Cluster, ClusterRoleTemplateBinding, Project, RoleTemplate, Token, User};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::Client;
use std::sync::Arc;

#[derive(Clone)]
pub struct Clientset {
    pub crtbs: Arc<dyn ResourceClient<ClusterRoleTemplateBinding>>,
    pub role_templates: Arc<dyn ResourceClient<RoleTemplate>>,
    pub clusters: Arc<dyn ResourceClient<Cluster>>,
    pub projects: Arc<dyn ResourceClient<Project>>,
    pub users: Arc<dyn ResourceClient<User>>,
    pub tokens: Arc<dyn ResourceClient<Token>>,
    pub cluster_roles: Arc<dyn ResourceClient<ClusterRole>>,
    pub cluster_role_bindings: Arc<dyn ResourceClient<ClusterRoleBinding>>,
    pub roles: Arc<dyn ResourceClient<Role>>,
    pub role_bindings: Arc<dyn ResourceClient<RoleBinding>>,
    pub secrets: Arc<dyn ResourceClient<Secret>>,
}

impl Clientset {
    pub fn from_client(client: Client) -> Self {
        Self {
            crtbs: Arc::new(KubeResourceClient::namespaced(client.clone())),
            role_templates: Arc::new(KubeResourceClient::cluster_scoped(client.clone())),
            clusters: Arc::new(KubeResourceClient::cluster_scoped(client.clone())),
            projects: Arc::new(KubeResourceClient::namespaced(client.clone())),
            users: Arc::new(KubeResourceClient::cluster_scoped(client.clone())),
            tokens: Arc::new(KubeResourceClient::cluster_scoped(client.clone())),
            cluster_roles: Arc::new(KubeResourceClient::cluster_scoped(client.clone())),
            cluster_role_bindings: Arc::new(KubeResourceClient::cluster_scoped(client.clone())),
            roles: Arc::new(KubeResourceClient::namespaced(client.clone())),
            role_bindings: Arc::new(KubeResourceClient::namespaced(client.clone())),
            secrets: Arc::new(KubeResourceClient::namespaced(client)),
        }
    }
}
