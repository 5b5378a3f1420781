/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/management_api/src/v3.rs
*
* This file defines the management.cattle.io/v3 resources consumed by the auth
* controllers. By using the `kube::CustomResource` derive macro, each `*Spec`
* struct produces a strongly-typed top-level kind that works with `kube::Api`.
*
* - `ClusterRoleTemplateBinding` grants a role template to a subject at
*   cluster scope. It lives in the namespace named after its cluster.
* - `RoleTemplate` is a named, possibly inherited, bundle of policy rules.
* - `Cluster` and `Project` are looked up while synthesizing bindings.
* - `User` and `Token` back subject resolution and the user-activity store.
*
* `serde` attributes map idiomatic Rust `snake_case` to the platform's
* `camelCase` field names.
*
* SPDX-License-Identifier: Apache-2.0
*/

use chrono::{DateTime, Utc};
use k8s_openapi::api::rbac::v1 as rbac;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Role template context for cluster-level templates.
pub const CLUSTER_CONTEXT: &str = "cluster";
/// Role template context for project-level templates.
pub const PROJECT_CONTEXT: &str = "project";

// --- ClusterRoleTemplateBinding ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "ClusterRoleTemplateBinding",
    namespaced,
    shortname = "crtb",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleTemplateBindingSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_principal_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_principal_name: String,
    pub role_template_name: String,
    pub cluster_name: String,
}

// --- RoleTemplate ---

/// A policy rule as carried by a role template. Mirrors
/// `rbac.authorization.k8s.io/v1` `PolicyRule`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRule {
    #[serde(default)]
    pub api_groups: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    #[serde(default)]
    pub verbs: Vec<String>,
}

impl From<&TemplateRule> for rbac::PolicyRule {
    fn from(rule: &TemplateRule) -> Self {
        rbac::PolicyRule {
            api_groups: Some(rule.api_groups.clone()),
            resources: Some(rule.resources.clone()),
            resource_names: (!rule.resource_names.is_empty()).then(|| rule.resource_names.clone()),
            verbs: rule.verbs.clone(),
            ..Default::default()
        }
    }
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "RoleTemplate",
    shortname = "rt",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct RoleTemplateSpec {
    #[serde(default)]
    pub display_name: String,
    /// Either `cluster` or `project`.
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub builtin: bool,
    /// Templates whose rules this template inherits.
    #[serde(default)]
    pub role_template_names: Vec<String>,
    #[serde(default)]
    pub rules: Vec<TemplateRule>,
}

// --- Cluster & Project ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "Cluster",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub display_name: String,
}

/// A project lives in its cluster's namespace; its own workload namespace in
/// the management cluster carries the project's name.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "Project",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    pub cluster_name: String,
    #[serde(default)]
    pub display_name: String,
}

// --- User & Token ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "User",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub principal_ids: Vec<String>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "Token",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct TokenSpec {
    pub user_id: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub ttl_millis: i64,
    #[serde(default)]
    pub enabled: bool,
    /// Moment the session is considered idle unless refreshed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_idle_timeout: Option<DateTime<Utc>>,
}
