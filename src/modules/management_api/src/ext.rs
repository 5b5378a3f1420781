/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/management_api/src/ext.rs
*
* ext.cattle.io/v1 resources. These are not stored in etcd: the ext API server
* serves them from stores layered over existing state (tokens and secrets).
* They are still declared through `kube::CustomResource` so they carry proper
* `apiVersion`/`kind`/`metadata` and serialize exactly like any other object.
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "ext.cattle.io";
pub const VERSION: &str = "v1";

// --- UserActivity ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "ext.cattle.io",
    version = "v1",
    kind = "UserActivity",
    status = "UserActivityStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct UserActivitySpec {
    #[serde(default)]
    pub token_id: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserActivityStatus {
    /// RFC 3339 time of the last recorded activity.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_activity: String,
    /// RFC 3339 time at which the session goes idle.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_timeout: String,
}

// --- RancherToken ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "ext.cattle.io",
    version = "v1",
    kind = "RancherToken",
    plural = "ranchertokens",
    namespaced,
    status = "RancherTokenStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct RancherTokenSpec {
    #[serde(rename = "userID", default)]
    pub user_id: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub ttl: String,
    #[serde(default)]
    pub enabled: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RancherTokenStatus {
    /// Only ever populated in the response to a create.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plaintext_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hashed_token: String,
}
