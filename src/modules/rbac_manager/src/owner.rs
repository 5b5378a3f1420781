/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/rbac_manager/src/owner.rs
*
* Binding-owner labels. Derived ClusterRoleBindings and RoleBindings are
* shared between bindings, so ownership is recorded as labels rather than
* owner references: each owning ClusterRoleTemplateBinding contributes one
* `<key>: <owner value>` label.
*
* Two generations of key exist. Legacy (v1) objects are keyed by the CRTB UID
* with the misspelled `memberhsip-binding-owner` value; current (v2) objects
* are keyed by `<namespace>_<name>`. Every object written by this crate is
* tagged with `OWNER_LABEL_SCHEMA: v2`; untagged objects read as v1.
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::api::ObjectMeta;
use management_api::safe_concat_name;
use std::collections::BTreeMap;

/// Legacy owner value. The misspelling is load-bearing: pre-existing objects
/// carry it.
pub const MEMBERSHIP_BINDING_OWNER_LEGACY: &str = "memberhsip-binding-owner";
pub const MEMBERSHIP_BINDING_OWNER: &str = "membership-binding-owner";
pub const CRTB_IN_PROJECT_BINDING_OWNER: &str = "crtb-in-project-binding-owner";
pub const PRTB_IN_CLUSTER_BINDING_OWNER: &str = "prtb-in-cluster-binding-owner";

/// Set on a derived object once a v2 key has been added to it.
pub const RTB_LABEL_UPDATED: &str = "auth.management.cattle.io/rtb-label-updated";
/// Set on the CRTB once all of its derived objects are migrated.
pub const RTB_CRB_RB_LABELS_UPDATED: &str = "auth.management.cattle.io/crb-rb-labels-updated";
pub const OWNER_LABEL_SCHEMA: &str = "auth.management.cattle.io/owner-label-schema";

const OWNER_VALUES: [&str; 4] = [
    MEMBERSHIP_BINDING_OWNER_LEGACY,
    MEMBERSHIP_BINDING_OWNER,
    CRTB_IN_PROJECT_BINDING_OWNER,
    PRTB_IN_CLUSTER_BINDING_OWNER,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelSchema {
    V1,
    V2,
}

impl LabelSchema {
    pub fn as_str(self) -> &'static str {
        match self {
            LabelSchema::V1 => "v1",
            LabelSchema::V2 => "v2",
        }
    }

    pub fn of(labels: &BTreeMap<String, String>) -> Self {
        match labels.get(OWNER_LABEL_SCHEMA).map(String::as_str) {
            Some("v2") => LabelSchema::V2,
            _ => LabelSchema::V1,
        }
    }
}

/// The v2 owner key of a binding: `<namespace>_<name>`, shortened to fit a
/// label key.
pub fn binding_key(meta: &ObjectMeta) -> String {
    safe_concat_name(&format!(
        "{}_{}",
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    ))
}

/// Records `key` as an owner and tags the object with the current schema.
pub fn stamp_owner(labels: &mut BTreeMap<String, String>, key: &str, value: &str) {
    labels.insert(key.to_string(), value.to_string());
    labels.insert(OWNER_LABEL_SCHEMA.to_string(), LabelSchema::V2.as_str().to_string());
}

/// Removes the owner labels of one binding (its v2 key and, if given, its
/// legacy UID key). Returns true when something was removed.
pub fn strip_owner(labels: &mut BTreeMap<String, String>, key: &str, legacy_key: Option<&str>) -> bool {
    let mut removed = labels.remove(key).is_some();
    if let Some(uid) = legacy_key.filter(|uid| !uid.is_empty()) {
        removed |= labels.remove(uid).is_some();
    }
    removed
}

/// True when any label still names an owning binding.
pub fn has_owner(labels: &BTreeMap<String, String>) -> bool {
    labels.values().any(|v| OWNER_VALUES.contains(&v.as_str()))
}
