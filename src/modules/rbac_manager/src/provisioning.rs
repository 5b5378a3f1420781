/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/rbac_manager/src/provisioning.rs
*
* Grants written by the provisioning controllers. Those RoleBindings are
* applied as an object set: they carry a hash label identifying the set and
* annotations naming the object that owns it. Removing a binding removes the
* RoleBindings of its set.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::Error;
use kube::{Resource, ResourceExt};
use management_api::v3::ClusterRoleTemplateBinding;
use management_api::{Clientset, Selector};
use sha2::{Digest, Sha256};
use tracing::info;

pub const CRTB_ROLE_BINDING_SET_ID: &str = "auth-prov-v2-crtb-rolebinding";

pub const OBJECT_SET_HASH_LABEL: &str = "objectset.rio.cattle.io/hash";
pub const OWNER_NAME_ANNOTATION: &str = "objectset.rio.cattle.io/owner-name";
pub const OWNER_NAMESPACE_ANNOTATION: &str = "objectset.rio.cattle.io/owner-namespace";
pub const OWNER_GVK_ANNOTATION: &str = "objectset.rio.cattle.io/owner-gvk";

/// `group/version, Kind=<kind>` of a binding, as written in the owner
/// annotation.
pub fn owner_gvk() -> String {
    format!(
        "{}, Kind={}",
        ClusterRoleTemplateBinding::api_version(&()),
        ClusterRoleTemplateBinding::kind(&())
    )
}

/// Label value identifying the object set `set_id` applied for `owner`.
pub fn object_set_hash(set_id: &str, owner: &ClusterRoleTemplateBinding) -> String {
    let input = format!(
        "{}/{}/{}/{}",
        set_id,
        owner_gvk(),
        owner.namespace().unwrap_or_default(),
        owner.name_any()
    );
    hex::encode(&Sha256::digest(input.as_bytes())[..20])
}

/// Deletes every RoleBinding of the set `set_id` applied for `owner`.
pub async fn remove_auth_v2_permissions(
    clients: &Clientset,
    set_id: &str,
    owner: &ClusterRoleTemplateBinding,
) -> Result<(), Error> {
    let selector = Selector::from_set([(OBJECT_SET_HASH_LABEL, object_set_hash(set_id, owner))]);
    let owner_namespace = owner.namespace().unwrap_or_default();
    let owner_name = owner.name_any();
    let gvk = owner_gvk();

    for binding in clients.role_bindings.list(None, &selector).await? {
        let annotations = binding.annotations();
        let owned = annotations.get(OWNER_NAME_ANNOTATION) == Some(&owner_name)
            && annotations.get(OWNER_NAMESPACE_ANNOTATION) == Some(&owner_namespace)
            && annotations.get(OWNER_GVK_ANNOTATION).map_or(true, |g| *g == gvk);
        if !owned {
            continue;
        }
        let namespace = binding.namespace().unwrap_or_default();
        let name = binding.name_any();
        info!(namespace = %namespace, binding = %name, owner = %owner_name, "Deleting provisioning role binding");
        match clients.role_bindings.delete(Some(&namespace), &name).await {
            Err(e) if !e.is_not_found() => return Err(e.into()),
            _ => {}
        }
    }
    Ok(())
}
