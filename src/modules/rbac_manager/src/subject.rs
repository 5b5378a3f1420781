/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/rbac_manager/src/subject.rs
*
* Subject resolution. A ClusterRoleTemplateBinding names its subject by user
* name, user principal, group name or group principal. Before any RBAC object
* is written, the user forms are completed (name from principal or principal
* from name) and the binding is turned into exactly one `rbac/v1 Subject`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::Error;
use crate::users::UserManager;
use k8s_openapi::api::rbac::v1 as rbac;
use kube::ResourceExt;
use management_api::v3::{ClusterRoleTemplateBinding, User};
use management_api::ResourceClient;
use std::sync::Arc;
use tracing::debug;

pub const PRINCIPAL_DISPLAY_NAME_ANNOTATION: &str = "auth.cattle.io/principal-display-name";

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

pub struct SubjectResolver {
    users: Arc<dyn ResourceClient<User>>,
    user_manager: Arc<dyn UserManager>,
}

impl SubjectResolver {
    pub fn new(users: Arc<dyn ResourceClient<User>>, user_manager: Arc<dyn UserManager>) -> Self {
        Self { users, user_manager }
    }

    /// Fills in whichever half of the user subject is missing.
    ///
    /// Group subjects and fully specified users are returned untouched.
    pub async fn resolve(&self, mut binding: ClusterRoleTemplateBinding) -> Result<ClusterRoleTemplateBinding, Error> {
        let spec = &binding.spec;
        if !spec.group_name.is_empty()
            || !spec.group_principal_name.is_empty()
            || (!spec.user_principal_name.is_empty() && !spec.user_name.is_empty())
        {
            return Ok(binding);
        }

        if !spec.user_principal_name.is_empty() {
            let display_name = binding
                .annotations()
                .get(PRINCIPAL_DISPLAY_NAME_ANNOTATION)
                .cloned()
                .unwrap_or_default();
            let user = self
                .user_manager
                .ensure_user(&binding.spec.user_principal_name, &display_name)
                .await?;
            binding.spec.user_name = user.name_any();
            debug!(binding = %binding.name_any(), user = %binding.spec.user_name, "Resolved user from principal");
            return Ok(binding);
        }

        if !spec.user_name.is_empty() {
            let user = self.users.get(None, &binding.spec.user_name).await?;
            if let Some(principal) = user
                .spec
                .principal_ids
                .iter()
                .find(|p| p.ends_with(binding.spec.user_name.as_str()))
            {
                binding.spec.user_principal_name = principal.clone();
            }
            return Ok(binding);
        }

        Err(Error::MissingSubject(binding.name_any()))
    }
}

/// The single RBAC subject a resolved binding grants to.
pub fn build_subject(binding: &ClusterRoleTemplateBinding) -> Result<rbac::Subject, Error> {
    let spec = &binding.spec;
    let has_group_name = !spec.group_name.is_empty();
    let has_group_principal = !spec.group_principal_name.is_empty();

    if !spec.user_name.is_empty() {
        if has_group_name || has_group_principal {
            return Err(Error::AmbiguousSubject(binding.name_any(), "both a user and a group are set"));
        }
        return Ok(subject("User", &spec.user_name));
    }
    match (has_group_name, has_group_principal) {
        (true, true) => Err(Error::AmbiguousSubject(
            binding.name_any(),
            "both a group name and a group principal are set",
        )),
        (false, true) => Ok(subject("Group", &spec.group_principal_name)),
        (true, false) => Ok(subject("Group", &spec.group_name)),
        (false, false) => Err(Error::MissingSubject(binding.name_any())),
    }
}

fn subject(kind: &str, name: &str) -> rbac::Subject {
    rbac::Subject {
        kind: kind.to_string(),
        name: name.to_string(),
        api_group: Some(RBAC_API_GROUP.to_string()),
        namespace: None,
    }
}
