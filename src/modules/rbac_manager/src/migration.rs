/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/rbac_manager/src/migration.rs
*
* Owner label migration. Bindings created by older releases are owned through
* the CRTB UID. Before a CRTB is reconciled on update, its v2 key is added to
* each of those objects next to the legacy label, and once every object has
* been migrated the CRTB is marked so later updates skip the scan.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::Error;
use crate::owner::{
    self, CRTB_IN_PROJECT_BINDING_OWNER, MEMBERSHIP_BINDING_OWNER, MEMBERSHIP_BINDING_OWNER_LEGACY,
    RTB_CRB_RB_LABELS_UPDATED, RTB_LABEL_UPDATED,
};
use kube::ResourceExt;
use management_api::v3::ClusterRoleTemplateBinding;
use management_api::{retry_on_conflict, Backoff, ClientError, Clientset, Requirement, Selector};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Result of a label migration pass.
#[derive(Debug)]
pub struct Migration {
    /// The stored binding, carrying the sentinel label when migration ran.
    pub binding: ClusterRoleTemplateBinding,
    /// Number of derived objects that received a v2 key.
    pub relabeled: usize,
}

fn mark(labels: &mut BTreeMap<String, String>, key: &str, value: &str) {
    owner::stamp_owner(labels, key, value);
    labels.insert(RTB_LABEL_UPDATED.to_string(), "true".to_string());
}

/// Adds the v2 owner key to every derived object still owned only through
/// the legacy UID label. Errors are collected across all objects; the CRTB
/// is marked as migrated only when there were none.
pub async fn reconcile_labels(clients: &Clientset, binding: &ClusterRoleTemplateBinding) -> Result<Migration, Error> {
    if binding.labels().get(RTB_CRB_RB_LABELS_UPDATED).map(String::as_str) == Some("true") {
        return Ok(Migration { binding: binding.clone(), relabeled: 0 });
    }

    let key = owner::binding_key(&binding.metadata);
    let uid = binding.uid().unwrap_or_default();
    let mut errors = Vec::new();
    let mut relabeled = 0;

    let selector = Selector::from_set([(uid.as_str(), MEMBERSHIP_BINDING_OWNER_LEGACY)])
        .add(Requirement::does_not_exist(key.as_str()));
    for crb in clients.cluster_role_bindings.list(None, &selector).await? {
        let name = crb.name_any();
        let result = retry_on_conflict(Backoff::default(), || async {
            let mut current = clients.cluster_role_bindings.get(None, &name).await?;
            mark(current.labels_mut(), &key, MEMBERSHIP_BINDING_OWNER);
            clients.cluster_role_bindings.update(&current).await.map(|_| ())
        })
        .await;
        tally(result, &mut relabeled, &mut errors, &name);
    }

    let selector = Selector::from_set([(uid.as_str(), CRTB_IN_PROJECT_BINDING_OWNER)])
        .add(Requirement::does_not_exist(key.as_str()));
    for rb in clients.role_bindings.list(None, &selector).await? {
        let namespace = rb.namespace().unwrap_or_default();
        let name = rb.name_any();
        let result = retry_on_conflict(Backoff::default(), || async {
            let mut current = clients.role_bindings.get(Some(&namespace), &name).await?;
            mark(current.labels_mut(), &key, CRTB_IN_PROJECT_BINDING_OWNER);
            clients.role_bindings.update(&current).await.map(|_| ())
        })
        .await;
        tally(result, &mut relabeled, &mut errors, &name);
    }

    Error::aggregate(errors)?;

    let namespace = binding.namespace().unwrap_or_default();
    let crtb_name = binding.name_any();
    let stored = retry_on_conflict(Backoff::default(), || async {
        let mut current = clients.crtbs.get(Some(&namespace), &crtb_name).await?;
        current
            .labels_mut()
            .insert(RTB_CRB_RB_LABELS_UPDATED.to_string(), "true".to_string());
        clients.crtbs.update(&current).await
    })
    .await?;

    info!(binding = %crtb_name, namespace = %namespace, relabeled, "Migrated binding owner labels");
    Ok(Migration { binding: stored, relabeled })
}

fn tally(result: Result<(), ClientError>, relabeled: &mut usize, errors: &mut Vec<Error>, name: &str) {
    match result {
        Ok(()) => *relabeled += 1,
        Err(e) => {
            warn!(object = name, error = %e, "Failed to migrate owner labels");
            errors.push(e.into());
        }
    }
}
