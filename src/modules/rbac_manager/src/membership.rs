/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/rbac_manager/src/membership.rs
*
* Cluster membership. Every subject bound to a cluster gets a ClusterRole
* `<cluster>-clusterowner` or `<cluster>-clustermember` that exposes the
* Cluster object itself, and a ClusterRoleBinding granting it.
*
* The ClusterRoleBinding is named after the role and a digest of the subject,
* so every binding that grants the same subject the same role converges on
* one object and records itself there as an owner label.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::Error;
use crate::owner::{self, MEMBERSHIP_BINDING_OWNER, MEMBERSHIP_BINDING_OWNER_LEGACY};
use k8s_openapi::api::rbac::v1 as rbac;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use management_api::v3::Cluster;
use management_api::{retry_on_conflict, Backoff, ClientError, Clientset, Selector};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

const MANAGEMENT_GROUP: &str = "management.cattle.io";

/// Name of the membership role for a cluster.
pub fn cluster_role_name(cluster: &str, owner: bool) -> String {
    let suffix = if owner { "clusterowner" } else { "clustermember" };
    format!("{cluster}-{suffix}").to_lowercase()
}

/// Deterministic ClusterRoleBinding name for `role` granted to `subject`.
pub fn membership_binding_name(role: &str, subject: &rbac::Subject) -> String {
    let digest = Sha256::digest(format!("{}:{}", subject.kind, subject.name).as_bytes());
    management_api::safe_concat_name(&format!("{role}-{}", &hex::encode(digest)[..10]))
}

fn grants_same(binding: &rbac::ClusterRoleBinding, role: &str, subject: &rbac::Subject) -> bool {
    binding.role_ref.name == role
        && binding
            .subjects
            .as_deref()
            .is_some_and(|s| s.len() == 1 && s[0].kind == subject.kind && s[0].name == subject.name)
}

/// The membership binding granting `role` to `subject`, if one exists.
/// Bindings created under another name (legacy or migrated ones) are reused
/// as long as they carry a membership owner label; one already owned by `key`
/// wins, then the deterministic name.
async fn find_membership_binding(
    clients: &Clientset,
    name: &str,
    key: &str,
    role: &str,
    subject: &rbac::Subject,
) -> Result<Option<rbac::ClusterRoleBinding>, ClientError> {
    let mut candidates: Vec<_> = clients
        .cluster_role_bindings
        .list(None, &Selector::everything())
        .await?
        .into_iter()
        .filter(|b| grants_same(b, role, subject))
        .filter(|b| b.name_any() == name || owner::has_owner(b.labels()))
        .collect();
    candidates.sort_by_key(|b| (!b.labels().contains_key(key), b.name_any() != name, b.name_any()));
    Ok(candidates.into_iter().next())
}

async fn ensure_cluster_role(clients: &Clientset, role: &str, cluster: &Cluster, owner: bool) -> Result<(), Error> {
    let verbs = if owner { vec!["*".to_string()] } else { vec!["get".to_string()] };
    let rules = vec![rbac::PolicyRule {
        api_groups: Some(vec![MANAGEMENT_GROUP.to_string()]),
        resources: Some(vec!["clusters".to_string()]),
        resource_names: Some(vec![cluster.name_any()]),
        verbs,
        ..Default::default()
    }];

    match clients.cluster_roles.get(None, role).await {
        Ok(existing) if existing.rules.as_ref() == Some(&rules) => Ok(()),
        Ok(mut existing) => {
            info!(role, "Updating cluster membership role rules");
            existing.rules = Some(rules);
            clients.cluster_roles.update(&existing).await?;
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            info!(role, cluster = %cluster.name_any(), "Creating cluster membership role");
            let owner_ref = cluster_owner_reference(cluster);
            let cluster_role = rbac::ClusterRole {
                metadata: ObjectMeta {
                    name: Some(role.to_string()),
                    owner_references: owner_ref.map(|r| vec![r]),
                    ..Default::default()
                },
                rules: Some(rules),
                ..Default::default()
            };
            match clients.cluster_roles.create(&cluster_role).await {
                Err(e) if !e.is_already_exists() => Err(e.into()),
                _ => Ok(()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn cluster_owner_reference(cluster: &Cluster) -> Option<OwnerReference> {
    let uid = cluster.uid()?;
    Some(OwnerReference {
        api_version: Cluster::api_version(&()).into_owned(),
        kind: Cluster::kind(&()).into_owned(),
        name: cluster.name_any(),
        uid,
        ..Default::default()
    })
}

/// Ensures `subject` is bound to the membership role of `cluster` and that
/// the binding identified by `(key, uid)` owns exactly that one membership
/// binding.
pub async fn ensure_cluster_membership_binding(
    clients: &Clientset,
    role: &str,
    (key, uid): (&str, Option<&str>),
    cluster: &Cluster,
    owner: bool,
    subject: &rbac::Subject,
) -> Result<(), Error> {
    ensure_cluster_role(clients, role, cluster, owner).await?;

    let name = membership_binding_name(role, subject);
    retry_on_conflict(Backoff::default(), || async {
        match find_membership_binding(clients, &name, key, role, subject).await? {
            Some(existing) if existing.labels().get(key).map(String::as_str) == Some(MEMBERSHIP_BINDING_OWNER) => Ok(()),
            Some(mut existing) => {
                debug!(binding = %existing.name_any(), role, subject = %subject.name, "Joining existing membership binding");
                owner::stamp_owner(existing.labels_mut(), key, MEMBERSHIP_BINDING_OWNER);
                clients.cluster_role_bindings.update(&existing).await.map(|_| ())
            }
            None => {
                info!(binding = %name, role, subject = %subject.name, "Creating cluster membership binding");
                let mut labels = BTreeMap::new();
                owner::stamp_owner(&mut labels, key, MEMBERSHIP_BINDING_OWNER);
                let binding = rbac::ClusterRoleBinding {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        labels: Some(labels),
                        ..Default::default()
                    },
                    role_ref: rbac::RoleRef {
                        api_group: "rbac.authorization.k8s.io".to_string(),
                        kind: "ClusterRole".to_string(),
                        name: role.to_string(),
                    },
                    subjects: Some(vec![subject.clone()]),
                };
                clients.cluster_role_bindings.create(&binding).await.map(|_| ())
            }
        }
    })
    .await?;

    // A changed role or subject leaves the key on an older binding.
    release_membership_bindings(clients, key, uid, Some((role, subject))).await
}

/// Strips `key` (and the legacy `uid` key) from every membership
/// ClusterRoleBinding it labels, except the one granting `keep`. Bindings
/// left without any owner are deleted.
pub async fn release_membership_bindings(
    clients: &Clientset,
    key: &str,
    uid: Option<&str>,
    keep: Option<(&str, &rbac::Subject)>,
) -> Result<(), Error> {
    let mut owned = BTreeMap::new();
    let mut selectors = vec![Selector::from_set([(key, MEMBERSHIP_BINDING_OWNER)])];
    if let Some(uid) = uid.filter(|u| !u.is_empty()) {
        selectors.push(Selector::from_set([(uid, MEMBERSHIP_BINDING_OWNER_LEGACY)]));
    }
    for selector in &selectors {
        for binding in clients.cluster_role_bindings.list(None, selector).await? {
            owned.insert(binding.name_any(), binding);
        }
    }

    let mut errors = Vec::new();
    for (name, binding) in owned {
        if keep.is_some_and(|(role, subject)| grants_same(&binding, role, subject)) {
            continue;
        }
        if let Err(e) = release_one(clients, &name, key, uid).await {
            errors.push(e);
        }
    }
    Error::aggregate(errors)
}

async fn release_one(clients: &Clientset, name: &str, key: &str, uid: Option<&str>) -> Result<(), Error> {
    retry_on_conflict(Backoff::default(), || async {
        let mut binding = match clients.cluster_role_bindings.get(None, name).await {
            Ok(binding) => binding,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if !owner::strip_owner(binding.labels_mut(), key, uid) {
            return Ok(());
        }
        if owner::has_owner(binding.labels()) {
            debug!(binding = name, key, "Releasing shared membership binding");
            clients.cluster_role_bindings.update(&binding).await.map(|_| ())
        } else {
            info!(binding = name, key, "Deleting membership binding with no remaining owner");
            match clients.cluster_role_bindings.delete(None, name).await {
                Err(e) if !e.is_not_found() => Err(e),
                _ => Ok(()),
            }
        }
    })
    .await
    .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use management_api::v3::ClusterSpec;
    use management_api::FakeClientset;

    fn user(name: &str) -> rbac::Subject {
        rbac::Subject {
            kind: "User".into(),
            name: name.into(),
            api_group: Some("rbac.authorization.k8s.io".into()),
            namespace: None,
        }
    }

    #[test]
    fn role_names_are_lowercase() {
        assert_eq!(cluster_role_name("C-1", true), "c-1-clusterowner");
        assert_eq!(cluster_role_name("c-1", false), "c-1-clustermember");
    }

    #[tokio::test]
    async fn shared_binding_collects_owners() {
        let fakes = FakeClientset::new();
        let clients = fakes.clientset();
        let cluster = fakes.clusters.seed(Cluster::new("c-1", ClusterSpec::default()));
        let alice = user("alice");

        for key in ["c-1_crtb-a", "c-1_crtb-b"] {
            ensure_cluster_membership_binding(&clients, "c-1-clustermember", (key, None), &cluster, false, &alice)
                .await
                .unwrap();
        }

        let bindings = fakes.cluster_role_bindings.objects();
        assert_eq!(bindings.len(), 1);
        let labels = bindings[0].labels();
        assert_eq!(labels["c-1_crtb-a"], MEMBERSHIP_BINDING_OWNER);
        assert_eq!(labels["c-1_crtb-b"], MEMBERSHIP_BINDING_OWNER);

        let role = fakes.cluster_roles.peek(None, "c-1-clustermember").unwrap();
        let rules = role.rules.clone().unwrap();
        let rule = &rules[0];
        assert_eq!(rule.verbs, ["get"]);
        assert_eq!(rule.resource_names.as_deref(), Some(&["c-1".to_string()][..]));
        assert_eq!(role.metadata.owner_references.unwrap()[0].name, "c-1");

        release_membership_bindings(&clients, "c-1_crtb-a", None, None).await.unwrap();
        let remaining = fakes.cluster_role_bindings.objects();
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].labels().contains_key("c-1_crtb-a"));

        release_membership_bindings(&clients, "c-1_crtb-b", None, None).await.unwrap();
        assert!(fakes.cluster_role_bindings.objects().is_empty());
    }

    #[tokio::test]
    async fn existing_grant_under_another_name_is_joined() {
        let fakes = FakeClientset::new();
        let clients = fakes.clientset();
        let cluster = fakes.clusters.seed(Cluster::new("c-1", ClusterSpec::default()));
        let alice = user("alice");
        fakes.cluster_role_bindings.seed(rbac::ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some("clusterrolebinding-abcde".into()),
                labels: Some(BTreeMap::from([("c-1_crtb-b".to_string(), MEMBERSHIP_BINDING_OWNER.to_string())])),
                ..Default::default()
            },
            role_ref: rbac::RoleRef {
                api_group: "rbac.authorization.k8s.io".into(),
                kind: "ClusterRole".into(),
                name: "c-1-clustermember".into(),
            },
            subjects: Some(vec![alice.clone()]),
        });

        ensure_cluster_membership_binding(&clients, "c-1-clustermember", ("c-1_crtb-a", None), &cluster, false, &alice)
            .await
            .unwrap();

        let bindings = fakes.cluster_role_bindings.objects();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].name_any(), "clusterrolebinding-abcde");
        assert_eq!(bindings[0].labels()["c-1_crtb-a"], MEMBERSHIP_BINDING_OWNER);
        assert_eq!(bindings[0].labels()["c-1_crtb-b"], MEMBERSHIP_BINDING_OWNER);
    }

    #[tokio::test]
    async fn role_change_moves_ownership() {
        let fakes = FakeClientset::new();
        let clients = fakes.clientset();
        let cluster = fakes.clusters.seed(Cluster::new("c-1", ClusterSpec::default()));
        let alice = user("alice");

        ensure_cluster_membership_binding(&clients, "c-1-clustermember", ("c-1_crtb-a", None), &cluster, false, &alice)
            .await
            .unwrap();
        ensure_cluster_membership_binding(&clients, "c-1-clusterowner", ("c-1_crtb-a", None), &cluster, true, &alice)
            .await
            .unwrap();

        let bindings = fakes.cluster_role_bindings.objects();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].role_ref.name, "c-1-clusterowner");
    }
}
