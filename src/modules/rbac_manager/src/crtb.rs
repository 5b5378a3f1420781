/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/rbac_manager/src/crtb.rs
*
* ClusterRoleTemplateBinding lifecycle hooks.
*
* On create and update a binding is translated into native RBAC:
* - the subject gets read access (member) or full access (owner) to its
*   Cluster object through a membership ClusterRoleBinding;
* - rules of the role template on cluster-scoped management-plane resources
*   are enforced in the cluster's namespace;
* - the project-scoped part of those rules is replicated into the namespace
*   of every project of the cluster.
*
* On remove everything the binding owns is released or deleted. Every hook
* can be repeated safely.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::Error;
use crate::membership::{cluster_role_name, ensure_cluster_membership_binding, release_membership_bindings};
use crate::migration::reconcile_labels;
use crate::owner::{self, CRTB_IN_PROJECT_BINDING_OWNER, MEMBERSHIP_BINDING_OWNER};
use crate::privileges::{
    grant_management_plane_privileges, remove_owned_role_bindings, PrivilegeScope,
    CLUSTER_MANAGEMENT_PLANE_RESOURCES, PROJECT_MANAGEMENT_PLANE_RESOURCES,
};
use crate::provisioning::{remove_auth_v2_permissions, CRTB_ROLE_BINDING_SET_ID};
use crate::roles::{gather_roles, is_owner_role};
use crate::subject::{build_subject, SubjectResolver};
use crate::users::UserManager;
use kube::ResourceExt;
use management_api::v3::{ClusterRoleTemplateBinding, CLUSTER_CONTEXT};
use management_api::{Clientset, Selector};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a create or update hook.
#[derive(Debug)]
pub struct Reconciled {
    /// The binding with its subject resolved. Its metadata is the latest
    /// stored version when the update hook wrote to it.
    pub binding: ClusterRoleTemplateBinding,
    /// Derived objects that received a v2 owner key during this call.
    pub relabeled: usize,
}

pub struct CrtbLifecycle {
    clients: Clientset,
    resolver: SubjectResolver,
}

impl CrtbLifecycle {
    pub fn new(clients: Clientset, user_manager: Arc<dyn UserManager>) -> Self {
        let resolver = SubjectResolver::new(clients.users.clone(), user_manager);
        Self { clients, resolver }
    }

    pub async fn create(&self, binding: ClusterRoleTemplateBinding) -> Result<Reconciled, Error> {
        let binding = self.resolver.resolve(binding).await?;
        self.reconcile_bindings(&binding).await?;
        Ok(Reconciled { binding, relabeled: 0 })
    }

    pub async fn updated(&self, binding: ClusterRoleTemplateBinding) -> Result<Reconciled, Error> {
        let mut binding = self.resolver.resolve(binding).await?;
        let migration = reconcile_labels(&self.clients, &binding).await?;
        binding.metadata = migration.binding.metadata;
        self.reconcile_bindings(&binding).await?;
        Ok(Reconciled { binding, relabeled: migration.relabeled })
    }

    pub async fn remove(&self, binding: &ClusterRoleTemplateBinding) -> Result<(), Error> {
        let key = owner::binding_key(&binding.metadata);
        let namespace = binding.namespace().unwrap_or_default();
        let uid = binding.uid();

        release_membership_bindings(&self.clients, &key, uid.as_deref(), None).await?;
        remove_owned_role_bindings(&self.clients, &namespace, &key, MEMBERSHIP_BINDING_OWNER).await?;

        let projects = self.clients.projects.list(Some(&namespace), &Selector::everything()).await?;
        for project in projects {
            let project_namespace = project.name_any();
            remove_owned_role_bindings(&self.clients, &project_namespace, &key, CRTB_IN_PROJECT_BINDING_OWNER).await?;
        }

        remove_auth_v2_permissions(&self.clients, CRTB_ROLE_BINDING_SET_ID, binding).await?;
        info!(binding = %binding.name_any(), namespace = %namespace, "Removed binding privileges");
        Ok(())
    }

    async fn reconcile_bindings(&self, binding: &ClusterRoleTemplateBinding) -> Result<(), Error> {
        let spec = &binding.spec;
        if spec.user_name.is_empty() && spec.group_principal_name.is_empty() && spec.group_name.is_empty() {
            return Ok(());
        }

        let cluster = match self.clients.clusters.get(None, &spec.cluster_name).await {
            Ok(cluster) => cluster,
            Err(e) if e.is_not_found() => return Err(Error::ClusterNotFound(spec.cluster_name.clone())),
            Err(e) => return Err(e.into()),
        };

        // Both walks run before any write: a dangling reference anywhere in
        // the inheritance tree skips the whole binding.
        let role_templates = self.clients.role_templates.as_ref();
        let walked = async {
            let is_owner = is_owner_role(role_templates, &spec.role_template_name, CLUSTER_CONTEXT).await?;
            let templates = gather_roles(role_templates, &spec.role_template_name).await?;
            Ok::<_, Error>((is_owner, templates))
        }
        .await;
        let (is_owner, templates) = match walked {
            Ok(walked) => walked,
            Err(e) if e.is_not_found() => {
                warn!(
                    binding = %binding.name_any(),
                    role_template = %spec.role_template_name,
                    error = %e,
                    "ClusterRoleTemplateBinding references a non-existing role template, skipping"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let role = cluster_role_name(&spec.cluster_name, is_owner);
        let subject = build_subject(binding)?;
        let key = owner::binding_key(&binding.metadata);
        let uid = binding.uid();
        ensure_cluster_membership_binding(&self.clients, &role, (&key, uid.as_deref()), &cluster, is_owner, &subject)
            .await?;

        let namespace = binding.namespace().unwrap_or_default();
        let cluster_scope = PrivilegeScope {
            namespace: &namespace,
            resources: CLUSTER_MANAGEMENT_PLANE_RESOURCES,
            owner_value: MEMBERSHIP_BINDING_OWNER,
        };
        grant_management_plane_privileges(&self.clients, &templates, binding, &subject, cluster_scope).await?;

        let mut errors = Vec::new();
        for project in self.clients.projects.list(Some(&namespace), &Selector::everything()).await? {
            let project_namespace = project.name_any();
            if project.metadata.deletion_timestamp.is_some() {
                warn!(project = %project_namespace, "Project is being deleted, not creating membership bindings");
                continue;
            }
            let scope = PrivilegeScope {
                namespace: &project_namespace,
                resources: PROJECT_MANAGEMENT_PLANE_RESOURCES,
                owner_value: CRTB_IN_PROJECT_BINDING_OWNER,
            };
            if let Err(e) = grant_management_plane_privileges(&self.clients, &templates, binding, &subject, scope).await {
                warn!(project = %project_namespace, error = %e, "Failed to grant project privileges");
                errors.push(e);
            }
        }
        Error::aggregate(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::ClientUserManager;
    use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
    use kube::api::ObjectMeta;
    use management_api::v3::{
        Cluster, ClusterRoleTemplateBindingSpec, ClusterSpec, Project, RoleTemplate, RoleTemplateSpec, TemplateRule,
    };
    use management_api::{ClientError, FakeClientset, Verb};
    use std::collections::BTreeMap;

    fn lifecycle(fakes: &FakeClientset) -> CrtbLifecycle {
        let clients = fakes.clientset();
        let users = Arc::new(ClientUserManager::new(clients.users.clone()));
        CrtbLifecycle::new(clients, users)
    }

    fn crtb(name: &str, user: &str, template: &str) -> ClusterRoleTemplateBinding {
        let mut b = ClusterRoleTemplateBinding::new(
            name,
            ClusterRoleTemplateBindingSpec {
                user_name: user.into(),
                user_principal_name: format!("local://{user}"),
                role_template_name: template.into(),
                cluster_name: "c-1".into(),
                ..Default::default()
            },
        );
        b.metadata.namespace = Some("c-1".into());
        b
    }

    fn project(name: &str, deleting: bool) -> Project {
        let mut value = serde_json::json!({
            "apiVersion": "management.cattle.io/v3",
            "kind": "Project",
            "metadata": { "name": name, "namespace": "c-1" },
            "spec": { "clusterName": "c-1" }
        });
        if deleting {
            value["metadata"]["deletionTimestamp"] = serde_json::json!("2025-01-01T00:00:00Z");
        }
        serde_json::from_value(value).unwrap()
    }

    fn seed(fakes: &FakeClientset) {
        fakes.clusters.seed(Cluster::new("c-1", ClusterSpec::default()));
        fakes.role_templates.seed(RoleTemplate::new(
            "cluster-owner",
            RoleTemplateSpec {
                context: CLUSTER_CONTEXT.into(),
                builtin: true,
                rules: vec![TemplateRule {
                    api_groups: vec!["*".into()],
                    resources: vec!["*".into()],
                    verbs: vec!["*".into()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        ));
        fakes.role_templates.seed(RoleTemplate::new(
            "nodes-view",
            RoleTemplateSpec {
                context: CLUSTER_CONTEXT.into(),
                rules: vec![TemplateRule {
                    api_groups: vec!["management.cattle.io".into()],
                    resources: vec!["nodes".into()],
                    verbs: vec!["get".into()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        ));
        fakes.projects.seed(project("p-1", false));
    }

    fn membership_bindings_for(fakes: &FakeClientset, key: &str) -> Vec<ClusterRoleBinding> {
        fakes
            .cluster_role_bindings
            .objects()
            .into_iter()
            .filter(|b| b.labels().contains_key(key))
            .collect()
    }

    #[tokio::test]
    async fn alice_cluster_owner_on_c1() {
        let fakes = FakeClientset::new();
        seed(&fakes);
        let binding = fakes.crtbs.seed(crtb("crtb-alice", "alice", "cluster-owner"));

        lifecycle(&fakes).create(binding).await.unwrap();

        let crbs = membership_bindings_for(&fakes, "c-1_crtb-alice");
        assert_eq!(crbs.len(), 1);
        let crb = &crbs[0];
        assert!(crb.name_any().starts_with("c-1-clusterowner"));
        assert_eq!(crb.role_ref.name, "c-1-clusterowner");
        assert_eq!(crb.role_ref.kind, "ClusterRole");
        let subjects = crb.subjects.clone().unwrap();
        assert_eq!((subjects[0].kind.as_str(), subjects[0].name.as_str()), ("User", "alice"));
        assert_eq!(crb.labels()["c-1_crtb-alice"], MEMBERSHIP_BINDING_OWNER);

        let role = fakes.cluster_roles.peek(None, "c-1-clusterowner").unwrap();
        assert_eq!(role.rules.unwrap()[0].verbs, ["*"]);

        // Owner rules cover the whole allow-list, in the cluster and project namespaces.
        let role = fakes.roles.peek(Some("c-1"), "cluster-owner").unwrap();
        assert_eq!(role.rules.unwrap().len(), CLUSTER_MANAGEMENT_PLANE_RESOURCES.len());
        assert!(fakes.role_bindings.peek(Some("c-1"), "crtb-alice-cluster-owner").is_some());
        let project_rb = fakes.role_bindings.peek(Some("p-1"), "crtb-alice-cluster-owner").unwrap();
        assert_eq!(project_rb.labels()["c-1_crtb-alice"], CRTB_IN_PROJECT_BINDING_OWNER);
    }

    #[tokio::test]
    async fn removing_alice_leaves_other_bindings() {
        let fakes = FakeClientset::new();
        seed(&fakes);
        let lifecycle = lifecycle(&fakes);
        let alice = fakes.crtbs.seed(crtb("crtb-alice", "alice", "cluster-owner"));
        let bob = fakes.crtbs.seed(crtb("crtb-bob", "bob", "cluster-owner"));
        lifecycle.create(alice.clone()).await.unwrap();
        lifecycle.create(bob).await.unwrap();

        lifecycle.remove(&alice).await.unwrap();

        assert!(membership_bindings_for(&fakes, "c-1_crtb-alice").is_empty());
        assert_eq!(membership_bindings_for(&fakes, "c-1_crtb-bob").len(), 1);
        assert!(fakes.role_bindings.peek(Some("c-1"), "crtb-alice-cluster-owner").is_none());
        assert!(fakes.role_bindings.peek(Some("p-1"), "crtb-alice-cluster-owner").is_none());
        assert!(fakes.role_bindings.peek(Some("c-1"), "crtb-bob-cluster-owner").is_some());
        assert!(fakes.role_bindings.peek(Some("p-1"), "crtb-bob-cluster-owner").is_some());
    }

    #[tokio::test]
    async fn remove_strips_shared_membership_binding() {
        let fakes = FakeClientset::new();
        seed(&fakes);
        let lifecycle = lifecycle(&fakes);
        let first = fakes.crtbs.seed(crtb("crtb-1", "alice", "nodes-view"));
        let second = fakes.crtbs.seed(crtb("crtb-2", "alice", "nodes-view"));
        lifecycle.create(first.clone()).await.unwrap();
        lifecycle.create(second).await.unwrap();
        assert_eq!(fakes.cluster_role_bindings.objects().len(), 1);

        lifecycle.remove(&first).await.unwrap();

        let crbs = fakes.cluster_role_bindings.objects();
        assert_eq!(crbs.len(), 1);
        assert!(!crbs[0].labels().contains_key("c-1_crtb-1"));
        assert_eq!(crbs[0].labels()["c-1_crtb-2"], MEMBERSHIP_BINDING_OWNER);
    }

    #[tokio::test]
    async fn remove_is_repeatable_and_spares_foreign_bindings() {
        let fakes = FakeClientset::new();
        seed(&fakes);
        let lifecycle = lifecycle(&fakes);
        let binding = fakes.crtbs.seed(crtb("crtb-alice", "alice", "nodes-view"));
        lifecycle.create(binding.clone()).await.unwrap();
        fakes.role_bindings.seed(RoleBinding {
            metadata: ObjectMeta {
                name: Some("foreign".into()),
                namespace: Some("p-1".into()),
                labels: Some(BTreeMap::from([("c-1_crtb-other".to_string(), CRTB_IN_PROJECT_BINDING_OWNER.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        });

        lifecycle.remove(&binding).await.unwrap();
        lifecycle.remove(&binding).await.unwrap();

        assert!(membership_bindings_for(&fakes, "c-1_crtb-alice").is_empty());
        assert!(fakes.role_bindings.peek(Some("p-1"), "foreign").is_some());
    }

    #[tokio::test]
    async fn missing_role_template_is_skipped() {
        let fakes = FakeClientset::new();
        seed(&fakes);
        let binding = fakes.crtbs.seed(crtb("crtb-x", "alice", "deleted-template"));

        lifecycle(&fakes).create(binding).await.unwrap();

        assert!(fakes.cluster_role_bindings.objects().is_empty());
        assert!(fakes.role_bindings.objects().is_empty());
    }

    #[tokio::test]
    async fn missing_inherited_template_is_skipped() {
        let fakes = FakeClientset::new();
        seed(&fakes);
        fakes.role_templates.seed(RoleTemplate::new(
            "custom-owner",
            RoleTemplateSpec {
                context: CLUSTER_CONTEXT.into(),
                role_template_names: vec!["cluster-owner".into(), "deleted-template".into()],
                ..Default::default()
            },
        ));
        let binding = fakes.crtbs.seed(crtb("crtb-x", "alice", "custom-owner"));

        lifecycle(&fakes).create(binding).await.unwrap();

        assert!(fakes.cluster_role_bindings.objects().is_empty());
        assert!(fakes.role_bindings.objects().is_empty());
        assert!(fakes.roles.objects().is_empty());
    }

    #[tokio::test]
    async fn missing_cluster_fails() {
        let fakes = FakeClientset::new();
        let mut binding = crtb("crtb-x", "alice", "nodes-view");
        binding.spec.cluster_name = "c-gone".into();

        let err = lifecycle(&fakes).create(binding).await.unwrap_err();
        assert_eq!(err.to_string(), "cannot create binding because cluster c-gone was not found");
    }

    #[tokio::test]
    async fn terminating_projects_are_skipped() {
        let fakes = FakeClientset::new();
        seed(&fakes);
        fakes.projects.seed(project("p-gone", true));
        let binding = fakes.crtbs.seed(crtb("crtb-alice", "alice", "cluster-owner"));

        lifecycle(&fakes).create(binding).await.unwrap();

        assert!(fakes.role_bindings.objects().iter().all(|rb| rb.namespace().as_deref() != Some("p-gone")));
    }

    #[tokio::test]
    async fn project_failures_do_not_stop_the_batch() {
        let fakes = FakeClientset::new();
        seed(&fakes);
        fakes.projects.seed(project("p-2", false));
        // The cluster namespace role already matches, so the only role
        // creations are the two project ones.
        fakes.roles.seed(k8s_openapi::api::rbac::v1::Role {
            metadata: ObjectMeta {
                name: Some("cluster-owner".into()),
                namespace: Some("c-1".into()),
                ..Default::default()
            },
            rules: Some(
                CLUSTER_MANAGEMENT_PLANE_RESOURCES
                    .iter()
                    .map(|(resource, group)| k8s_openapi::api::rbac::v1::PolicyRule {
                        api_groups: Some(vec![group.to_string()]),
                        resources: Some(vec![resource.to_string()]),
                        verbs: vec!["*".into()],
                        ..Default::default()
                    })
                    .collect(),
            ),
        });
        fakes.roles.inject_error(Verb::Create, 1, || ClientError::Invalid {
            kind: "Role".into(),
            message: "quota exceeded".into(),
        });
        let binding = fakes.crtbs.seed(crtb("crtb-alice", "alice", "cluster-owner"));

        let err = lifecycle(&fakes).create(binding).await.unwrap_err();

        assert!(err.to_string().contains("quota exceeded"));
        assert!(fakes.role_bindings.peek(Some("p-1"), "crtb-alice-cluster-owner").is_none());
        assert!(fakes.role_bindings.peek(Some("p-2"), "crtb-alice-cluster-owner").is_some());
    }

    #[tokio::test]
    async fn updated_migrates_then_reconciles() {
        let fakes = FakeClientset::new();
        seed(&fakes);
        let mut binding = crtb("crtb-alice", "alice", "nodes-view");
        binding.metadata.uid = Some("uid-alice".into());
        let binding = fakes.crtbs.seed(binding);
        fakes.cluster_role_bindings.seed(ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some("legacy".into()),
                labels: Some(BTreeMap::from([(
                    "uid-alice".to_string(),
                    owner::MEMBERSHIP_BINDING_OWNER_LEGACY.to_string(),
                )])),
                ..Default::default()
            },
            role_ref: k8s_openapi::api::rbac::v1::RoleRef {
                api_group: "rbac.authorization.k8s.io".into(),
                kind: "ClusterRole".into(),
                name: "c-1-clustermember".into(),
            },
            subjects: None,
        });

        let reconciled = lifecycle(&fakes).updated(binding).await.unwrap();

        assert_eq!(reconciled.relabeled, 1);
        assert_eq!(reconciled.binding.labels()[owner::RTB_CRB_RB_LABELS_UPDATED], "true");
        // The legacy binding grants nobody, so it was released in favour of the new one.
        assert!(fakes.cluster_role_bindings.peek(None, "legacy").is_none());
        assert_eq!(membership_bindings_for(&fakes, "c-1_crtb-alice").len(), 1);
    }

    #[tokio::test]
    async fn updated_keeps_migrated_legacy_binding() {
        let fakes = FakeClientset::new();
        seed(&fakes);
        let mut binding = crtb("crtb-alice", "alice", "nodes-view");
        binding.metadata.uid = Some("uid-alice".into());
        let binding = fakes.crtbs.seed(binding);
        fakes.cluster_role_bindings.seed(ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some("clusterrolebinding-abcde".into()),
                labels: Some(BTreeMap::from([(
                    "uid-alice".to_string(),
                    owner::MEMBERSHIP_BINDING_OWNER_LEGACY.to_string(),
                )])),
                ..Default::default()
            },
            role_ref: k8s_openapi::api::rbac::v1::RoleRef {
                api_group: "rbac.authorization.k8s.io".into(),
                kind: "ClusterRole".into(),
                name: "c-1-clustermember".into(),
            },
            subjects: Some(vec![k8s_openapi::api::rbac::v1::Subject {
                kind: "User".into(),
                name: "alice".into(),
                api_group: Some("rbac.authorization.k8s.io".into()),
                namespace: None,
            }]),
        });

        let lifecycle = lifecycle(&fakes);
        lifecycle.updated(binding).await.unwrap();
        lifecycle.updated(fakes.crtbs.peek(Some("c-1"), "crtb-alice").unwrap()).await.unwrap();

        let crbs = fakes.cluster_role_bindings.objects();
        assert_eq!(crbs.len(), 1);
        assert_eq!(crbs[0].name_any(), "clusterrolebinding-abcde");
        assert_eq!(crbs[0].labels()["c-1_crtb-alice"], MEMBERSHIP_BINDING_OWNER);
    }

    #[tokio::test]
    async fn group_subject_needs_no_user_lookup() {
        let fakes = FakeClientset::new();
        seed(&fakes);
        let mut binding = crtb("crtb-devs", "", "nodes-view");
        binding.spec.user_principal_name.clear();
        binding.spec.group_principal_name = "okta_group://devs".into();

        lifecycle(&fakes).create(binding).await.unwrap();

        assert!(fakes.users.actions().is_empty());
        let crbs = membership_bindings_for(&fakes, "c-1_crtb-devs");
        assert_eq!(crbs[0].subjects.as_ref().unwrap()[0].kind, "Group");
    }
}
