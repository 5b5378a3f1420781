/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/rbac_manager/src/privileges.rs
*
* Management-plane privileges. Some platform resources (node pools, etcd
* backups, project apps...) live in the management cluster, namespaced by the
* cluster or project they belong to. A role template's rules on those
* resources are enforced with a namespaced Role (one per template) and a
* RoleBinding per binding and template.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::Error;
use crate::owner;
use crate::roles::verbs_for;
use k8s_openapi::api::rbac::v1 as rbac;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use management_api::v3::{ClusterRoleTemplateBinding, RoleTemplate};
use management_api::{retry_on_conflict, safe_concat_name, Backoff, Clientset, Selector};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Resource -> API group, enforced in the cluster's own namespace.
pub const CLUSTER_MANAGEMENT_PLANE_RESOURCES: &[(&str, &str)] = &[
    ("clusterscans", "management.cattle.io"),
    ("catalogtemplates", "management.cattle.io"),
    ("catalogtemplateversions", "management.cattle.io"),
    ("clusteralertrules", "management.cattle.io"),
    ("clusteralertgroups", "management.cattle.io"),
    ("clustercatalogs", "management.cattle.io"),
    ("clusterloggings", "management.cattle.io"),
    ("clustermonitorgraphs", "management.cattle.io"),
    ("clusterregistrationtokens", "management.cattle.io"),
    ("clusterroletemplatebindings", "management.cattle.io"),
    ("etcdbackups", "management.cattle.io"),
    ("nodes", "management.cattle.io"),
    ("nodepools", "management.cattle.io"),
    ("notifiers", "management.cattle.io"),
    ("projects", "management.cattle.io"),
    ("etcdsnapshots", "rke.cattle.io"),
];

/// Resource -> API group, enforced in each project's namespace.
pub const PROJECT_MANAGEMENT_PLANE_RESOURCES: &[(&str, &str)] = &[
    ("apps", "project.cattle.io"),
    ("apprevisions", "project.cattle.io"),
    ("sourcecodeproviderconfigs", "project.cattle.io"),
    ("catalogtemplates", "management.cattle.io"),
    ("catalogtemplateversions", "management.cattle.io"),
    ("projectloggings", "management.cattle.io"),
    ("projectalertrules", "management.cattle.io"),
    ("projectalertgroups", "management.cattle.io"),
    ("projectcatalogs", "management.cattle.io"),
    ("projectmonitorgraphs", "management.cattle.io"),
    ("projectroletemplatebindings", "management.cattle.io"),
    ("secrets", ""),
];

/// Where privileges are granted and which owner value marks the bindings.
#[derive(Clone, Copy, Debug)]
pub struct PrivilegeScope<'a> {
    pub namespace: &'a str,
    pub resources: &'a [(&'a str, &'a str)],
    pub owner_value: &'a str,
}

fn role_binding_name(binding: &ClusterRoleTemplateBinding, template: &str) -> String {
    safe_concat_name(&format!("{}-{}", binding.name_any(), template))
}

/// Grants the management-plane part of `templates` (a role template and
/// everything it inherits, see `gather_roles`) to `subject` in
/// `scope.namespace`, and removes bindings this CRTB owns there that are no
/// longer wanted.
pub async fn grant_management_plane_privileges(
    clients: &Clientset,
    templates: &[RoleTemplate],
    binding: &ClusterRoleTemplateBinding,
    subject: &rbac::Subject,
    scope: PrivilegeScope<'_>,
) -> Result<(), Error> {
    let key = owner::binding_key(&binding.metadata);

    let mut desired = BTreeMap::new();
    for template in templates {
        let rules: Vec<rbac::PolicyRule> = scope
            .resources
            .iter()
            .filter_map(|(resource, group)| {
                let verbs = verbs_for(&template.spec.rules, resource, group);
                (!verbs.is_empty()).then(|| rbac::PolicyRule {
                    api_groups: Some(vec![group.to_string()]),
                    resources: Some(vec![resource.to_string()]),
                    verbs: verbs.into_iter().collect(),
                    ..Default::default()
                })
            })
            .collect();
        if rules.is_empty() {
            continue;
        }

        let template_name = template.name_any();
        ensure_role(clients, scope.namespace, &template_name, rules).await?;

        let name = role_binding_name(binding, &template_name);
        let mut labels = BTreeMap::new();
        owner::stamp_owner(&mut labels, &key, scope.owner_value);
        desired.insert(
            name.clone(),
            rbac::RoleBinding {
                metadata: ObjectMeta {
                    name: Some(name),
                    namespace: Some(scope.namespace.to_string()),
                    labels: Some(labels),
                    ..Default::default()
                },
                role_ref: rbac::RoleRef {
                    api_group: "rbac.authorization.k8s.io".to_string(),
                    kind: "Role".to_string(),
                    name: template_name,
                },
                subjects: Some(vec![subject.clone()]),
            },
        );
    }

    let selector = Selector::from_set([(key.as_str(), scope.owner_value)]);
    let current = clients.role_bindings.list(Some(scope.namespace), &selector).await?;
    reconcile_role_bindings(clients, scope.namespace, current, desired).await
}

async fn ensure_role(clients: &Clientset, namespace: &str, name: &str, rules: Vec<rbac::PolicyRule>) -> Result<(), Error> {
    retry_on_conflict(Backoff::default(), || async {
        match clients.roles.get(Some(namespace), name).await {
            Ok(existing) if existing.rules.as_ref() == Some(&rules) => Ok(()),
            Ok(mut existing) => {
                debug!(namespace, role = name, "Updating management plane role rules");
                existing.rules = Some(rules.clone());
                clients.roles.update(&existing).await.map(|_| ())
            }
            Err(e) if e.is_not_found() => {
                info!(namespace, role = name, "Creating management plane role");
                let role = rbac::Role {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some(namespace.to_string()),
                        ..Default::default()
                    },
                    rules: Some(rules.clone()),
                };
                clients.roles.create(&role).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    })
    .await
    .map_err(Error::from)
}

fn same_grant(a: &rbac::RoleBinding, b: &rbac::RoleBinding) -> bool {
    a.role_ref == b.role_ref && a.subjects == b.subjects
}

async fn reconcile_role_bindings(
    clients: &Clientset,
    namespace: &str,
    current: Vec<rbac::RoleBinding>,
    mut desired: BTreeMap<String, rbac::RoleBinding>,
) -> Result<(), Error> {
    for existing in current {
        let name = existing.name_any();
        match desired.get(&name) {
            Some(wanted) if same_grant(&existing, wanted) => {
                desired.remove(&name);
            }
            // Role references are immutable: changed grants are recreated.
            _ => {
                info!(namespace, binding = %name, "Deleting stale management plane role binding");
                match clients.role_bindings.delete(Some(namespace), &name).await {
                    Err(e) if !e.is_not_found() => return Err(e.into()),
                    _ => {}
                }
            }
        }
    }

    for (name, binding) in desired {
        info!(namespace, binding = %name, role = %binding.role_ref.name, "Creating management plane role binding");
        match clients.role_bindings.create(&binding).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => adopt_role_binding(clients, &binding).await?,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Takes over a binding of the wanted name that lacks our owner labels.
async fn adopt_role_binding(clients: &Clientset, wanted: &rbac::RoleBinding) -> Result<(), Error> {
    let namespace = wanted.namespace().unwrap_or_default();
    let name = wanted.name_any();
    let existing = clients.role_bindings.get(Some(&namespace), &name).await?;
    if !same_grant(&existing, wanted) {
        clients.role_bindings.delete(Some(&namespace), &name).await?;
        clients.role_bindings.create(wanted).await?;
        return Ok(());
    }
    retry_on_conflict(Backoff::default(), || async {
        let mut existing = clients.role_bindings.get(Some(&namespace), &name).await?;
        for (k, v) in wanted.labels() {
            existing.labels_mut().insert(k.clone(), v.clone());
        }
        clients.role_bindings.update(&existing).await.map(|_| ())
    })
    .await
    .map_err(Error::from)
}

/// Deletes every RoleBinding in `namespace` labelled `<key>: <owner_value>`.
pub async fn remove_owned_role_bindings(
    clients: &Clientset,
    namespace: &str,
    key: &str,
    owner_value: &str,
) -> Result<(), Error> {
    let selector = Selector::from_set([(key, owner_value)]);
    for binding in clients.role_bindings.list(Some(namespace), &selector).await? {
        let name = binding.name_any();
        info!(namespace, binding = %name, key, "Deleting role binding owned by removed binding");
        match clients.role_bindings.delete(Some(namespace), &name).await {
            Err(e) if !e.is_not_found() => return Err(e.into()),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::{CRTB_IN_PROJECT_BINDING_OWNER, MEMBERSHIP_BINDING_OWNER};
    use crate::roles::gather_roles;
    use management_api::v3::{ClusterRoleTemplateBindingSpec, RoleTemplate, RoleTemplateSpec, TemplateRule};
    use management_api::FakeClientset;

    fn crtb(name: &str) -> ClusterRoleTemplateBinding {
        let mut b = ClusterRoleTemplateBinding::new(
            name,
            ClusterRoleTemplateBindingSpec {
                user_name: "alice".into(),
                role_template_name: "nodes-manage".into(),
                cluster_name: "c-1".into(),
                ..Default::default()
            },
        );
        b.metadata.namespace = Some("c-1".into());
        b
    }

    fn alice() -> rbac::Subject {
        rbac::Subject {
            kind: "User".into(),
            name: "alice".into(),
            api_group: Some("rbac.authorization.k8s.io".into()),
            namespace: None,
        }
    }

    fn seed_templates(fakes: &FakeClientset) {
        fakes.role_templates.seed(RoleTemplate::new(
            "nodes-manage",
            RoleTemplateSpec {
                role_template_names: vec!["apps-view".into()],
                rules: vec![TemplateRule {
                    api_groups: vec!["management.cattle.io".into()],
                    resources: vec!["nodes".into(), "nodepools".into(), "pods".into()],
                    verbs: vec!["update".into(), "get".into()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        ));
        fakes.role_templates.seed(RoleTemplate::new(
            "apps-view",
            RoleTemplateSpec {
                rules: vec![TemplateRule {
                    api_groups: vec!["project.cattle.io".into()],
                    resources: vec!["apps".into()],
                    verbs: vec!["get".into()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        ));
    }

    async fn nodes_manage(clients: &Clientset) -> Vec<RoleTemplate> {
        gather_roles(clients.role_templates.as_ref(), "nodes-manage").await.unwrap()
    }

    const CLUSTER_SCOPE: PrivilegeScope<'static> = PrivilegeScope {
        namespace: "c-1",
        resources: CLUSTER_MANAGEMENT_PLANE_RESOURCES,
        owner_value: MEMBERSHIP_BINDING_OWNER,
    };

    #[tokio::test]
    async fn grants_only_allow_listed_resources() {
        let fakes = FakeClientset::new();
        seed_templates(&fakes);
        let clients = fakes.clientset();

        grant_management_plane_privileges(&clients, &nodes_manage(&clients).await, &crtb("crtb-a"), &alice(), CLUSTER_SCOPE)
            .await
            .unwrap();

        let role = fakes.roles.peek(Some("c-1"), "nodes-manage").unwrap();
        let resources: Vec<_> = role
            .rules
            .unwrap()
            .into_iter()
            .flat_map(|r| r.resources.unwrap_or_default())
            .collect();
        assert_eq!(resources, ["nodes", "nodepools"]);
        // apps-view touches nothing in the cluster allow-list.
        assert!(fakes.roles.peek(Some("c-1"), "apps-view").is_none());

        let rb = fakes.role_bindings.peek(Some("c-1"), "crtb-a-nodes-manage").unwrap();
        assert_eq!(rb.labels()["c-1_crtb-a"], MEMBERSHIP_BINDING_OWNER);
        assert_eq!(rb.role_ref.kind, "Role");
    }

    #[tokio::test]
    async fn project_scope_uses_project_allow_list() {
        let fakes = FakeClientset::new();
        seed_templates(&fakes);
        let clients = fakes.clientset();
        let scope = PrivilegeScope {
            namespace: "p-1",
            resources: PROJECT_MANAGEMENT_PLANE_RESOURCES,
            owner_value: CRTB_IN_PROJECT_BINDING_OWNER,
        };

        grant_management_plane_privileges(&clients, &nodes_manage(&clients).await, &crtb("crtb-a"), &alice(), scope)
            .await
            .unwrap();

        assert!(fakes.roles.peek(Some("p-1"), "nodes-manage").is_none());
        let rb = fakes.role_bindings.peek(Some("p-1"), "crtb-a-apps-view").unwrap();
        assert_eq!(rb.labels()["c-1_crtb-a"], CRTB_IN_PROJECT_BINDING_OWNER);
    }

    #[tokio::test]
    async fn stale_bindings_are_removed_and_repeats_are_quiet() {
        let fakes = FakeClientset::new();
        seed_templates(&fakes);
        let clients = fakes.clientset();

        let mut stale_labels = BTreeMap::new();
        owner::stamp_owner(&mut stale_labels, "c-1_crtb-a", MEMBERSHIP_BINDING_OWNER);
        fakes.role_bindings.seed(rbac::RoleBinding {
            metadata: ObjectMeta {
                name: Some("crtb-a-old-template".into()),
                namespace: Some("c-1".into()),
                labels: Some(stale_labels),
                ..Default::default()
            },
            ..Default::default()
        });

        grant_management_plane_privileges(&clients, &nodes_manage(&clients).await, &crtb("crtb-a"), &alice(), CLUSTER_SCOPE)
            .await
            .unwrap();
        assert!(fakes.role_bindings.peek(Some("c-1"), "crtb-a-old-template").is_none());

        fakes.role_bindings.clear_actions();
        grant_management_plane_privileges(&clients, &nodes_manage(&clients).await, &crtb("crtb-a"), &alice(), CLUSTER_SCOPE)
            .await
            .unwrap();
        let writes = fakes
            .role_bindings
            .actions()
            .into_iter()
            .filter(|a| a.verb != management_api::Verb::List)
            .count();
        assert_eq!(writes, 0);
    }

    #[tokio::test]
    async fn removal_only_touches_own_key() {
        let fakes = FakeClientset::new();
        seed_templates(&fakes);
        let clients = fakes.clientset();
        grant_management_plane_privileges(&clients, &nodes_manage(&clients).await, &crtb("crtb-a"), &alice(), CLUSTER_SCOPE)
            .await
            .unwrap();
        grant_management_plane_privileges(&clients, &nodes_manage(&clients).await, &crtb("crtb-b"), &alice(), CLUSTER_SCOPE)
            .await
            .unwrap();

        remove_owned_role_bindings(&clients, "c-1", "c-1_crtb-a", MEMBERSHIP_BINDING_OWNER)
            .await
            .unwrap();

        assert!(fakes.role_bindings.peek(Some("c-1"), "crtb-a-nodes-manage").is_none());
        assert!(fakes.role_bindings.peek(Some("c-1"), "crtb-b-nodes-manage").is_some());
    }
}
