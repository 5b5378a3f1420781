/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/rbac_manager/src/roles.rs
*
* Role template inheritance. Templates reference other templates through
* `roleTemplateNames`; both walks below follow those references with a hard
* depth limit so that a reference cycle cannot stall a reconcile.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::Error;
use kube::ResourceExt;
use management_api::v3::{RoleTemplate, TemplateRule, CLUSTER_CONTEXT, PROJECT_CONTEXT};
use management_api::ResourceClient;
use std::collections::{BTreeSet, VecDeque};

pub const CLUSTER_OWNER: &str = "cluster-owner";
pub const PROJECT_OWNER: &str = "project-owner";
pub const MAX_INHERITANCE_DEPTH: usize = 100;

fn is_builtin_owner(template: &RoleTemplate, context: &str) -> bool {
    if !template.spec.builtin {
        return false;
    }
    let name = template.name_any();
    (context == CLUSTER_CONTEXT && name == CLUSTER_OWNER) || (context == PROJECT_CONTEXT && name == PROJECT_OWNER)
}

/// Whether `name`, or any template it inherits from, is the built-in owner
/// role of `context`. A missing template anywhere in the walk is returned as
/// a not-found error.
pub async fn is_owner_role(
    role_templates: &dyn ResourceClient<RoleTemplate>,
    name: &str,
    context: &str,
) -> Result<bool, Error> {
    let mut stack = vec![(name.to_string(), 0usize)];
    while let Some((current, depth)) = stack.pop() {
        if depth > MAX_INHERITANCE_DEPTH {
            return Err(Error::InheritanceTooDeep(name.to_string()));
        }
        let template = role_templates.get(None, &current).await?;
        if is_builtin_owner(&template, context) {
            return Ok(true);
        }
        // Reversed so the first reference is walked first.
        for child in template.spec.role_template_names.iter().rev() {
            stack.push((child.clone(), depth + 1));
        }
    }
    Ok(false)
}

/// The template and everything it inherits, each template once.
pub async fn gather_roles(
    role_templates: &dyn ResourceClient<RoleTemplate>,
    name: &str,
) -> Result<Vec<RoleTemplate>, Error> {
    let mut seen = BTreeSet::new();
    let mut gathered = Vec::new();
    let mut queue = VecDeque::from([(name.to_string(), 0usize)]);
    while let Some((current, depth)) = queue.pop_front() {
        if depth > MAX_INHERITANCE_DEPTH {
            return Err(Error::InheritanceTooDeep(name.to_string()));
        }
        if !seen.insert(current.clone()) {
            continue;
        }
        let template = role_templates.get(None, &current).await?;
        for child in &template.spec.role_template_names {
            queue.push_back((child.clone(), depth + 1));
        }
        gathered.push(template);
    }
    Ok(gathered)
}

/// Verbs the template's rules grant on `resource` in `api_group`. Rules
/// restricted to specific resource names do not count.
pub fn verbs_for(rules: &[TemplateRule], resource: &str, api_group: &str) -> BTreeSet<String> {
    rules
        .iter()
        .filter(|rule| rule.resource_names.is_empty())
        .filter(|rule| rule.resources.iter().any(|r| r == resource || r == "*"))
        .filter(|rule| rule.api_groups.iter().any(|g| g == api_group || g == "*"))
        .flat_map(|rule| rule.verbs.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use management_api::v3::RoleTemplateSpec;
    use management_api::FakeClient;

    fn template(name: &str, builtin: bool, inherits: &[&str]) -> RoleTemplate {
        RoleTemplate::new(
            name,
            RoleTemplateSpec {
                context: CLUSTER_CONTEXT.to_string(),
                builtin,
                role_template_names: inherits.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn owner_role_is_found_through_inheritance() {
        let templates = FakeClient::<RoleTemplate>::new();
        templates.seed(template("cluster-owner", true, &[]));
        templates.seed(template("custom-admin", false, &["nodes-view", "cluster-owner"]));
        templates.seed(template("nodes-view", false, &[]));

        assert!(is_owner_role(&templates, "cluster-owner", CLUSTER_CONTEXT).await.unwrap());
        assert!(is_owner_role(&templates, "custom-admin", CLUSTER_CONTEXT).await.unwrap());
        assert!(!is_owner_role(&templates, "nodes-view", CLUSTER_CONTEXT).await.unwrap());
        assert!(!is_owner_role(&templates, "cluster-owner", PROJECT_CONTEXT).await.unwrap());
    }

    #[tokio::test]
    async fn missing_template_is_not_found() {
        let templates = FakeClient::<RoleTemplate>::new();
        templates.seed(template("custom", false, &["deleted"]));

        let err = is_owner_role(&templates, "custom", CLUSTER_CONTEXT).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn cycles_hit_the_depth_limit() {
        let templates = FakeClient::<RoleTemplate>::new();
        templates.seed(template("a", false, &["b"]));
        templates.seed(template("b", false, &["a"]));

        let err = is_owner_role(&templates, "a", CLUSTER_CONTEXT).await.unwrap_err();
        assert!(matches!(err, Error::InheritanceTooDeep(_)));

        // Gathering deduplicates, so the same cycle terminates.
        let gathered = gather_roles(&templates, "a").await.unwrap();
        let names: Vec<_> = gathered.iter().map(|t| t.name_any()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn verbs_ignore_named_resources() {
        let rules = vec![
            TemplateRule {
                api_groups: vec!["management.cattle.io".into()],
                resources: vec!["nodes".into()],
                verbs: vec!["get".into(), "list".into()],
                ..Default::default()
            },
            TemplateRule {
                api_groups: vec!["*".into()],
                resources: vec!["*".into()],
                resource_names: vec!["n1".into()],
                verbs: vec!["delete".into()],
            },
        ];
        let verbs = verbs_for(&rules, "nodes", "management.cattle.io");
        assert_eq!(verbs.into_iter().collect::<Vec<_>>(), ["get", "list"]);
        assert!(verbs_for(&rules, "nodes", "rke.cattle.io").is_empty());
    }
}
