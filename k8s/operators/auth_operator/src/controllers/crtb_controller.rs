/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/auth_operator/src/controllers/crtb_controller.rs
*
* This file implements the controller for ClusterRoleTemplateBindings.
*
* Architecture:
* - The controller watches CRTBs in every namespace.
* - A finalizer guarantees the `remove` hook runs before a binding is gone,
*   so the RBAC objects it owns never outlive it.
* - The `lifecycle.cattle.io/create...` annotation tells a first sighting
*   (`create` hook) apart from later changes (`updated` hook). The binding is
*   written back when the annotation is missing or the hook resolved its
*   subject.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::metrics::Metrics;
use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event},
    },
    ResourceExt,
};
use management_api::v3::ClusterRoleTemplateBinding;
use management_api::{ClientError, Clientset};
use rbac_manager::CrtbLifecycle;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

pub const FINALIZER: &str = "controller.cattle.io/mgmt-auth-crtb-controller";
pub const CREATE_ANNOTATION: &str = "lifecycle.cattle.io/create.mgmt-auth-crtb-controller";

// --- Error Handling ---

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Rbac(#[from] rbac_manager::Error),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("ClusterRoleTemplateBinding {0} has no namespace")]
    MissingNamespace(String),
}

// --- Hooks ---

/// Runs the lifecycle hooks for one binding and records their outcome.
pub struct Hooks {
    clients: Clientset,
    lifecycle: CrtbLifecycle,
    metrics: Metrics,
}

impl Hooks {
    pub fn new(clients: Clientset, lifecycle: CrtbLifecycle, metrics: Metrics) -> Self {
        Self { clients, lifecycle, metrics }
    }

    pub async fn apply(&self, binding: &ClusterRoleTemplateBinding) -> Result<Action, Error> {
        let seen = binding.annotations().get(CREATE_ANNOTATION).is_some_and(|v| v == "true");
        let hook = if seen { "updated" } else { "create" };

        let result = if seen {
            self.lifecycle.updated(binding.clone()).await
        } else {
            self.lifecycle.create(binding.clone()).await
        };
        self.metrics.record_hook(hook, result.is_ok());
        let reconciled = result?;
        self.metrics.crtb_label_migrations_total.inc_by(reconciled.relabeled as u64);

        let mut desired = reconciled.binding;
        if !seen || desired.spec != binding.spec {
            desired
                .annotations_mut()
                .insert(CREATE_ANNOTATION.to_string(), "true".to_string());
            self.clients.crtbs.update(&desired).await?;
            debug!(crtb = %desired.name_any(), hook, "Wrote back ClusterRoleTemplateBinding");
        }

        info!(crtb = %binding.name_any(), hook, relabeled = reconciled.relabeled, "Reconciled ClusterRoleTemplateBinding");
        Ok(Action::requeue(Duration::from_secs(3600)))
    }

    pub async fn cleanup(&self, binding: &ClusterRoleTemplateBinding) -> Result<Action, Error> {
        let result = self.lifecycle.remove(binding).await;
        self.metrics.record_hook("remove", result.is_ok());
        result?;
        info!(crtb = %binding.name_any(), "Removed RBAC owned by ClusterRoleTemplateBinding");
        Ok(Action::await_change())
    }
}

// --- Controller Context and Entrypoint ---

struct Context {
    client: Client,
    hooks: Hooks,
}

pub async fn run(client: Client, hooks: Hooks) {
    let api = Api::<ClusterRoleTemplateBinding>::all(client.clone());
    Controller::new(api, Default::default())
        .run(reconcile, error_policy, Arc::new(Context { client, hooks }))
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(crtb = %obj.name, "Reconcile finished"),
                Err(e) => error!("ClusterRoleTemplateBinding reconcile error: {}", e),
            }
        })
        .await;
}

// --- Reconciliation Logic ---

async fn reconcile(binding: Arc<ClusterRoleTemplateBinding>, ctx: Arc<Context>) -> Result<Action, Error> {
    let ns = binding
        .namespace()
        .ok_or_else(|| Error::MissingNamespace(binding.name_any()))?;
    let api: Api<ClusterRoleTemplateBinding> = Api::namespaced(ctx.client.clone(), &ns);

    finalizer(&api, FINALIZER, binding, |event| async {
        match event {
            Event::Apply(binding) => ctx.hooks.apply(&binding).await,
            Event::Cleanup(binding) => ctx.hooks.cleanup(&binding).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(e.into()))
}

fn error_policy(binding: Arc<ClusterRoleTemplateBinding>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(crtb = %binding.name_any(), "Reconciliation failed: {}", error);
    Action::requeue(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
    use management_api::v3::{
        Cluster, ClusterRoleTemplateBindingSpec, ClusterSpec, RoleTemplate, RoleTemplateSpec, TemplateRule, User,
        UserSpec, CLUSTER_CONTEXT,
    };
    use management_api::{FakeClientset, Verb};
    use prometheus::Registry;
    use rbac_manager::ClientUserManager;

    fn hooks(fakes: &FakeClientset) -> (Hooks, Metrics) {
        let clients = fakes.clientset();
        let users = Arc::new(ClientUserManager::new(clients.users.clone()));
        let lifecycle = CrtbLifecycle::new(clients.clone(), users);
        let metrics = Metrics::register(&Registry::new()).unwrap();
        (Hooks::new(clients, lifecycle, metrics.clone()), metrics)
    }

    fn seed(fakes: &FakeClientset) -> ClusterRoleTemplateBinding {
        fakes.clusters.seed(Cluster::new("c-1", ClusterSpec::default()));
        fakes.users.seed(User::new(
            "u-alice",
            UserSpec {
                principal_ids: vec!["local://u-alice".into()],
                ..Default::default()
            },
        ));
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
        let mut binding = ClusterRoleTemplateBinding::new(
            "crtb-alice",
            ClusterRoleTemplateBindingSpec {
                user_principal_name: "local://u-alice".into(),
                role_template_name: "cluster-owner".into(),
                cluster_name: "c-1".into(),
                ..Default::default()
            },
        );
        binding.metadata.namespace = Some("c-1".into());
        fakes.crtbs.seed(binding)
    }

    fn stored(fakes: &FakeClientset) -> ClusterRoleTemplateBinding {
        fakes.crtbs.peek(Some("c-1"), "crtb-alice").unwrap()
    }

    fn counter(metrics: &Metrics, hook: &str, result: &str) -> u64 {
        metrics.crtb_reconcile_total.with_label_values(&[hook, result]).get()
    }

    #[tokio::test]
    async fn first_sighting_runs_create_and_writes_back_once() {
        let fakes = FakeClientset::new();
        let binding = seed(&fakes);
        let (hooks, metrics) = hooks(&fakes);

        let action = hooks.apply(&binding).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(3600)));

        let after_create = stored(&fakes);
        assert_eq!(after_create.annotations()[CREATE_ANNOTATION], "true");
        assert_eq!(after_create.spec.user_name, "u-alice");
        assert_eq!(counter(&metrics, "create", "success"), 1);

        let granted: Vec<ClusterRoleBinding> = fakes.cluster_role_bindings.objects();
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].role_ref.name, "c-1-clusterowner");

        // The written-back binding only needs its labels migrated once.
        hooks.apply(&after_create).await.unwrap();
        assert_eq!(counter(&metrics, "updated", "success"), 1);
        fakes.crtbs.clear_actions();

        hooks.apply(&stored(&fakes)).await.unwrap();
        assert!(fakes.crtbs.actions_for(Verb::Update).is_empty());
        assert_eq!(counter(&metrics, "updated", "success"), 2);
    }

    #[tokio::test]
    async fn failed_hooks_are_counted_and_not_written_back() {
        let fakes = FakeClientset::new();
        let mut binding = seed(&fakes);
        binding.spec.cluster_name = "c-missing".into();
        let (hooks, metrics) = hooks(&fakes);

        assert!(hooks.apply(&binding).await.is_err());
        assert_eq!(counter(&metrics, "create", "error"), 1);
        assert!(fakes.crtbs.actions_for(Verb::Update).is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_owned_bindings() {
        let fakes = FakeClientset::new();
        let binding = seed(&fakes);
        let (hooks, metrics) = hooks(&fakes);
        hooks.apply(&binding).await.unwrap();
        assert!(!fakes.cluster_role_bindings.objects().is_empty());

        let action = hooks.cleanup(&stored(&fakes)).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(fakes.cluster_role_bindings.objects().is_empty());
        assert!(fakes.role_bindings.objects().is_empty());
        assert_eq!(counter(&metrics, "remove", "success"), 1);
    }
}
