/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/rbac_manager/src/lib.rs
*
* This module provides the core logic for translating ClusterRoleTemplateBindings
* into Kubernetes RBAC resources. It is driven by the auth operator's CRTB
* controller and abstracts away the details of which native objects a binding
* needs and how shared objects record their owners.
*
* Architecture:
* - `subject` / `users`: resolve the binding's subject to a concrete user or
*   group, creating the user record for a principal when needed.
* - `owner`: the binding-owner label schema (legacy and current keys).
* - `roles`: role template inheritance walks.
* - `membership`: per-cluster membership roles and bindings.
* - `privileges`: management-plane Roles and RoleBindings in cluster and
*   project namespaces.
* - `provisioning`: cleanup of grants applied by the provisioning controllers.
* - `migration`: in-place upgrade of legacy owner labels.
* - `crtb`: the create / updated / remove hooks tying it all together.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod crtb;
pub mod error;
pub mod membership;
pub mod migration;
pub mod owner;
pub mod privileges;
pub mod provisioning;
pub mod roles;
pub mod subject;
pub mod users;

pub use crtb::{CrtbLifecycle, Reconciled};
pub use error::Error;
pub use owner::{binding_key, LabelSchema};
pub use subject::{build_subject, SubjectResolver};
pub use users::{ClientUserManager, UserManager};
