/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/management_api/src/lib.rs
*
* This crate is the typed API surface shared by the auth controllers and the
* ext API stores. Everything that talks to the Kubernetes API server goes
* through the `ResourceClient` trait defined here, which keeps the business
* logic in `rbac_manager` and `ext_stores` independent of `kube::Api` and lets
* tests swap in the in-memory fakes from the `fake` module.
*
* Architecture:
* - `v3`: management.cattle.io/v3 resources (bindings, role templates,
*   clusters, projects, users, tokens).
* - `ext`: ext.cattle.io/v1 virtual resources (user activity, tokens).
* - `labels`: label selector requirements with matching and serialization.
* - `client`: the typed-client trait, its error type and the kube-backed
*   implementation.
* - `clientset`: one client per resource kind, bundled.
* - `fake`: in-memory clients with resource versions and action recording.
* - `retry`: optimistic-concurrency retry with a fixed backoff.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod client;
pub mod clientset;
pub mod ext;
pub mod fake;
pub mod labels;
pub mod retry;
pub mod v3;

pub use client::{ClientError, KubeResourceClient, ResourceClient};
pub use clientset::Clientset;
pub use fake::{FakeClient, FakeClientset, Verb};
pub use labels::{Requirement, Selector};
pub use retry::{retry_on_conflict, Backoff};

use sha2::{Digest, Sha256};

/// Joins a name so that it stays within the 63-character limit of label keys
/// and object names. Longer inputs keep a 57-character prefix followed by a
/// short digest of the whole string, so distinct inputs stay distinct.
pub fn safe_concat_name(full: &str) -> String {
    if full.len() < 64 {
        return full.to_string();
    }
    let digest = hex::encode(Sha256::digest(full.as_bytes()));
    let mut cut = 57;
    while !full.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}-{}", &full[..cut], &digest[..5])
}
