/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/ext_stores/src/lib.rs
*
* Virtual resources of the ext.cattle.io API group and the aggregated API
* server that exposes them. None of these resources is stored in etcd: the
* stores compute them from Tokens and Secrets on every request.
*
* Architecture:
* - `rest`: the storage trait, requester identity and HTTP-mapped errors.
* - `useractivity`: session idle-timeout refresh.
* - `tokens` / `hashing` / `authz`: opaque tokens backed by Secrets, their
*   hashing and the cross-user access review.
* - `apiserver`: routing, discovery, authentication headers and content
*   negotiation on top of `warp`.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod apiserver;
pub mod authz;
pub mod hashing;
pub mod rest;
pub mod tokens;
pub mod useractivity;

pub use apiserver::{ApiServer, RequestOutcome, TlsFiles};
pub use authz::{AccessReviewer, SubjectAccessReviewer};
pub use rest::{ResourceInfo, RestError, RestStorage, UserInfo};
pub use tokens::{TokenStore, TOKEN_NAMESPACE};
pub use useractivity::{UserActivityStore, DEFAULT_IDLE_TTL_MINUTES};
