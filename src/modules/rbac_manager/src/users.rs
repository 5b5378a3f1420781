/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/rbac_manager/src/users.rs
*
* User records keyed by principal. `ensure_user` is idempotent: a user is
* found through a label carrying a digest of the principal and confirmed by
* its `principalIds`; only when none matches is a new user created.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::Error;
use async_trait::async_trait;
use kube::api::ObjectMeta;
use management_api::v3::{User, UserSpec};
use management_api::{ResourceClient, Selector};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub const PRINCIPAL_HASH_LABEL: &str = "authz.management.cattle.io/principal-hash";
pub const LOCAL_PRINCIPAL_PREFIX: &str = "local://";

#[async_trait]
pub trait UserManager: Send + Sync {
    /// Returns the user owning `principal`, creating it when absent.
    async fn ensure_user(&self, principal: &str, display_name: &str) -> Result<User, Error>;
}

/// Label-safe digest of a principal ID.
pub fn principal_hash(principal: &str) -> String {
    hex::encode(&Sha256::digest(principal.as_bytes())[..16])
}

pub struct ClientUserManager {
    users: Arc<dyn ResourceClient<User>>,
}

impl ClientUserManager {
    pub fn new(users: Arc<dyn ResourceClient<User>>) -> Self {
        Self { users }
    }

    async fn find_user(&self, principal: &str) -> Result<Option<User>, Error> {
        // Local principals name their user directly.
        if let Some(name) = principal.strip_prefix(LOCAL_PRINCIPAL_PREFIX) {
            return match self.users.get(None, name).await {
                Ok(user) => Ok(Some(user)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e.into()),
            };
        }

        let selector = Selector::from_set([(PRINCIPAL_HASH_LABEL, principal_hash(principal))]);
        let users = self.users.list(None, &selector).await?;
        Ok(users
            .into_iter()
            .find(|u| u.spec.principal_ids.iter().any(|p| p == principal)))
    }
}

#[async_trait]
impl UserManager for ClientUserManager {
    async fn ensure_user(&self, principal: &str, display_name: &str) -> Result<User, Error> {
        if let Some(user) = self.find_user(principal).await? {
            return Ok(user);
        }

        let user = User {
            metadata: ObjectMeta {
                generate_name: Some("u-".to_string()),
                labels: Some(BTreeMap::from([(
                    PRINCIPAL_HASH_LABEL.to_string(),
                    principal_hash(principal),
                )])),
                ..Default::default()
            },
            spec: UserSpec {
                display_name: display_name.to_string(),
                username: String::new(),
                principal_ids: vec![principal.to_string()],
            },
        };
        let created = self.users.create(&user).await?;
        info!(
            user = created.metadata.name.as_deref().unwrap_or_default(),
            principal, "Created user for principal"
        );
        Ok(created)
    }
}
