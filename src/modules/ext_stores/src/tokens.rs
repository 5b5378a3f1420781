/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/ext_stores/src/tokens.rs
*
* RancherToken storage. Tokens live as Secrets in `cattle-token-data`; only
* the salted hash of the token value is persisted, and the plaintext is
* handed out exactly once, in the response to a create. Acting on another
* user's token requires full access to `ext.cattle.io/ranchertokens`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::authz::AccessReviewer;
use crate::hashing;
use crate::rest::{ResourceInfo, RestError, RestStorage, UserInfo};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use management_api::ext::{RancherToken, RancherTokenSpec, RancherTokenStatus};
use management_api::{ResourceClient, Selector};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const TOKEN_NAMESPACE: &str = "cattle-token-data";

const USER_ID_KEY: &str = "userID";
const CLUSTER_NAME_KEY: &str = "clusterName";
const TTL_KEY: &str = "ttl";
const ENABLED_KEY: &str = "enabled";
const HASHED_TOKEN_KEY: &str = "hashedToken";

pub struct TokenStore {
    secrets: Arc<dyn ResourceClient<Secret>>,
    reviewer: Arc<dyn AccessReviewer>,
}

fn field(secret: &Secret, key: &str) -> String {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        .unwrap_or_default()
}

/// Reads a token back from its backing secret. The plaintext is never stored.
fn token_from_secret(secret: &Secret) -> Result<RancherToken, RestError> {
    let user_id = field(secret, USER_ID_KEY);
    if user_id.is_empty() {
        return Err(RestError::Internal(format!(
            "token secret {} has no {USER_ID_KEY}",
            secret.name_any()
        )));
    }
    Ok(RancherToken {
        metadata: ObjectMeta {
            name: secret.metadata.name.clone(),
            namespace: Some(TOKEN_NAMESPACE.to_string()),
            uid: secret.metadata.uid.clone(),
            resource_version: secret.metadata.resource_version.clone(),
            creation_timestamp: secret.metadata.creation_timestamp.clone(),
            labels: secret.metadata.labels.clone(),
            annotations: secret.metadata.annotations.clone(),
            ..Default::default()
        },
        spec: RancherTokenSpec {
            user_id,
            cluster_name: field(secret, CLUSTER_NAME_KEY),
            ttl: field(secret, TTL_KEY),
            enabled: field(secret, ENABLED_KEY),
        },
        status: Some(RancherTokenStatus {
            plaintext_token: String::new(),
            hashed_token: field(secret, HASHED_TOKEN_KEY),
        }),
    })
}

fn secret_data(spec: &RancherTokenSpec, hashed: &str) -> BTreeMap<String, ByteString> {
    [
        (USER_ID_KEY, spec.user_id.as_str()),
        (CLUSTER_NAME_KEY, spec.cluster_name.as_str()),
        (TTL_KEY, spec.ttl.as_str()),
        (ENABLED_KEY, spec.enabled.as_str()),
        (HASHED_TOKEN_KEY, hashed),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
    .collect()
}

fn strip(mut token: RancherToken) -> RancherToken {
    token.status = Some(RancherTokenStatus::default());
    token
}

fn check_namespace(namespace: Option<&str>) -> Result<(), RestError> {
    match namespace {
        Some(ns) if ns != TOKEN_NAMESPACE => Err(RestError::NotFound(format!(
            "ranchertokens are only served from namespace {TOKEN_NAMESPACE}"
        ))),
        _ => Ok(()),
    }
}

impl TokenStore {
    pub fn new(secrets: Arc<dyn ResourceClient<Secret>>, reviewer: Arc<dyn AccessReviewer>) -> Self {
        Self { secrets, reviewer }
    }

    async fn authorize(&self, user: &UserInfo, owner: &str) -> Result<(), RestError> {
        if owner == user.name || self.reviewer.has_full_token_access(user).await? {
            return Ok(());
        }
        Err(RestError::Forbidden(format!(
            "user {} is not allowed to access tokens of user {owner}",
            user.name
        )))
    }

    async fn fetch(&self, name: &str) -> Result<(Secret, RancherToken), RestError> {
        let secret = self.secrets.get(Some(TOKEN_NAMESPACE), name).await?;
        let token = token_from_secret(&secret)?;
        Ok((secret, token))
    }
}

#[async_trait]
impl RestStorage for TokenStore {
    type Object = RancherToken;

    fn info(&self) -> ResourceInfo {
        ResourceInfo {
            name: "ranchertokens",
            singular: "ranchertoken",
            kind: "RancherToken",
            namespaced: true,
            verbs: &["create", "delete", "get", "list", "update"],
        }
    }

    async fn create(
        &self,
        user: &UserInfo,
        namespace: Option<&str>,
        mut token: RancherToken,
    ) -> Result<RancherToken, RestError> {
        check_namespace(namespace.or(token.metadata.namespace.as_deref()))?;
        if token.spec.user_id.is_empty() {
            token.spec.user_id = user.name.clone();
        }
        self.authorize(user, &token.spec.user_id).await?;

        let plaintext = token
            .status
            .as_ref()
            .map(|s| s.plaintext_token.clone())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(hashing::generate_token);
        let hashed = hashing::create_hash(&plaintext);

        let secret = Secret {
            metadata: ObjectMeta {
                name: token.metadata.name.clone(),
                generate_name: token.metadata.generate_name.clone(),
                namespace: Some(TOKEN_NAMESPACE.to_string()),
                labels: token.metadata.labels.clone(),
                annotations: token.metadata.annotations.clone(),
                ..Default::default()
            },
            data: Some(secret_data(&token.spec, &hashed)),
            ..Default::default()
        };
        let created = self.secrets.create(&secret).await?;
        info!(token = %created.name_any(), owner = %token.spec.user_id, "Created token");

        let mut out = token_from_secret(&created)?;
        out.status = Some(RancherTokenStatus {
            plaintext_token: plaintext,
            hashed_token: String::new(),
        });
        Ok(out)
    }

    async fn update(
        &self,
        user: &UserInfo,
        namespace: Option<&str>,
        name: &str,
        token: RancherToken,
    ) -> Result<RancherToken, RestError> {
        check_namespace(namespace)?;
        if token.metadata.name.as_deref().is_some_and(|n| n != name) {
            return Err(RestError::BadRequest(format!(
                "token name {} does not match {name}",
                token.name_any()
            )));
        }
        let (mut secret, current) = self.fetch(name).await?;
        self.authorize(user, &current.spec.user_id).await?;
        if token.spec.user_id != current.spec.user_id {
            self.authorize(user, &token.spec.user_id).await?;
        }

        let hashed = current.status.map(|s| s.hashed_token).unwrap_or_default();
        secret.data = Some(secret_data(&token.spec, &hashed));
        if token.metadata.labels.is_some() {
            secret.metadata.labels = token.metadata.labels.clone();
        }
        if token.metadata.annotations.is_some() {
            secret.metadata.annotations = token.metadata.annotations.clone();
        }
        let updated = self.secrets.update(&secret).await?;
        Ok(strip(token_from_secret(&updated)?))
    }

    async fn get(&self, user: &UserInfo, namespace: Option<&str>, name: &str) -> Result<RancherToken, RestError> {
        check_namespace(namespace)?;
        let (_, token) = self.fetch(name).await?;
        self.authorize(user, &token.spec.user_id).await?;
        Ok(strip(token))
    }

    async fn list(&self, user: &UserInfo, namespace: Option<&str>) -> Result<Vec<RancherToken>, RestError> {
        if check_namespace(namespace).is_err() {
            return Ok(Vec::new());
        }
        let full_access = self.reviewer.has_full_token_access(user).await?;
        let secrets = self.secrets.list(Some(TOKEN_NAMESPACE), &Selector::everything()).await?;

        let mut tokens = Vec::new();
        for secret in &secrets {
            let token = match token_from_secret(secret) {
                Ok(token) => token,
                Err(e) => {
                    warn!(secret = %secret.name_any(), error = %e, "Skipping malformed token secret");
                    continue;
                }
            };
            if full_access || token.spec.user_id == user.name {
                tokens.push(strip(token));
            }
        }
        Ok(tokens)
    }

    async fn delete(&self, user: &UserInfo, namespace: Option<&str>, name: &str) -> Result<(), RestError> {
        check_namespace(namespace)?;
        let (_, token) = self.fetch(name).await?;
        self.authorize(user, &token.spec.user_id).await?;
        match self.secrets.delete(Some(TOKEN_NAMESPACE), name).await {
            Err(e) if !e.is_not_found() => Err(e.into()),
            _ => {
                info!(token = name, "Deleted token");
                Ok(())
            }
        }
    }
}
