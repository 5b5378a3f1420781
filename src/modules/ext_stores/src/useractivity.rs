/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/ext_stores/src/useractivity.rs
*
* UserActivity storage. Creating `ua_<user>_<token>` records activity on a
* session token and pushes its idle timeout forward; getting it reports the
* current timeout. Nothing is stored beyond the token's `lastIdleTimeout`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::rest::{ResourceInfo, RestError, RestStorage, UserInfo};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use management_api::ext::{UserActivity, UserActivitySpec, UserActivityStatus};
use management_api::v3::Token;
use management_api::{retry_on_conflict, Backoff, ResourceClient};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_IDLE_TTL_MINUTES: i64 = 960;
const NAME_PREFIX: &str = "ua";

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct UserActivityStore {
    tokens: Arc<dyn ResourceClient<Token>>,
    idle_ttl: Duration,
    clock: Clock,
}

pub fn user_activity_name(user: &str, token: &str) -> Result<String, RestError> {
    if user.is_empty() || token.is_empty() {
        return Err(RestError::BadRequest("user and token are both required".to_string()));
    }
    Ok(format!("{NAME_PREFIX}_{user}_{token}"))
}

/// Splits `ua_<user>_<token>` into its user and token parts.
pub fn parse_user_activity_name(name: &str) -> Result<(String, String), RestError> {
    let parts: Vec<&str> = name.split('_').collect();
    match parts.as_slice() {
        [NAME_PREFIX, user, token] if !user.is_empty() && !token.is_empty() => {
            Ok((user.to_string(), token.to_string()))
        }
        _ => Err(RestError::BadRequest(format!("invalid useractivity name {name}"))),
    }
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl UserActivityStore {
    pub fn new(tokens: Arc<dyn ResourceClient<Token>>, idle_ttl_minutes: i64) -> Self {
        Self {
            tokens,
            idle_ttl: Duration::minutes(idle_ttl_minutes),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    async fn token(&self, name: &str) -> Result<Token, RestError> {
        self.tokens.get(None, name).await.map_err(|e| {
            if e.is_not_found() {
                RestError::NotFound(format!("failed to get token {name}"))
            } else {
                RestError::Internal(format!("failed to get token {name}: {e}"))
            }
        })
    }

    async fn store_idle_timeout(&self, name: &str, timeout: DateTime<Utc>) -> Result<(), RestError> {
        retry_on_conflict(Backoff::default(), || async {
            let mut token = self.tokens.get(None, name).await?;
            token.spec.last_idle_timeout = Some(timeout);
            self.tokens.update(&token).await.map(|_| ())
        })
        .await
        .map_err(|e| RestError::Internal(format!("failed to update token {name}: {e}")))
    }
}

#[async_trait]
impl RestStorage for UserActivityStore {
    type Object = UserActivity;

    fn info(&self) -> ResourceInfo {
        ResourceInfo {
            name: "useractivities",
            singular: "useractivity",
            kind: "UserActivity",
            namespaced: false,
            verbs: &["create", "get"],
        }
    }

    async fn create(
        &self,
        user: &UserInfo,
        _namespace: Option<&str>,
        activity: UserActivity,
    ) -> Result<UserActivity, RestError> {
        let token = self.token(&activity.spec.token_id).await?;
        if token.spec.user_id != user.name {
            return Err(RestError::Forbidden(format!(
                "user {} cannot refresh activity of token {}",
                user.name,
                token.name_any()
            )));
        }
        let expected = user_activity_name(&token.spec.user_id, &token.name_any())?;
        if activity.name_any() != expected {
            return Err(RestError::BadRequest(format!(
                "useractivity name mismatch: have {} - expected {expected}",
                activity.name_any()
            )));
        }

        let now = (self.clock)();
        let timeout = now + self.idle_ttl;
        self.store_idle_timeout(&token.name_any(), timeout).await?;
        info!(activity = %expected, timeout = %rfc3339(timeout), "Refreshed session idle timeout");

        Ok(UserActivity {
            metadata: ObjectMeta {
                name: Some(expected),
                ..Default::default()
            },
            spec: UserActivitySpec { token_id: token.name_any() },
            status: Some(UserActivityStatus {
                last_activity: rfc3339(now),
                current_timeout: rfc3339(timeout),
            }),
        })
    }

    async fn get(&self, user: &UserInfo, _namespace: Option<&str>, name: &str) -> Result<UserActivity, RestError> {
        let (activity_user, token_name) = parse_user_activity_name(name)?;
        let token = self.token(&token_name).await?;
        if activity_user != token.spec.user_id || activity_user != user.name {
            return Err(RestError::Forbidden(format!(
                "user {} cannot read useractivity {name}",
                user.name
            )));
        }
        debug!(activity = name, "Reading session idle timeout");

        Ok(UserActivity {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: UserActivitySpec { token_id: token_name },
            status: Some(UserActivityStatus {
                last_activity: String::new(),
                current_timeout: token.spec.last_idle_timeout.map(rfc3339).unwrap_or_default(),
            }),
        })
    }
}
