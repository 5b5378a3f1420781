/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/ext_stores/src/authz.rs
*
* Permission checks for the token store. A requester may act on tokens of
* other users only when it holds every verb on `ext.cattle.io/ranchertokens`.
* The answer comes from a SubjectAccessReview against the Kubernetes API
* server; a review that cannot be completed is an error, never a denial.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::rest::{RestError, UserInfo};
use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec};
use kube::api::{Api, PostParams};
use std::time::Duration;
use tracing::debug;

const REVIEW_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait AccessReviewer: Send + Sync {
    /// Whether `user` holds `*` on `ext.cattle.io/ranchertokens`.
    async fn has_full_token_access(&self, user: &UserInfo) -> Result<bool, RestError>;
}

pub struct SubjectAccessReviewer {
    client: kube::Client,
}

impl SubjectAccessReviewer {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

pub(crate) fn token_review(user: &UserInfo) -> SubjectAccessReview {
    SubjectAccessReview {
        spec: SubjectAccessReviewSpec {
            user: Some(user.name.clone()),
            uid: Some(user.uid.clone()).filter(|u| !u.is_empty()),
            groups: Some(user.groups.clone()),
            extra: Some(user.extra.clone()),
            resource_attributes: Some(ResourceAttributes {
                verb: Some("*".to_string()),
                resource: Some("ranchertokens".to_string()),
                group: Some(management_api::ext::GROUP.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[async_trait]
impl AccessReviewer for SubjectAccessReviewer {
    async fn has_full_token_access(&self, user: &UserInfo) -> Result<bool, RestError> {
        let api: Api<SubjectAccessReview> = Api::all(self.client.clone());
        let review = token_review(user);
        let pp = PostParams::default();
        let response = tokio::time::timeout(REVIEW_TIMEOUT, api.create(&pp, &review))
            .await
            .map_err(|_| RestError::Internal("unable to check token permissions: access review timed out".to_string()))?
            .map_err(|e| RestError::Internal(format!("unable to check token permissions: {e}")))?;

        let allowed = response.status.is_some_and(|s| s.allowed);
        debug!(user = %user.name, allowed, "Reviewed full token access");
        Ok(allowed)
    }
}
