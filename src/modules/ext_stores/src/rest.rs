/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/ext_stores/src/rest.rs
*
* The storage contract behind every virtual resource. A store implements the
* verbs that make sense for it; the rest answer "method not supported". The
* API server turns `RestError`s into `meta/v1 Status` responses.
*
* SPDX-License-Identifier: Apache-2.0
*/

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ListMeta, Status};
use management_api::ClientError;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// The authenticated requester, as forwarded by the Kubernetes API server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub uid: String,
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("method {verb} not supported on {resource}")]
    MethodNotSupported { resource: String, verb: &'static str },

    #[error("{0}")]
    NotAcceptable(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl RestError {
    pub fn code(&self) -> u16 {
        match self {
            RestError::BadRequest(_) => 400,
            RestError::Unauthorized(_) => 401,
            RestError::Forbidden(_) => 403,
            RestError::NotFound(_) => 404,
            RestError::MethodNotSupported { .. } => 405,
            RestError::NotAcceptable(_) => 406,
            RestError::Conflict(_) => 409,
            RestError::Internal(_) => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            RestError::BadRequest(_) => "BadRequest",
            RestError::Unauthorized(_) => "Unauthorized",
            RestError::Forbidden(_) => "Forbidden",
            RestError::NotFound(_) => "NotFound",
            RestError::MethodNotSupported { .. } => "MethodNotAllowed",
            RestError::NotAcceptable(_) => "NotAcceptable",
            RestError::Conflict(_) => "Conflict",
            RestError::Internal(_) => "InternalError",
        }
    }

    pub fn unsupported(resource: &str, verb: &'static str) -> Self {
        RestError::MethodNotSupported { resource: resource.to_string(), verb }
    }

    pub fn to_status(&self) -> Status {
        Status {
            code: Some(i32::from(self.code())),
            message: Some(self.to_string()),
            reason: Some(self.reason().to_string()),
            status: Some("Failure".to_string()),
            metadata: ListMeta::default(),
            details: None,
        }
    }
}

impl From<ClientError> for RestError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::NotFound { .. } => RestError::NotFound(error.to_string()),
            ClientError::AlreadyExists { .. } | ClientError::Conflict { .. } => RestError::Conflict(error.to_string()),
            ClientError::Invalid { .. } => RestError::BadRequest(error.to_string()),
            ClientError::Kube(_) => RestError::Internal(error.to_string()),
        }
    }
}

/// Discovery metadata of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    /// Plural resource name, as used in paths.
    pub name: &'static str,
    pub singular: &'static str,
    pub kind: &'static str,
    pub namespaced: bool,
    pub verbs: &'static [&'static str],
}

#[async_trait]
pub trait RestStorage: Send + Sync + 'static {
    type Object: Serialize + DeserializeOwned + Send + Sync + 'static;

    fn info(&self) -> ResourceInfo;

    async fn get(&self, _user: &UserInfo, _namespace: Option<&str>, _name: &str) -> Result<Self::Object, RestError> {
        Err(RestError::unsupported(self.info().name, "get"))
    }

    async fn list(&self, _user: &UserInfo, _namespace: Option<&str>) -> Result<Vec<Self::Object>, RestError> {
        Err(RestError::unsupported(self.info().name, "list"))
    }

    async fn create(
        &self,
        _user: &UserInfo,
        _namespace: Option<&str>,
        _object: Self::Object,
    ) -> Result<Self::Object, RestError> {
        Err(RestError::unsupported(self.info().name, "create"))
    }

    async fn update(
        &self,
        _user: &UserInfo,
        _namespace: Option<&str>,
        _name: &str,
        _object: Self::Object,
    ) -> Result<Self::Object, RestError> {
        Err(RestError::unsupported(self.info().name, "update"))
    }

    async fn delete(&self, _user: &UserInfo, _namespace: Option<&str>, _name: &str) -> Result<(), RestError> {
        Err(RestError::unsupported(self.info().name, "delete"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_status() {
        let status = RestError::unsupported("useractivities", "list").to_status();
        assert_eq!(status.code, Some(405));
        assert_eq!(status.reason.as_deref(), Some("MethodNotAllowed"));
        assert_eq!(status.message.as_deref(), Some("method list not supported on useractivities"));
        assert_eq!(status.status.as_deref(), Some("Failure"));

        assert_eq!(RestError::Forbidden("no".into()).code(), 403);
        assert_eq!(RestError::Internal("boom".into()).code(), 500);
    }

    #[test]
    fn client_errors_keep_their_meaning() {
        let missing = ClientError::NotFound { kind: "Token".into(), name: "t-1".into() };
        assert_eq!(RestError::from(missing).code(), 404);
        let taken = ClientError::AlreadyExists { kind: "Secret".into(), name: "t-1".into() };
        assert_eq!(RestError::from(taken).code(), 409);
        let invalid = ClientError::Invalid { kind: "Secret".into(), message: "no name".into() };
        assert_eq!(RestError::from(invalid).code(), 400);
    }
}
