/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/auth_operator/src/ext.rs
*
* Assembles the ext.cattle.io API server from its stores.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::metrics::Metrics;
use ext_stores::{AccessReviewer, ApiServer, TokenStore, UserActivityStore};
use management_api::ext::{GROUP, VERSION};
use management_api::Clientset;
use std::sync::Arc;

pub fn api_server(
    clients: &Clientset,
    reviewer: Arc<dyn AccessReviewer>,
    idle_ttl_minutes: i64,
    metrics: Metrics,
) -> ApiServer {
    ApiServer::new(GROUP, VERSION)
        .register(UserActivityStore::new(clients.tokens.clone(), idle_ttl_minutes))
        .register(TokenStore::new(clients.secrets.clone(), reviewer))
        .observe(move |outcome| metrics.observe_ext(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ext_stores::{RestError, UserInfo};
    use management_api::v3::{Token, TokenSpec};
    use management_api::FakeClientset;
    use prometheus::Registry;

    struct DenyAll;

    #[async_trait]
    impl AccessReviewer for DenyAll {
        async fn has_full_token_access(&self, _user: &UserInfo) -> Result<bool, RestError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn refreshes_are_counted() {
        let fakes = FakeClientset::new();
        fakes.tokens.seed(Token::new(
            "token-abc",
            TokenSpec {
                user_id: "u-alice".into(),
                ..Default::default()
            },
        ));
        let metrics = Metrics::register(&Registry::new()).unwrap();
        let server = Arc::new(api_server(&fakes.clientset(), Arc::new(DenyAll), 960, metrics.clone()));
        let routes = server.routes();

        let body = r#"{"apiVersion":"ext.cattle.io/v1","kind":"UserActivity","metadata":{"name":"ua_u-alice_token-abc"},"spec":{"tokenId":"token-abc"}}"#;
        for user in ["u-alice", "u-bob"] {
            warp::test::request()
                .method("POST")
                .path("/apis/ext.cattle.io/v1/useractivities")
                .header("X-Remote-User", user)
                .body(body)
                .reply(&routes)
                .await;
        }

        let refreshes = |result: &str| metrics.useractivity_refresh_total.with_label_values(&[result]).get();
        assert_eq!(refreshes("success"), 1);
        assert_eq!(refreshes("error"), 1);
    }
}
