/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/auth_operator/src/metrics.rs
*
* This module defines the Prometheus metrics the auth operator exposes and
* the HTTP route serving them. The collectors are created once at startup,
* registered into the operator's registry and shared by cloning (clones
* update the same underlying counters).
*
* SPDX-License-Identifier: Apache-2.0
*/

use ext_stores::RequestOutcome;
use prometheus::{opts, Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::warn;
use warp::http::StatusCode;
use warp::Filter;

#[derive(Clone)]
pub struct Metrics {
    /// Hook runs, labeled by hook (`create`, `updated`, `remove`) and result.
    pub crtb_reconcile_total: IntCounterVec,
    /// Derived RBAC objects that received a current owner label.
    pub crtb_label_migrations_total: IntCounter,
    /// UserActivity refreshes served by the ext API server.
    pub useractivity_refresh_total: IntCounterVec,
}

fn result_label(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "error"
    }
}

impl Metrics {
    /// Creates the collectors and registers them into `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self {
            crtb_reconcile_total: IntCounterVec::new(
                opts!("crtb_reconcile_total", "Total number of ClusterRoleTemplateBinding hook runs."),
                &["hook", "result"],
            )?,
            crtb_label_migrations_total: IntCounter::with_opts(opts!(
                "crtb_label_migrations_total",
                "Total number of RBAC objects relabeled with a current binding owner key."
            ))?,
            useractivity_refresh_total: IntCounterVec::new(
                opts!("useractivity_refresh_total", "Total number of session activity refreshes."),
                &["result"],
            )?,
        };
        registry.register(Box::new(metrics.crtb_reconcile_total.clone()))?;
        registry.register(Box::new(metrics.crtb_label_migrations_total.clone()))?;
        registry.register(Box::new(metrics.useractivity_refresh_total.clone()))?;
        Ok(metrics)
    }

    pub fn record_hook(&self, hook: &str, ok: bool) {
        self.crtb_reconcile_total.with_label_values(&[hook, result_label(ok)]).inc();
    }

    /// Counts UserActivity creates; other ext requests are not tracked.
    pub fn observe_ext(&self, outcome: &RequestOutcome<'_>) {
        if outcome.resource == "useractivities" && outcome.verb == "create" {
            self.useractivity_refresh_total
                .with_label_values(&[result_label(outcome.code < 300)])
                .inc();
        }
    }
}

/// Renders the registry into the Prometheus text format.
async fn metrics_handler(registry: Arc<Registry>) -> Result<impl warp::Reply, Infallible> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    let (status, body) = match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => (StatusCode::OK, buffer),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string().into_bytes())
        }
    };
    Ok(warp::reply::with_status(
        warp::reply::with_header(body, "Content-Type", encoder.format_type()),
        status,
    ))
}

pub fn routes(registry: Arc<Registry>) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&registry)))
        .and_then(metrics_handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_are_served() {
        let registry = Registry::new();
        let metrics = Metrics::register(&registry).unwrap();
        metrics.record_hook("create", true);
        metrics.record_hook("remove", false);
        metrics.crtb_label_migrations_total.inc_by(3);
        metrics.observe_ext(&RequestOutcome { resource: "useractivities", verb: "create", code: 201 });
        metrics.observe_ext(&RequestOutcome { resource: "useractivities", verb: "create", code: 403 });
        metrics.observe_ext(&RequestOutcome { resource: "ranchertokens", verb: "create", code: 201 });

        let response = warp::test::request()
            .path("/metrics")
            .reply(&routes(Arc::new(registry)))
            .await;
        assert_eq!(response.status(), 200);
        let text = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(text.contains(r#"crtb_reconcile_total{hook="create",result="success"} 1"#));
        assert!(text.contains(r#"crtb_reconcile_total{hook="remove",result="error"} 1"#));
        assert!(text.contains("crtb_label_migrations_total 3"));
        assert!(text.contains(r#"useractivity_refresh_total{result="success"} 1"#));
        assert!(text.contains(r#"useractivity_refresh_total{result="error"} 1"#));
    }

    #[test]
    fn registering_twice_is_rejected() {
        let registry = Registry::new();
        Metrics::register(&registry).unwrap();
        assert!(Metrics::register(&registry).is_err());
    }
}
