/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* Archive: k8s/operators/auth_operator/src/main.rs
*
* This file is the main entry point for the Rancher auth operator. It wires
* the typed clients, the RBAC lifecycle and the ext stores together and runs
* the long-lived tasks of the process.
*
* Architecture:
* 1.  **Initialization**: flags are parsed, telemetry is installed and a
* Kubernetes client is created from the ambient configuration.
* 2.  **Clients**: one `Clientset` backs both the CRTB lifecycle and the ext
* stores.
* 3.  **Concurrent Execution**: the CRTB controller, the ext API server and the
* metrics server run side by side under `tokio::join!`.
*
* SPDX-License-Identifier: Apache-2.0 */

use anyhow::Context as _;
use clap::Parser;
use ext_stores::SubjectAccessReviewer;
use kube::Client;
use management_api::Clientset;
use prometheus::Registry;
use rbac_manager::{ClientUserManager, CrtbLifecycle};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod config;
mod ext;
mod metrics;
mod controllers {
    pub mod crtb_controller;
}

use config::Config;
use controllers::crtb_controller::{self, Hooks};
use metrics::Metrics;

/// Runs the HTTP server to expose the /metrics endpoint.
async fn run_metrics_server(registry: Arc<Registry>, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "Starting metrics server");
    warp::serve(metrics::routes(registry)).run(addr).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // 1. Telemetry and logging
    let _telemetry = tracing_layer::init_telemetry("rancher-auth-operator", config.jaeger)?;

    // 2. Kubernetes client and typed clients
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let clients = Clientset::from_client(client.clone());

    // 3. Metrics
    let registry = Registry::new();
    let metrics = Metrics::register(&registry).context("failed to register metrics")?;
    let registry = Arc::new(registry);

    // 4. CRTB lifecycle and ext API server
    let user_manager = Arc::new(ClientUserManager::new(clients.users.clone()));
    let lifecycle = CrtbLifecycle::new(clients.clone(), user_manager);
    let hooks = Hooks::new(clients.clone(), lifecycle, metrics.clone());

    let reviewer = Arc::new(SubjectAccessReviewer::new(client.clone()));
    let api_server = Arc::new(ext::api_server(&clients, reviewer, config.idle_ttl_minutes, metrics));

    info!(
        ext_listen = %config.ext_listen,
        idle_ttl_minutes = config.idle_ttl_minutes,
        "Rancher auth operator starting"
    );

    tokio::join!(
        run_metrics_server(registry, config.metrics_port),
        crtb_controller::run(client, hooks),
        api_server.run(config.ext_listen, config.tls()),
    );

    Ok(())
}
