/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/auth_operator/src/config.rs
*
* Command-line and environment configuration of the operator.
*
* SPDX-License-Identifier: Apache-2.0
*/

use clap::Parser;
use ext_stores::{TlsFiles, DEFAULT_IDLE_TTL_MINUTES};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Rancher auth operator - CRTB reconciliation and the ext.cattle.io API
#[derive(Parser, Debug, Clone)]
#[command(name = "rancher-auth-operator")]
pub struct Config {
    /// Port of the Prometheus /metrics endpoint
    #[arg(long, env = "METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Listen address of the ext API server
    #[arg(long, env = "EXT_LISTEN", default_value = "0.0.0.0:6666")]
    pub ext_listen: SocketAddr,

    /// Serving certificate of the ext API server (PEM)
    #[arg(long, env = "EXT_TLS_CERT", requires = "ext_tls_key")]
    pub ext_tls_cert: Option<PathBuf>,

    /// Private key of the ext API server (PEM)
    #[arg(long, env = "EXT_TLS_KEY", requires = "ext_tls_cert")]
    pub ext_tls_key: Option<PathBuf>,

    /// Minutes of inactivity before a session token goes idle
    #[arg(
        long,
        env = "AUTH_USER_SESSION_IDLE_TTL_MINUTES",
        default_value_t = DEFAULT_IDLE_TTL_MINUTES,
        value_parser = clap::value_parser!(i64).range(1..)
    )]
    pub idle_ttl_minutes: i64,

    /// Export traces to a Jaeger agent
    #[arg(long, env = "ENABLE_JAEGER")]
    pub jaeger: bool,
}

impl Config {
    pub fn tls(&self) -> Option<TlsFiles> {
        match (&self.ext_tls_cert, &self.ext_tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }
}
