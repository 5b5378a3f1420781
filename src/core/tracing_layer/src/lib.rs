/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/core/tracing_layer/src/lib.rs
*
* This module initializes the telemetry pipeline for the auth operator: JSON
* logs filtered through `RUST_LOG` (default `info`), and optionally spans
* exported to a Jaeger agent with W3C trace-context propagation.
*
* SPDX-License-Identifier: Apache-2.0
*/

use opentelemetry::global;
use opentelemetry::trace::TraceError;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("failed to install the Jaeger pipeline: {0}")]
    Trace(#[from] TraceError),

    #[error("failed to register the tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Flushes and shuts down the tracer provider when dropped.
#[must_use = "dropping the guard shuts down trace export"]
pub struct TelemetryGuard {
    exporting: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.exporting {
            global::shutdown_tracer_provider();
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber for `service`. With `jaeger` set, spans are
/// batched to the agent configured through the `OTEL_EXPORTER_JAEGER_*`
/// environment variables.
pub fn init_telemetry(service: &str, jaeger: bool) -> Result<TelemetryGuard, TelemetryError> {
    let otel = if jaeger {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let tracer = opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name(service)
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(otel)
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
        .try_init()?;

    tracing::info!(service, jaeger, "Telemetry initialized");
    Ok(TelemetryGuard { exporting: jaeger })
}
