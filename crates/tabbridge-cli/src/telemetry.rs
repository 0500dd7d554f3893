//! `tracing` subscriber setup with optional OpenTelemetry export.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `TABBRIDGE_LOG_FORMAT=json` | Newline-delimited JSON logs. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL. Spans are exported when set. |

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Hold the returned guard until exit; dropping
/// it flushes pending spans.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = std::env::var("TABBRIDGE_LOG_FORMAT").as_deref() == Ok("json");

    let provider = build_provider(service_name);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("tabbridge")));

    let registry = tracing_subscriber::registry().with(env_filter).with(otel_layer);
    if use_json {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true).json())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true).compact())
            .init();
    }

    TracerProviderGuard(provider)
}

/// Owns the OTLP tracer provider, if one was installed. Flushes and shuts it
/// down when dropped at the end of `main`.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        // The subscriber may already be gone; report on stderr.
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("tabbridge: tracer shutdown failed: {e}");
        }
    }
}

/// Span export is enabled only by `OTEL_EXPORTER_OTLP_ENDPOINT`. An exporter
/// that fails to build is reported and skipped.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint.as_str())
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("tabbridge: span export to {endpoint} disabled: {e}");
            return None;
        }
    };

    let provider = SdkTracerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_string())
                .build(),
        )
        // Synchronous export: no runtime exists yet when this runs.
        .with_simple_exporter(exporter)
        .build();
    Some(provider)
}
