//! Tracing subscriber initialization for workflow runs.
//!
//! Engine crates only emit `tracing` events; installing a subscriber is the
//! embedding application's call. `init_tracing` wires a structured `fmt`
//! layer (human-readable or JSON lines) and can bridge spans to OpenTelemetry
//! with a stdout exporter for local inspection of run/step spans.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use std::sync::OnceLock;

/// Held so the exporter can be flushed at process exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Subscriber options.
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Emit one JSON object per log line instead of the human format.
    pub json: bool,
    /// Bridge spans to OpenTelemetry (stdout exporter; swap for OTLP in
    /// production).
    pub otel: bool,
    /// Filter used when `RUST_LOG` is unset, e.g. `"botwright=debug"`.
    pub default_filter: Option<String>,
}

/// Install the global tracing subscriber.
///
/// Respects `RUST_LOG`, falling back to `default_filter` and then to `info`.
/// Span close timing is recorded so step and run durations show up in logs.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(config: TracingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let fallback = config.default_filter.as_deref().unwrap_or("info");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![env_filter.boxed()];

    if config.json {
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
        );
    } else {
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
        );
    }

    if config.otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("botwright");
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        layers.push(tracing_opentelemetry::layer().with_tracer(tracer).boxed());
    }

    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(())
}

/// Flush buffered spans and shut down the OpenTelemetry provider.
///
/// No-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}
