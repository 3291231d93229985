//! Telemetry setup for OpenTelemetry integration

use anyhow::Result;

const ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

#[cfg(feature = "telemetry")]
pub type OtelLayer = tracing_opentelemetry::OpenTelemetryLayer<
    tracing_subscriber::Registry,
    opentelemetry_sdk::trace::Tracer,
>;

#[cfg(not(feature = "telemetry"))]
pub type OtelLayer = tracing_subscriber::layer::Identity;

/// Build the OpenTelemetry layer if an endpoint is configured
///
/// Runs before the subscriber is installed, so nothing here can log.
///
/// # Environment Variables
///
/// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317)
/// - `OTEL_SERVICE_NAME`: Service name (default: workgate)
pub fn otel_layer() -> Result<Option<OtelLayer>> {
    let Ok(endpoint) = std::env::var(ENDPOINT_VAR) else {
        return Ok(None);
    };

    #[cfg(feature = "telemetry")]
    {
        init_telemetry_impl(&endpoint).map(Some)
    }

    #[cfg(not(feature = "telemetry"))]
    {
        let _ = endpoint;
        Ok(None)
    }
}

/// Log what `otel_layer` decided, once logging is up
pub fn report(enabled: bool) {
    match (enabled, std::env::var(ENDPOINT_VAR)) {
        (true, Ok(endpoint)) => tracing::info!(endpoint = %endpoint, "OpenTelemetry export enabled"),
        (false, Ok(_)) => {
            tracing::warn!("OpenTelemetry endpoint set but feature 'telemetry' not enabled");
            tracing::warn!("Rebuild with: cargo build --features telemetry");
        }
        _ => tracing::debug!("OpenTelemetry not configured ({} not set)", ENDPOINT_VAR),
    }
}

/// Flush pending spans
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(feature = "telemetry")]
fn init_telemetry_impl(endpoint: &str) -> Result<OtelLayer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "workgate".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();

    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}
