use opentelemetry::trace::TraceId;
use tracing_subscriber::{prelude::*, util::TryInitError, EnvFilter, Layer, Registry};

/// Shape of the log lines written to stdout
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    /// One JSON object per line, for log shippers
    Json,
}

/// Fetch an opentelemetry::trace::TraceId as hex through the full tracing stack
pub fn get_trace_id() -> Option<TraceId> {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;

    match tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
    {
        TraceId::INVALID => None,
        valid => Some(valid),
    }
}

/// Span export is only wired when a collector endpoint is configured
#[cfg(feature = "telemetry")]
fn tracer_provider() -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};

    let endpoint = std::env::var("OPENTELEMETRY_ENDPOINT_URL").ok()?;
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .expect("Failed to create OTLP span exporter");

    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                Resource::builder()
                    .with_service_name("common-service-operator")
                    .build(),
            )
            .build(),
    )
}

/// Install the global subscriber. Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init(format: LogFormat) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let logger = match format {
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .boxed(),
    };

    #[cfg(feature = "telemetry")]
    let telemetry = tracer_provider().map(|provider| {
        use opentelemetry::trace::TracerProvider;
        let tracer = provider.tracer("common-service-operator");
        opentelemetry::global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    });
    #[cfg(not(feature = "telemetry"))]
    let telemetry: Option<tracing_subscriber::layer::Identity> = None;

    Registry::default()
        .with(telemetry)
        .with(logger)
        .with(env_filter)
        .try_init()
}

#[cfg(test)]
mod test {
    #[test]
    fn trace_id_is_absent_without_a_span() {
        assert_eq!(super::get_trace_id(), None);
    }
}
