//! Tracing subscriber, OTLP span export and the Prometheus recorder.

use berth_api::MutationSampler;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::EnvFilter;

use crate::config::TracingSection;

/// Histogram buckets for `request_duration_seconds`, in seconds.
const DURATION_BUCKETS: [f64; 9] = [0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 20.0, 30.0];

pub fn init_subscriber(config: &TracingSection) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,berthd=debug,berth_apps=debug".parse().unwrap());
    if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Install the global OTLP tracer provider when an endpoint is configured.
///
/// Returns the provider so `main` can flush it on shutdown. Without an
/// endpoint the global stays a no-op and request spans go nowhere.
pub fn init_tracer(config: &TracingSection) -> anyhow::Result<Option<SdkTracerProvider>> {
    let Some(endpoint) = config.otlp_endpoint.as_deref() else {
        return Ok(None);
    };
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let sampler = MutationSampler::new(config.sample_ratio, config.force_sample_deny.clone());
    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(sampler)
        .with_resource(Resource::builder().with_service_name("berthd").build())
        .build();
    global::set_tracer_provider(provider.clone());
    Ok(Some(provider))
}

/// Install the process-global Prometheus recorder and hand back the
/// handle the API renders at `GET /metrics`.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("request_duration_seconds".to_string()),
            &DURATION_BUCKETS,
        )?
        .install_recorder()?;
    Ok(handle)
}
