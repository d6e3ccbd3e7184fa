//! Logging and metric export setup.

use std::sync::OnceLock;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::Meter;
use opentelemetry_otlp::MetricExporter;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ReadEnv;

const OTEL_SERVICE_NAME: &str = "discord-fleet";

/// OTLP periodic reader pushes accumulated metrics at this cadence.
const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// JSON logs on stderr, filtered by `RUST_LOG`.
pub fn init_logger() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("discord_fleet=debug,info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_ids(true)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}

fn init_provider(resource: Resource) -> Result<SdkMeterProvider, Box<dyn std::error::Error>> {
    let exporter = MetricExporter::builder().with_http().build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(METRIC_EXPORT_INTERVAL)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build())
}

/// Meter for the fleet counters.
///
/// Exports over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` is set; otherwise the
/// global no-op provider backs it and counters cost nothing.
pub fn init_meter<E: ReadEnv>(env: &E, cluster_id: u32, prefix: &str) -> Meter {
    if env.var("OTEL_EXPORTER_OTLP_ENDPOINT").is_none() {
        tracing::info!("OTEL_EXPORTER_OTLP_ENDPOINT not set, metric export disabled");
        return opentelemetry::global::meter(OTEL_SERVICE_NAME);
    }

    let resource = Resource::builder()
        .with_service_name(OTEL_SERVICE_NAME)
        .with_attributes(vec![
            KeyValue::new("fleet.cluster_id", i64::from(cluster_id)),
            KeyValue::new("fleet.prefix", prefix.to_owned()),
        ])
        .build();

    match init_provider(resource) {
        Ok(provider) => {
            opentelemetry::global::set_meter_provider(provider.clone());
            if METER_PROVIDER.set(provider).is_err() {
                tracing::warn!("Meter provider already initialized; keeping existing provider");
            }
            tracing::info!("OTLP metric export enabled");
        }
        Err(e) => tracing::warn!(error = %e, "Metric export disabled (init failed)"),
    }

    opentelemetry::global::meter(OTEL_SERVICE_NAME)
}

/// Flush and stop the exporter, if one was started.
pub fn shutdown_meter() {
    if let Some(provider) = METER_PROVIDER.get() {
        tracing::info!("Shutting down OpenTelemetry meter provider");
        if let Err(e) = provider.force_flush() {
            eprintln!("Failed to flush meter provider: {e}");
        }
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to shutdown meter provider: {e}");
        }
    }
}
