//! CLI entry: parse arguments, initialize tracing and hand back the action.
//!
//! The OTLP layer only comes up when `OTEL_EXPORTER_OTLP_ENDPOINT` is set;
//! local runs get the fmt layer alone so the binary works without a collector.

use crate::cli::{actions::Action, commands, dispatch::handler};
use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime::Tokio, trace, Resource};
use std::time::Duration;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const OTLP_EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Parse the command line, bring up tracing and return the selected action.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let verbosity = matches.get_one::<u8>("verbosity").map_or(0, |&v| v);
    init_tracing(verbosity)?;

    handler(&matches)
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // RUST_LOG overrides the -v count.
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level(verbosity).into())
        .from_env_lossy();

    let fmt_layer = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_target(false);

    let telemetry = match std::env::var(OTLP_ENDPOINT_ENV) {
        Ok(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(OTLP_EXPORT_TIMEOUT);
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(trace::config().with_resource(service_resource()))
                .install_batch(Tokio)?;
            Some(OpenTelemetryLayer::new(tracer))
        }
        Err(_) => None,
    };

    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(telemetry);

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn service_resource() -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("service.namespace", "auth"),
    ])
}

fn log_level(verbosity: u8) -> tracing::Level {
    match verbosity {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        3 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(log_level(0), tracing::Level::ERROR);
        assert_eq!(log_level(1), tracing::Level::WARN);
        assert_eq!(log_level(2), tracing::Level::INFO);
        assert_eq!(log_level(3), tracing::Level::DEBUG);
        assert_eq!(log_level(4), tracing::Level::TRACE);
        assert_eq!(log_level(250), tracing::Level::TRACE);
    }

    #[test]
    fn resource_names_the_service() {
        let resource = service_resource();
        assert_eq!(
            resource.get("service.name".into()),
            Some(env!("CARGO_PKG_NAME").into())
        );
        assert_eq!(resource.get("service.namespace".into()), Some("auth".into()));
    }
}
