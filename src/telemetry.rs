//! Telemetry for the gateway.
//! OTLP export of spans and logs, plus the Prometheus recorder and the
//! provisioning counters it exposes.
use axum::extract::{MatchedPath, Request};
use axum::http::Version;
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::{Unit, gauge};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle,
};
use opentelemetry::trace::TraceError;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{LogError, SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::time::sleep;

use std::time::{Duration, Instant};

const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
const SYSTEM_REFRESH: Duration = Duration::from_secs(10);

const HTTP_REQUESTS: &str = "http_requests_total";
const HTTP_DURATION: &str = "http_requests_duration_seconds";
const ACCOUNTS_CREATED: &str = "accounts_created_total";
const PROVISIONING_CONFLICTS: &str = "provisioning_conflicts_total";
const UID_RANGE_EXHAUSTED: &str = "uid_range_exhausted_total";

fn resources() -> Resource {
    Resource::builder().with_service_name(SERVICE_NAME).build()
}

/// Create tracer exporting spans to an OTLP collector.
pub fn setup_tracer(endpoint: &str) -> Result<SdkTracerProvider, TraceError> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resources())
        .build())
}

/// Create recorder for Prometheus metrics.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    metrics::describe_gauge!(
        "process_cpu_usage",
        Unit::Percent,
        "CPU usage of the process in percentage."
    );
    metrics::describe_gauge!(
        "process_memory_used_bytes",
        Unit::Bytes,
        "Total process memory in bytes."
    );
    metrics::describe_counter!(
        ACCOUNTS_CREATED,
        Unit::Count,
        "Accounts provisioned in the directory, by domain."
    );
    metrics::describe_counter!(
        PROVISIONING_CONFLICTS,
        Unit::Count,
        "Provisioning requests refused because an entry already exists."
    );
    metrics::describe_counter!(
        UID_RANGE_EXHAUSTED,
        Unit::Count,
        "Provisioning requests refused for lack of a free uid."
    );
    metrics::describe_histogram!(
        HTTP_DURATION,
        Unit::Seconds,
        "HTTP request latency by route."
    );

    let mut system = System::new_with_specifics(RefreshKind::nothing());
    let pid = Pid::from_u32(std::process::id());

    tokio::spawn(async move {
        loop {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_memory().with_cpu(),
            );

            if let Some(process) = system.process(pid) {
                gauge!("process_memory_used_bytes").set(process.memory() as f64);
                gauge!("process_cpu_usage").set(process.cpu_usage() as f64);
            }

            sleep(SYSTEM_REFRESH).await;
        }
    });

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_DURATION.to_owned()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()
}

/// Create OTLP exporter for logs.
pub fn setup_logging(
    endpoint: &str,
) -> Result<OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>, LogError>
{
    let exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = SdkLoggerProvider::builder()
        .with_resource(resources())
        .with_batch_exporter(exporter)
        .build();
    Ok(OpenTelemetryTracingBridge::new(&provider))
}

/// Reason a provisioning request ended with a 409.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conflict {
    Username,
    FullName,
    Group,
}

impl Conflict {
    fn label(self) -> &'static str {
        match self {
            Conflict::Username => "username",
            Conflict::FullName => "full_name",
            Conflict::Group => "group",
        }
    }
}

/// Count an account written to the directory.
pub fn account_created(domain: &str) {
    metrics::counter!(ACCOUNTS_CREATED, "domain" => domain.to_owned())
        .increment(1);
}

/// Count a request refused because an entry already exists.
pub fn provisioning_conflict(reason: Conflict) {
    metrics::counter!(PROVISIONING_CONFLICTS, "reason" => reason.label())
        .increment(1);
}

/// Count a request refused because no uid is left in the range.
pub fn range_exhausted() {
    metrics::counter!(UID_RANGE_EXHAUSTED).increment(1);
}

fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "UNKNOWN",
    }
}

/// Record request count and latency per matched route.
pub async fn track(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>()
    {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().to_string();
    let version = version_label(req.version());

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
        ("version", version.to_owned()),
    ];
    metrics::counter!(HTTP_REQUESTS, &labels).increment(1);
    metrics::histogram!(HTTP_DURATION, &labels).record(latency);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_label() {
        assert_eq!(version_label(Version::HTTP_11), "HTTP/1.1");
        assert_eq!(version_label(Version::HTTP_2), "HTTP/2");
    }

    #[test]
    fn test_conflict_labels() {
        assert_eq!(Conflict::Username.label(), "username");
        assert_eq!(Conflict::FullName.label(), "full_name");
        assert_eq!(Conflict::Group.label(), "group");
    }

    #[test]
    fn test_counters_without_recorder() {
        // No recorder installed: every helper is a no-op.
        account_created("example.com");
        provisioning_conflict(Conflict::Group);
        range_exhausted();
    }
}
