//! ldapgate provisions POSIX accounts and groups in an LDAP directory.

#![forbid(unsafe_code)]
pub mod allocator;
pub mod config;
pub mod error;
pub mod ldap;
pub mod mail;
mod router;
pub mod telemetry;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::ldap::Directory;
use crate::mail::Notifier;
use crate::user::{Settings, UserService};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    headers: &[(header::HeaderName, &str)],
    body: axum::body::Body,
) -> axum::http::Response<axum::body::Body> {
    use tower::util::ServiceExt;

    let mut request = axum::http::Request::builder().method(method).uri(path);
    for (name, value) in headers {
        request = request.header(name, *value);
    }

    app.oneshot(request.body(body).unwrap()).await.unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub users: UserService,
    /// Set when Prometheus metrics are exposed.
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(
                    |chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                        tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                    },
                )
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(true)
                        .level(tracing::Level::INFO),
                )
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new()
                        .include_headers(true)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` goes to `metrics`.
        .route("/metrics", get(router::metrics::handler))
        .merge(router::users::router(state.clone()))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<config::Configuration>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let Some(cfg) = &config.ldap else {
        return Err("missing `ldap` entry on configuration file".into());
    };
    let ldap_config = ldap::LdapConfig::new(
        &cfg.address,
        ldap::domain_to_dn(&config.base_domain),
    );
    let directory = ldap::Ldap::connect(
        ldap_config,
        cfg.user.as_deref(),
        cfg.password.as_deref(),
    )
    .await?;

    let notifier = match &config.mail {
        Some(cfg) => {
            let mail = mail::MailManager::new(cfg).await?;
            Some(Arc::new(mail) as Arc<dyn Notifier>)
        },
        None => {
            tracing::warn!(
                "missing `mail` entry on configuration file, notifications disabled"
            );
            None
        },
    };

    let metrics = if config.telemetry.metrics {
        Some(telemetry::setup_metrics_recorder()?)
    } else {
        None
    };

    let users = UserService::new(
        Arc::new(directory) as Arc<dyn Directory>,
        notifier,
        Settings::from(config.as_ref()),
    );

    Ok(AppState {
        config,
        users,
        metrics,
    })
}
