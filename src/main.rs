use std::path::PathBuf;

use clap::Parser;
use ldapgate::config::Configuration;
use ldapgate::{app, initialize_state, telemetry};
use opentelemetry::global;
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info,ldapgate=debug";

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "LDAPGATE_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };
    let fmt = tracing_subscriber::fmt::layer().with_filter(filter());

    // Read before the subscriber exists.
    let config = Configuration::default().path(args.config.clone()).read();

    let otlp = config.telemetry.otlp_endpoint.as_deref().and_then(|endpoint| {
        match telemetry::setup_tracer(endpoint) {
            Ok(provider) => {
                global::set_tracer_provider(provider);
            },
            Err(err) => eprintln!("cannot export traces to {endpoint}: {err}"),
        }
        telemetry::setup_logging(endpoint)
            .inspect_err(|err| {
                eprintln!("cannot export logs to {endpoint}: {err}")
            })
            .ok()
    });

    tracing_subscriber::registry()
        .with(fmt)
        .with(otlp.map(|bridge| bridge.with_filter(filter())))
        .init();

    if !args.config.is_file() {
        tracing::warn!(
            path = %args.config.display(),
            "configuration file not found, using fallback"
        );
    }

    let state = match initialize_state(config.clone()).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "cannot initialize state");
            std::process::exit(1);
        },
    };

    let listener = match TcpListener::bind(&config.address).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(address = %config.address, error = %err, "cannot bind");
            std::process::exit(1);
        },
    };
    tracing::info!(
        address = %config.address,
        version = config.version(),
        "server listening"
    );

    if let Err(err) = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server stopped");
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
