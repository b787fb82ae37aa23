//! Consume product announcements, derive thumbnails and catalog records for them.
use std::{future::ready, sync::Arc};

use axum::{routing::get, Router};
use pix_common::metrics::{serve, setup_metrics_routes};
use pix_worker::{app_context::AppContext, config::Config, consumer, error::UnhandledError};
use tokio::{signal, task::JoinHandle};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "pix thumbnail worker"
}

fn start_health_liveness_server(config: &Config, context: Arc<AppContext>) -> JoinHandle<()> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || ready(context.health_registry.get_status())),
        );
    let router = setup_metrics_routes(router);
    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve health and metrics on {}: {}", bind, e);
        }
    })
}

async fn shutdown() {
    let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!("failed to register SIGTERM handler: {}", e);
            return std::future::pending().await;
        }
    };
    let mut interrupt = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
        Ok(interrupt) => interrupt,
        Err(e) => {
            error!("failed to register SIGINT handler: {}", e);
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> Result<(), UnhandledError> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_with_defaults()?;
    let context = Arc::new(AppContext::new(&config).await?);

    start_health_liveness_server(&config, context.clone());

    consumer::run(context, shutdown()).await?;

    info!("Consumer loop stopped, exiting");
    Ok(())
}
