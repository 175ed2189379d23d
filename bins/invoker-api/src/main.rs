mod handlers;
mod routes;
mod telemetry;

use anyhow::Context;
use axum::Router;
use chrono::{DateTime, Utc};
use invoker_common::config::Config;
use invoker_common::registry::{RegistryTagResolver, TagResolver};
use invoker_engine::{AuditRecorder, DockerGateway, ExecutionPipeline, InvocationService};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub service: InvocationService,
    pub tags: Arc<dyn TagResolver>,
    pub config: Arc<Config>,
    pub started_at: DateTime<Utc>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    telemetry::init(&config.log)?;

    info!("Invoker API booting...");

    let gateway = DockerGateway::connect().context("Failed to connect to Docker daemon")?;
    let pipeline = ExecutionPipeline::new(Arc::new(gateway))
        .with_cleanup_timeout(config.cleanup_timeout);
    let service = InvocationService::new(
        pipeline,
        AuditRecorder::tracing(config.content_preview_chars),
    );
    let tags = RegistryTagResolver::new(config.registry_scheme.clone())
        .context("Failed to build registry client")?;

    info!(
        registry = %config.registry,
        invocation_timeout_secs = config.invocation_timeout.as_secs(),
        content_preview_chars = config.content_preview_chars,
        "Invocation service ready"
    );

    let listen_addr = config.listen_addr.clone();
    let state = Arc::new(AppState {
        service,
        tags: Arc::new(tags),
        config: Arc::new(config),
        started_at: Utc::now(),
    });

    let app = Router::new()
        .merge(routes::routes())
        .with_state(state);

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", listen_addr))?;

    info!("HTTP server listening on {}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Invoker API shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal, finishing in-flight invocations...");
}
