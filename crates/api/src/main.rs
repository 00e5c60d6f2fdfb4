use std::sync::Arc;

use anyhow::Context;

use citylayout_api::app::{self, AuthSettings};
use citylayout_auth::Role;
use citylayout_infra::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    citylayout_observability::init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;

    let jwt_secret = config.jwt_secret.clone().unwrap_or_else(|| {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });

    let services = Arc::new(
        app::build_services(&config)
            .await
            .context("failed to build layout services")?,
    );
    let rpc_worker = services
        .spawn_rpc_worker(&config)
        .await
        .context("failed to start rpc responder")?;

    let router = app::build_app(
        services,
        AuthSettings {
            jwt_secret,
            required_role: Role::new(config.required_role.clone()),
        },
    );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    tracing::info!("shutting down rpc responder");
    rpc_worker.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
