//! Gateway binary: load configuration from the environment, build the
//! pipeline state, and serve the HTTP surface.

use anyhow::Context;
use llmgate_core::GatewayConfig;
use llmgate_gateway::{build_app_state, build_router};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env().context("loading configuration")?;

    if config.auth.jwt_secret.is_none() {
        tracing::warn!(
            "no JWT secret configured; only the development token will authenticate"
        );
    }

    let state = build_app_state(config).await?;
    let addr = state.config.listen_addr.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "gateway listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
