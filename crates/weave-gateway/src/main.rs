use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

mod app;
mod backends;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weave_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > WEAVE_CONFIG env > ~/.weave/weave.toml
    let config_path = std::env::var("WEAVE_CONFIG").ok();
    let config = weave_core::config::WeaveConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({}), using defaults", e);
        weave_core::config::WeaveConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let state = Arc::new(app::AppState::new(config)?);
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, git_sha = env!("WEAVE_GIT_SHA"), "weave gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
