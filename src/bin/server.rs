//! HTTP server entry point

use ragline::api::{router, AppState};
use ragline::config::ServiceConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => ServiceConfig::from_file(&path)?,
        None => ServiceConfig::default(),
    };
    config.apply_env();
    config.validate()?;

    let bind_addr = config.api.bind_addr.clone();
    let state = AppState::new(config).await?;
    let app = router(state);

    info!("ragline {} listening on {bind_addr}", ragline::VERSION);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
