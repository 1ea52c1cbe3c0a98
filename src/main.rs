use std::net::SocketAddr;

mod app;
mod auth;
mod config;
mod error;
mod mail;
mod rate_limit;
mod state;

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| config.environment.default_log_filter().to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(environment = ?config.environment, "starting userauth");

    let (app_state, resources) = state::AppState::init(config).await?;

    if let Err(e) = resources.migrate().await {
        tracing::error!(error = ?e, "startup aborted");
        resources.close().await;
        return Err(e);
    }

    let result = app::serve(app::build_app(app_state), addr).await;
    resources.close().await;
    result
}
