mod app;
mod auth;
mod config;
mod cors;
mod error;
mod lifecycle;
mod routes;
mod shutdown;
mod state;
mod store;
mod users;

use tracing::{error, info};

use crate::config::AppConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        env = %config.env,
        port = config.port,
        origins = config.cors.allowed_origins.len(),
        origin_pattern = config.cors.origin_pattern.is_some(),
        "configuration loaded"
    );

    if let Err(e) = app::serve(config).await {
        error!(error = %format!("{e:#}"), "server failed");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "crm_backend=debug,tower_http=info".to_string());
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
}
