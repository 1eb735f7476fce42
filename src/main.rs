mod app;
mod assistant;
mod config;
mod escalation;
mod platform;
mod store;
mod types;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::{app::AppState, config::Config};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fatal: {err}");
            std::process::exit(1);
        }
    };

    let port = config.port;
    let state = Arc::new(AppState::new(config));
    let router = app::build_router(state.clone());

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    tracing::info!("support bridge listening at http://localhost:{port}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server runtime failure");

    // Let in-flight turns finish before the process exits.
    app::await_active_turns(&state).await;
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
