mod app;
mod config;
mod handlers;
mod ledger;
mod models;
mod service;
mod state;
mod store;
mod validation;

use status_common::{bind_listener, init_tracing, shutdown_signal};

use crate::config::StatusConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    let config = StatusConfig::from_env();
    let _guards = init_tracing("status-service", &config.log_options());

    tracing::info!(
        port = config.port,
        data_dir = %config.data_dir.display(),
        max_history = config.max_history,
        api_key = config.api_key.is_some(),
        debug = config.debug,
        "status service starting"
    );

    let port = config.port;
    let state = AppState::open(config)
        .await
        .expect("open data directory");

    let app = app::build_router(state);
    let listener = bind_listener(port).await;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("serve");
}
