mod cleanup;
mod config;

use std::sync::Arc;

use tracing::info;

use parley_api::{AppState, AppStateInner};
use parley_crypto::PasswordHasher;
use parley_db::Database;
use parley_gateway::ActionDispatcher;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parley=debug,parley_gateway=debug,parley_api=debug,parley_db=info".into()
            }),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner::new(
        db,
        chrono::Duration::days(config.session_idle_days),
        PasswordHasher::new(config.pbkdf2_iterations),
    ));
    let dispatcher = ActionDispatcher::new(app_state.clone());

    // Background session cleanup
    tokio::spawn(cleanup::run_session_sweeper(
        app_state,
        config.session_sweep_secs,
    ));

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!("Parley server listening on {}", listener.local_addr()?);

    tokio::select! {
        _ = parley_gateway::serve(listener, dispatcher, config.max_frame_bytes) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down");
        }
    }

    Ok(())
}
