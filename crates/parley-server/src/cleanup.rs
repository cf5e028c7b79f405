use std::time::Duration;

use tracing::{info, warn};

use parley_api::{AppState, blocking};

/// Background task that purges sessions idle past the window.
pub async fn run_session_sweeper(state: AppState, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match blocking(&state, |s| s.sessions.purge_expired()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Cleanup: purged {} expired sessions", count);
                }
            }
            Err(e) => {
                warn!("Session cleanup error: {:?}", e);
            }
        }
    }
}
