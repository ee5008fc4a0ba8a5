//! Server bootstrap: tracing, state construction, background tasks,
//! and the axum listener.

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::routes::router;
use crate::state::AppState;

/// Install the global tracing subscriber; `RUST_LOG` controls the
/// filter, defaulting to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Build the application and serve it until the process exits.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let address = config.bind_address();
    let state = AppState::new(config);
    state.spawn_background();

    let app = router(state.clone()).layer(tower_http::trace::TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, "ferrofhir server listening");

    axum::serve(listener, app).await?;
    state.shutdown();
    Ok(())
}
