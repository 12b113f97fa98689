use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use movie_gateway::config::Config;
use movie_gateway::ratings::json_file::JsonFileStore;
use movie_gateway::state::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "movie_gateway=debug,tmdb_transport=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting TMDb relay");

    // Load configuration
    let config = Config::load().expect("Failed to load configuration");
    tracing::info!(
        port = config.port,
        ratings_path = %config.ratings_path.display(),
        api_base_url = %config.endpoints.api_base,
        image_base_url = %config.endpoints.image_base,
        image_size = %config.endpoints.image_size,
        request_timeout_secs = config.request_timeout_secs,
        "Configuration loaded"
    );

    let ratings = Arc::new(JsonFileStore::new(&config.ratings_path));

    let state = Arc::new(
        AppState::new(&config, ratings).expect("Failed to build HTTP client"),
    );

    let app = movie_gateway::router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
