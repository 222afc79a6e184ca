use mentor_portal::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    notify::{HttpMailRelay, LogNotifier, NotifierState},
    repository::{InMemoryRepository, PostgresRepository, RepositoryState},
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RATE_LIMIT_CLEANUP_EVERY: Duration = Duration::from_secs(60);

/// main
///
/// Loads configuration, sets up logging, picks the persistence and
/// notification backends, and serves the router.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast in production)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, otherwise crate-level debug.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mentor_portal=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Persistence
    let repo: RepositoryState = match &config.db_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");
            let postgres = PostgresRepository::new(pool);
            postgres
                .migrate()
                .await
                .expect("FATAL: database migrations failed");
            tracing::info!("using PostgreSQL repository");
            Arc::new(postgres)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory repository (data is lost on exit)");
            Arc::new(InMemoryRepository::new())
        }
    };

    // 4. Notifications
    let notifier: NotifierState = match &config.mail.relay_url {
        Some(url) => Arc::new(
            HttpMailRelay::new(url, &config.mail.from)
                .expect("FATAL: could not build the mail relay client"),
        ),
        None => {
            tracing::warn!("MAIL_RELAY_URL not set, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    // 5. State, background upkeep, router, server
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(repo, notifier, config);
    let outbox = state.outbox.clone();
    tokio::spawn(state.limits.clone().cleanup_task(RATE_LIMIT_CLEANUP_EVERY));
    let app = create_router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: could not bind the HTTP listener. Check BIND_ADDR.");

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    // Connect info feeds the per-caller rate limit key.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("FATAL: HTTP server error");

    // Deliver notifications still in flight before exiting.
    outbox.flush().await;
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
