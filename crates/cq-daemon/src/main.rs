//! cq-daemon entry point.
//!
//! Loads configuration, sets up tracing and the file journal, connects the
//! Postgres store, wires middleware and serves until Ctrl-C or SIGTERM. All
//! route handlers live in `routes.rs`; shared state lives in `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use cq_config::{AppConfig, CorsConfig, LoggingConfig, UnusedKeyPolicy};
use cq_daemon::{routes, state};
use cq_db::PgQueueStore;
use cq_journal::{Journal, JournalLayer};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    let loaded = cq_config::load_from_env().context("load config")?;
    let cfg: AppConfig = loaded.app_config()?;

    init_tracing(&cfg.logging)?;
    info!(config_hash = %loaded.config_hash, "configuration loaded");

    let unused = cq_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for pointer in &unused.unused_leaf_pointers {
        warn!(pointer = %pointer, "config key is not consumed by any section");
    }

    let db_url = cq_config::resolve_database_url(&cfg)?;
    let pool = cq_db::connect(db_url.expose(), cfg.database.max_connections).await?;
    if cfg.database.migrate_on_start {
        cq_db::migrate(&pool).await?;
    }

    let store = Arc::new(PgQueueStore::new(pool));
    let shared = Arc::new(
        state::AppState::new(store, state::engine_settings(&cfg.engine))
            .with_config_hash(loaded.config_hash.clone()),
    );

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_from_config(&cfg.cors));

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(category = "http", "cq-daemon listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    info!(category = "http", "cq-daemon stopped");
    Ok(())
}

/// Console output plus the file journal for this workspace's events.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let journal = Journal::shared(&logging.dir)
        .with_context(|| format!("open journal dir {}", logging.dir))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(JournalLayer::new(journal, "cq_").with_debug(logging.debug_to_file))
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}

/// CORS: allow only the configured origins.
fn cors_from_config(cors: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(category = "http", "shutdown signal received");
}
