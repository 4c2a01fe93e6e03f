use std::sync::Arc;

use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use repairhub_api::{app_router, config, db, events, events::EventSender, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        db::run_migrations(&pool).await?;
    }
    let pool = Arc::new(pool);

    let (tx, rx) = mpsc::channel(1024);
    let event_sender = EventSender::new(tx);
    tokio::spawn(events::process_events(rx));

    let state = AppState::new(pool, cfg.clone(), event_sender);
    let app = app_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = cfg.bind_addr();
    info!(%addr, environment = %cfg.environment, "starting server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("failed to listen for shutdown signal: {}", e),
    }
}
