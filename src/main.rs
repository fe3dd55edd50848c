use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::{signal, sync::mpsc};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use storefront_checkout as checkout;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = checkout::config::load_config().context("failed to load configuration")?;
    checkout::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = checkout::db::establish_connection_with_config(&(&cfg).into())
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        checkout::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = checkout::events::EventSender::new(event_tx);
    tokio::spawn(checkout::events::process_events(event_rx));

    // Payment provider, configured explicitly rather than from ambient state
    let gateway = checkout::services::HttpPaymentGateway::new((&cfg).into())
        .context("failed to build payment gateway client")?;

    let processor = checkout::services::OrderProcessor::new(
        db_arc.clone(),
        Arc::new(gateway),
        event_sender,
        (&cfg).into(),
    );

    let app_state = checkout::AppState {
        db: db_arc,
        processor: Arc::new(processor),
        verifier: Arc::new(checkout::auth::JwtVerifier::from_config(&cfg)),
    };

    let app = Router::new()
        .nest("/api/v1", checkout::api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(environment = %cfg.environment, "storefront-checkout listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
