//! # callrelay-observability
//!
//! Observability-Crate fuer callrelay:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured Logging via tracing-subscriber

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{health_router, HealthResponse, HealthState, HealthStatus};
pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, RelayMetrics};

use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Baut den Router mit `/metrics` und `/health`
pub fn observability_router(metriken: RelayMetrics) -> Router {
    let health = HealthState::neu(metriken.clone());
    Router::new()
        .merge(metrics_router(metriken))
        .merge(health_router(health))
        .layer(TraceLayer::new_for_http())
}

/// Startet den Observability-HTTP-Server (Metriken + Health)
///
/// Endpunkte:
/// - `GET /metrics` – Prometheus scrape format
/// - `GET /health`  – Health-Check JSON
///
/// Laeuft bis `shutdown_rx` auf `true` wechselt.
pub async fn observability_server_starten(
    bind_addr: SocketAddr,
    metriken: RelayMetrics,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = observability_router(metriken);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Observability-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await?;

    tracing::info!("Observability-Server gestoppt");
    Ok(())
}
