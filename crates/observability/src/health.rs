//! Health-Check-Endpunkt fuer callrelay
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime, offenen Verbindungen und
//! aktiven Anrufen (aus den Gauges von [`RelayMetrics`]).

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::RelayMetrics;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: i64,
    pub active_calls: i64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    pub metriken: RelayMetrics,
}

impl HealthState {
    pub fn neu(metriken: RelayMetrics) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            metriken,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Momentaufnahme fuer die Antwort
    pub fn antwort(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            connections: self.metriken.connections_active.get(),
            active_calls: self.metriken.calls_active.get(),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Relay-Status zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();
    let http_status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn health_state_frisch() {
        let state = HealthState::neu(RelayMetrics::neu().unwrap());
        assert!(state.uptime_seconds() < 5);
    }

    #[test]
    fn antwort_liest_gauges() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.connections_active.set(7);
        metriken.calls_active.set(2);
        let antwort = HealthState::neu(metriken).antwort();
        assert_eq!(antwort.status, HealthStatus::Healthy);
        assert_eq!(antwort.connections, 7);
        assert_eq!(antwort.active_calls, 2);
    }

    #[test]
    fn health_response_serialisierung() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            version: "0.1.0".to_string(),
            uptime_seconds: 3600,
            connections: 12,
            active_calls: 3,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"uptime_seconds\":3600"));
        assert!(json.contains("\"connections\":12"));
        assert!(json.contains("\"active_calls\":3"));
    }

    #[tokio::test]
    async fn health_endpunkt_antwortet() {
        let app = health_router(HealthState::neu(RelayMetrics::neu().unwrap()));
        let antwort = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(antwort.status(), StatusCode::OK);

        let body = axum::body::to_bytes(antwort.into_body(), 64 * 1024)
            .await
            .unwrap();
        let wert: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(wert["status"], "healthy");
    }
}
