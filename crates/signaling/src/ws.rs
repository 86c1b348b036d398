//! WebSocket-Listener – Bindet Socket, nimmt Upgrades an
//!
//! Der `SignalingServer` stellt einen axum-Router mit dem WebSocket-Endpunkt
//! bereit und startet fuer jede Verbindung einen eigenen tokio-Task mit einer
//! [`ClientConnection`].
//!
//! Die Identitaet kann bereits beim Upgrade per Query uebergeben werden
//! (`/ws?userId=alice&displayName=Alice`), alternativ spaeter per `user:bind`.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use callrelay_core::types::{UserId, UserIdentity};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::connection::ClientConnection;
use crate::server_state::SignalingState;

/// Query-Parameter beim Upgrade
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerbindungsParameter {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
}

impl VerbindungsParameter {
    /// Identitaet aus den Parametern, falls eine gueltige User-ID dabei ist
    pub fn identitaet(&self) -> Option<UserIdentity> {
        let user_id = UserId::new(self.user_id.as_deref()?.trim());
        if !user_id.ist_gueltig() {
            return None;
        }
        Some(UserIdentity::neu(user_id, self.display_name.clone()))
    }
}

#[derive(Clone)]
struct WsState {
    state: Arc<SignalingState>,
    shutdown_rx: watch::Receiver<bool>,
}

/// WebSocket-Signaling-Server
pub struct SignalingServer {
    state: Arc<SignalingState>,
    bind_addr: SocketAddr,
}

impl SignalingServer {
    /// Erstellt einen neuen SignalingServer
    pub fn neu(state: Arc<SignalingState>, bind_addr: SocketAddr) -> Self {
        Self { state, bind_addr }
    }

    /// Gibt die Bind-Adresse zurueck
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Router mit WebSocket-Endpunkt, Tracing und CORS
    pub fn router(&self, shutdown_rx: watch::Receiver<bool>) -> Router {
        let config = &self.state.config;

        // CORS: entweder spezifische Origins oder alle
        let cors = if config.cors_origins.is_empty() {
            CorsLayer::permissive()
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers(tower_http::cors::Any)
        };

        Router::new()
            .route(&config.ws_pfad, get(ws_upgrade))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(WsState {
                state: Arc::clone(&self.state),
                shutdown_rx,
            })
    }

    /// Bindet den Socket und nimmt Verbindungen an
    ///
    /// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt.
    pub async fn starten(self, shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.starten_mit_listener(listener, shutdown_rx).await
    }

    /// Wie [`starten`](Self::starten), aber mit bereits gebundenem Listener
    pub async fn starten_mit_listener(
        self,
        listener: TcpListener,
        shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = listener.local_addr()?;
        let app = self.router(shutdown_rx.clone());

        tracing::info!(
            adresse = %lokale_addr,
            pfad = %self.state.config.ws_pfad,
            "WebSocket Signaling-Server gestartet"
        );

        let mut shutdown = shutdown_rx;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|s| *s).await;
        })
        .await?;

        tracing::info!("WebSocket Signaling-Server gestoppt");
        Ok(())
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(parameter): Query<VerbindungsParameter>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(ws_state): State<WsState>,
) -> Response {
    let state = ws_state.state;

    // Verbindungs-Limit pruefen
    let anzahl = state.registry.anzahl();
    if anzahl >= state.config.max_verbindungen {
        tracing::warn!(
            peer = %peer_addr,
            max = state.config.max_verbindungen,
            "Relay voll – Upgrade abgelehnt"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Relay voll").into_response();
    }

    let identitaet = parameter.identitaet();
    if parameter.user_id.is_some() && identitaet.is_none() {
        tracing::debug!(peer = %peer_addr, "Ungueltige userId im Query ignoriert");
    }

    // Zu grosse Nachrichten schon im Transport abweisen
    let max_groesse = state.config.max_nachricht_groesse;
    let shutdown_rx = ws_state.shutdown_rx;
    ws.max_message_size(max_groesse)
        .max_frame_size(max_groesse)
        .on_upgrade(move |socket| async move {
            ClientConnection::neu(state, Some(peer_addr))
                .verarbeiten(socket, identitaet, shutdown_rx)
                .await;
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identitaet_aus_query() {
        let parameter = VerbindungsParameter {
            user_id: Some("alice".into()),
            display_name: Some("Alice".into()),
        };
        let identitaet = parameter.identitaet().unwrap();
        assert_eq!(identitaet.user_id, UserId::new("alice"));
        assert_eq!(identitaet.display_name, "Alice");
    }

    #[test]
    fn leere_user_id_wird_ignoriert() {
        let parameter = VerbindungsParameter {
            user_id: Some("   ".into()),
            display_name: None,
        };
        assert!(parameter.identitaet().is_none());
        assert!(VerbindungsParameter::default().identitaet().is_none());
    }
}
