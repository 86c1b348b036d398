//! Client-Connection – Verwaltet eine einzelne WebSocket-Verbindung
//!
//! Jede Verbindung (ein Browser-Tab) bekommt eine `ClientConnection` in
//! einem eigenen tokio-Task. Der Task ist der einzige Schreiber auf den
//! Socket: direkte Antworten des Dispatchers und Events aus den
//! Verbindungs-Queues werden hier serialisiert und gesendet.
//!
//! ## Lebenszyklus
//! ```text
//! Upgrade -> registrieren (+ optional binden) -> session:ready
//!     |
//!     v
//! Lese-/Sende-Schleife  --(Close | Fehler | Timeout | Logout | Shutdown)-->  trennen
//! ```
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen WebSocket-Ping
//! - Jeder empfangene Frame (auch Pong) zaehlt als Lebenszeichen
//! - Nach `verbindungs_timeout_sek` ohne Frame wird die Verbindung getrennt

use axum::extract::ws::{Message, WebSocket};
use callrelay_core::types::{ConnectionId, UserIdentity};
use callrelay_protocol::control::{ServerEvent, SessionReady};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::broadcast::ClientSender;
use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::server_state::SignalingState;

type Schreiber = SplitSink<WebSocket, Message>;

/// Verarbeitet eine einzelne WebSocket-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: Option<SocketAddr>,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection
    pub fn neu(state: Arc<SignalingState>, peer_addr: Option<SocketAddr>) -> Self {
        Self { state, peer_addr }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis der Client trennt, die Verbindung zu lange still ist oder
    /// ein Shutdown-Signal eingeht. Danach wird die Verbindung aus der
    /// Registry entfernt und laufende Anrufe scheitern.
    pub async fn verarbeiten(
        self,
        socket: WebSocket,
        identitaet: Option<UserIdentity>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let connection_id = ConnectionId::new();
        let peer = self.peer_addr;
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek);
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);

        // Ausgehende Queues (Registry/Broadcaster -> Socket)
        let (sender, mut sende_queue) =
            ClientSender::kanal(connection_id, self.state.config.sende_queue_groesse);
        self.state.registry.registrieren(connection_id, sender);

        if let Some(identitaet) = identitaet {
            if let Err(e) = self.state.registry.binden(&connection_id, identitaet) {
                tracing::warn!(
                    connection_id = %connection_id,
                    fehler = %e,
                    "Identitaet aus Query konnte nicht gebunden werden"
                );
            }
        }
        self.state.gauges_aktualisieren();

        tracing::info!(connection_id = %connection_id, peer = ?peer, "Neue Verbindung");

        let (mut schreiber, mut leser) = socket.split();
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));
        let mut ctx = DispatcherContext::neu(connection_id, peer);

        let ready = ServerEvent::SessionReady(SessionReady {
            connection_id,
            user_id: self
                .state
                .registry
                .lookup(&connection_id)
                .ok()
                .and_then(|v| v.user_id().cloned()),
            online_users: self.state.registry.online_user_ids(),
        });

        if self.senden(&mut schreiber, &connection_id, &ready).await {
            let mut letzter_empfang = Instant::now();
            let mut naechster_ping = Instant::now() + keepalive_intervall;

            loop {
                let jetzt = Instant::now();

                if jetzt.duration_since(letzter_empfang) > timeout_dauer {
                    tracing::warn!(connection_id = %connection_id, "Verbindungs-Timeout");
                    break;
                }

                let ping_verzoegerung = naechster_ping
                    .checked_duration_since(jetzt)
                    .unwrap_or(Duration::from_millis(1));

                tokio::select! {
                    // Eingehender Frame vom Client
                    frame = leser.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                letzter_empfang = Instant::now();
                                if let Some(antwort) = dispatcher.dispatch_text(&text, &mut ctx) {
                                    if !self.senden(&mut schreiber, &connection_id, &antwort).await {
                                        break;
                                    }
                                }
                                if ctx.abmelden {
                                    let _ = schreiber.send(Message::Close(None)).await;
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(daten))) => {
                                letzter_empfang = Instant::now();
                                tracing::debug!(
                                    connection_id = %connection_id,
                                    bytes = daten.len(),
                                    "Binaer-Frame ignoriert"
                                );
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                                letzter_empfang = Instant::now();
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!(connection_id = %connection_id, "Verbindung vom Client getrennt");
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::warn!(
                                    connection_id = %connection_id,
                                    fehler = %e,
                                    "WebSocket-Lesefehler"
                                );
                                break;
                            }
                        }
                    }

                    // Ausgehendes Event aus den Queues (Signaling vor Voice)
                    ausgehend = sende_queue.naechstes() => {
                        let Some(ausgehend) = ausgehend else {
                            tracing::warn!(
                                connection_id = %connection_id,
                                "Client liest zu langsam – Verbindung wird getrennt"
                            );
                            let _ = schreiber.send(Message::Close(None)).await;
                            break;
                        };
                        if !self.senden(&mut schreiber, &connection_id, &ausgehend).await {
                            break;
                        }
                    }

                    // Keepalive-Ping
                    _ = tokio::time::sleep(ping_verzoegerung) => {
                        if Instant::now() >= naechster_ping {
                            if let Err(e) = schreiber.send(Message::Ping(Vec::new())).await {
                                tracing::warn!(
                                    connection_id = %connection_id,
                                    fehler = %e,
                                    "Ping-Senden fehlgeschlagen"
                                );
                                break;
                            }
                            naechster_ping = Instant::now() + keepalive_intervall;
                        }
                    }

                    // Shutdown-Signal
                    Ok(()) = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!(connection_id = %connection_id, "Shutdown-Signal – Verbindung wird getrennt");
                            let _ = schreiber.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        }

        // Cleanup beim Verbindungsende
        self.state.verbindung_trennen(&connection_id);
        tracing::info!(connection_id = %connection_id, "Verbindungs-Task beendet");
    }

    /// Kodiert und sendet ein Event; `false` wenn der Socket tot ist
    async fn senden(
        &self,
        schreiber: &mut Schreiber,
        connection_id: &ConnectionId,
        event: &ServerEvent,
    ) -> bool {
        let text = match self.state.codec.kodieren(event) {
            Ok(text) => text,
            Err(e) => {
                // Event verwerfen, Verbindung bleibt offen
                tracing::error!(
                    connection_id = %connection_id,
                    event = event.name(),
                    fehler = %e,
                    "Event konnte nicht kodiert werden"
                );
                return true;
            }
        };

        match schreiber.send(Message::Text(text)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    fehler = %e,
                    "Senden fehlgeschlagen"
                );
                false
            }
        }
    }
}
