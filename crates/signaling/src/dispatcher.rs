//! Message-Dispatcher – Routet Client-Events an die richtigen Handler
//!
//! Der Dispatcher empfaengt Text-Frames einer Verbindung, dekodiert sie,
//! bestimmt den Handler und gibt die direkte Antwort zurueck.
//!
//! ## Fehler
//! - Fachliche Fehler (Taxonomie) gehen als `call:error` nur an den Ausloeser
//! - Unlesbare Nachrichten und Registry-Inkonsistenzen werden geloggt und
//!   verworfen; die Verbindung bleibt offen
//! - Eine unlesbare `call:*`-Nachricht mit erkennbarer `sessionId` laesst die
//!   Session scheitern, sofern der Absender Teilnehmer ist

use callrelay_core::types::{ConnectionId, SessionId};
use callrelay_protocol::control::{ClientEvent, ServerEvent, StateReason};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::SignalingError;
use crate::handlers::{call_handler, user_handler, voice_handler};
use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
#[derive(Debug, Clone)]
pub struct DispatcherContext {
    /// ID der Verbindung in der Registry
    pub connection_id: ConnectionId,
    /// Peer-Adresse (nur fuer Logs)
    pub peer_addr: Option<SocketAddr>,
    /// Verbindung soll nach diesem Event geschlossen werden (user:logout)
    pub abmelden: bool,
}

impl DispatcherContext {
    pub fn neu(connection_id: ConnectionId, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            connection_id,
            peer_addr,
            abmelden: false,
        }
    }
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Dekodiert einen Text-Frame und verarbeitet das Event
    pub fn dispatch_text(&self, text: &str, ctx: &mut DispatcherContext) -> Option<ServerEvent> {
        match self.state.codec.dekodieren(text) {
            Ok(event) => self.dispatch(event, ctx),
            Err(e) => {
                tracing::warn!(
                    connection_id = %ctx.connection_id,
                    peer = ?ctx.peer_addr,
                    fehler = %e,
                    "Ungueltige Nachricht verworfen"
                );
                self.fehlerhafte_nachricht(text, ctx);
                None
            }
        }
    }

    /// Verarbeitet ein dekodiertes Event und gibt die Antwort zurueck
    ///
    /// Gibt `None` zurueck wenn keine direkte Antwort gesendet werden soll.
    pub fn dispatch(&self, event: ClientEvent, ctx: &mut DispatcherContext) -> Option<ServerEvent> {
        let name = event.name();
        let session_id = event.session_id();
        let state = self.state.as_ref();

        tracing::trace!(connection_id = %ctx.connection_id, event = name, "Event empfangen");

        let ergebnis = match event {
            // -------------------------------------------------------------------
            // Identitaet
            // -------------------------------------------------------------------
            ClientEvent::UserBind(req) => user_handler::handle_bind(req, ctx, state),
            ClientEvent::UserLogout => user_handler::handle_logout(ctx),

            // -------------------------------------------------------------------
            // Anrufe
            // -------------------------------------------------------------------
            ClientEvent::CallInvite(req) => call_handler::handle_invite(req, ctx, state),
            ClientEvent::CallRing(req) => call_handler::handle_ring(req, ctx, state),
            ClientEvent::CallAccept(req) => call_handler::handle_accept(req, ctx, state),
            ClientEvent::CallReject(req) => call_handler::handle_reject(req, ctx, state),
            ClientEvent::CallConnected(req) => call_handler::handle_connected(req, ctx, state),
            ClientEvent::CallSignal(req) => call_handler::handle_signal(req, ctx, state),
            ClientEvent::CallHangup(req) => call_handler::handle_hangup(req, ctx, state),
            ClientEvent::CallFailed(req) => call_handler::handle_failed(req, ctx, state),

            // -------------------------------------------------------------------
            // Voice-Activity
            // -------------------------------------------------------------------
            ClientEvent::VoiceData(data) => voice_handler::handle_voice_data(data, ctx, state),
        };

        match ergebnis {
            Ok(antwort) => antwort,
            Err(e) => self.fehler_antwort(e, name, session_id.as_ref(), ctx),
        }
    }

    fn fehler_antwort(
        &self,
        fehler: SignalingError,
        event: &'static str,
        session_id: Option<&SessionId>,
        ctx: &DispatcherContext,
    ) -> Option<ServerEvent> {
        if fehler.ist_fatal() {
            tracing::warn!(
                connection_id = %ctx.connection_id,
                event,
                fehler = %fehler,
                "Nachricht verworfen"
            );
            return None;
        }

        let code = fehler.fehlercode();
        tracing::debug!(
            connection_id = %ctx.connection_id,
            event,
            code = code.als_str(),
            fehler = %fehler,
            "call:error an Ausloeser"
        );
        self.state.metriken.fehler_gemeldet(code.als_str());

        Some(ServerEvent::fehler(
            fehler.session_id().or(session_id.copied()),
            code,
            fehler.to_string(),
        ))
    }

    /// Laesst die Session einer unlesbaren `call:*`-Nachricht scheitern
    fn fehlerhafte_nachricht(&self, text: &str, ctx: &DispatcherContext) {
        let Some(kopf) = self.state.codec.kopf_lesen(text) else {
            return;
        };
        let Some(session_id) = kopf.session_id else {
            return;
        };
        if !kopf.event.starts_with("call:") {
            return;
        }
        if !self.state.calls.ist_teilnehmer(&ctx.connection_id, &session_id) {
            return;
        }

        match self.state.calls.fehlschlagen(
            &ctx.connection_id,
            &session_id,
            StateReason::MalformedPayload,
        ) {
            Ok(zustellungen) => {
                tracing::info!(
                    connection_id = %ctx.connection_id,
                    session_id = %session_id,
                    event = %kopf.event,
                    benachrichtigt = zustellungen.len(),
                    "Session wegen unlesbarer Nachricht gescheitert"
                );
            }
            Err(e) => {
                tracing::debug!(session_id = %session_id, fehler = %e, "Session bereits beendet");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
