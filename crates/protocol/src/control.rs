//! Control-Protokoll (WebSocket)
//!
//! Definiert alle Events die ueber die WebSocket-Verbindung zwischen
//! Browser-Client und Relay ausgetauscht werden.
//!
//! ## Design
//! - Ein Text-Frame = ein Event: `{"event": "<name>", "data": {...}}`
//! - JSON-Serialisierung via serde, Feldnamen in camelCase
//! - Adjacently Tagged Enums fuer typsichere Event-Typen
//! - SDP/ICE-Inhalte bleiben opakes `serde_json::Value`

use callrelay_core::types::{ConnectionId, SessionId, UserId};
use serde::{Deserialize, Serialize};

use crate::voice::VoiceData;

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer `call:error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Anruf-Taxonomie
    UserOffline,
    SessionAlreadyActive,
    UnknownSession,
    NotAParticipant,
    InvalidTransition,
    PeerDisconnected,
    Timeout,
    // Ergaenzend
    SessionEnded,
    UserBusy,
    NotAuthenticated,
    AlreadyBound,
    InvalidRequest,
    InternalError,
}

impl ErrorCode {
    /// Wire-Name des Codes (fuer Metrik-Labels)
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::UserOffline => "USER_OFFLINE",
            Self::SessionAlreadyActive => "SESSION_ALREADY_ACTIVE",
            Self::UnknownSession => "UNKNOWN_SESSION",
            Self::NotAParticipant => "NOT_A_PARTICIPANT",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::PeerDisconnected => "PEER_DISCONNECTED",
            Self::Timeout => "TIMEOUT",
            Self::SessionEnded => "SESSION_ENDED",
            Self::UserBusy => "USER_BUSY",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::AlreadyBound => "ALREADY_BOUND",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// Anruf-Zustaende
// ---------------------------------------------------------------------------

/// Zustand eines Anrufversuchs
///
/// `idle` ist virtuell (keine Session vorhanden) und deshalb kein Wert.
/// `rejected`, `failed` und `ended` sind terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Calling,
    Ringing,
    Connecting,
    Connected,
    Rejected,
    Failed,
    Ended,
}

impl CallState {
    /// Gibt true zurueck fuer `rejected`, `failed` und `ended`
    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Failed | Self::Ended)
    }

    /// Noch nicht angenommen (Einladung laeuft)
    pub fn ist_ausstehend(&self) -> bool {
        matches!(self, Self::Calling | Self::Ringing)
    }

    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Calling => "calling",
            Self::Ringing => "ringing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

/// Grund einer vom Server ausgeloesten Zustandsaenderung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateReason {
    /// Klingel-Timeout abgelaufen
    Timeout,
    /// Verbindung der Gegenseite ist weg
    PeerDisconnected,
    /// Ein anderer Tab des Angerufenen hat geantwortet
    AnsweredElsewhere,
    /// Gegenseite hat einen Fehler gemeldet (ICE/SDP gescheitert)
    RemoteFailure,
    /// Unlesbare Nachricht zu dieser Session
    MalformedPayload,
}

impl StateReason {
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::PeerDisconnected => "peer_disconnected",
            Self::AnsweredElsewhere => "answered_elsewhere",
            Self::RemoteFailure => "remote_failure",
            Self::MalformedPayload => "malformed_payload",
        }
    }
}

impl std::fmt::Display for StateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Identitaet an die Verbindung binden
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Anruf starten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    pub callee_user_id: UserId,
}

/// Verweis auf eine bestehende Session (ring/accept/reject/connected/hangup)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_id: SessionId,
}

/// Opake SDP/ICE-Nutzlast (wird unveraendert weitergereicht)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    pub session_id: SessionId,
    pub payload: serde_json::Value,
}

/// Client meldet gescheiterte Aushandlung oder Transportfehler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub session_id: SessionId,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Alle Events die ein Client senden darf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "user:bind")]
    UserBind(BindRequest),
    #[serde(rename = "user:logout")]
    UserLogout,

    #[serde(rename = "call:invite")]
    CallInvite(InviteRequest),
    #[serde(rename = "call:ring")]
    CallRing(SessionRef),
    #[serde(rename = "call:accept")]
    CallAccept(SessionRef),
    #[serde(rename = "call:reject")]
    CallReject(SessionRef),
    #[serde(rename = "call:connected")]
    CallConnected(SessionRef),
    #[serde(rename = "call:signal")]
    CallSignal(SignalMessage),
    #[serde(rename = "call:hangup")]
    CallHangup(SessionRef),
    #[serde(rename = "call:failed")]
    CallFailed(FailureReport),

    #[serde(rename = "voice:data")]
    VoiceData(VoiceData),
}

impl ClientEvent {
    /// Event-Name wie auf dem Draht (fuer Logging)
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserBind(_) => "user:bind",
            Self::UserLogout => "user:logout",
            Self::CallInvite(_) => "call:invite",
            Self::CallRing(_) => "call:ring",
            Self::CallAccept(_) => "call:accept",
            Self::CallReject(_) => "call:reject",
            Self::CallConnected(_) => "call:connected",
            Self::CallSignal(_) => "call:signal",
            Self::CallHangup(_) => "call:hangup",
            Self::CallFailed(_) => "call:failed",
            Self::VoiceData(_) => "voice:data",
        }
    }

    /// Session auf die sich das Event bezieht (falls vorhanden)
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::CallRing(r)
            | Self::CallAccept(r)
            | Self::CallReject(r)
            | Self::CallConnected(r)
            | Self::CallHangup(r) => Some(r.session_id),
            Self::CallSignal(s) => Some(s.session_id),
            Self::CallFailed(f) => Some(f.session_id),
            Self::UserBind(_) | Self::UserLogout | Self::CallInvite(_) | Self::VoiceData(_) => {
                None
            }
        }
    }

    /// Deserialisiert ein Event aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Serialisiert das Event als JSON (Client-Seite, Tests)
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Begruessung nach dem Verbindungsaufbau
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReady {
    pub connection_id: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub online_users: Vec<UserId>,
}

/// Aktuelle Menge der online User
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub user_ids: Vec<UserId>,
}

/// Eingehender Anruf (an alle Verbindungen des Angerufenen)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub session_id: SessionId,
    pub caller_user_id: UserId,
    pub caller_display_name: String,
}

/// Zustandsaenderung einer Session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub session_id: SessionId,
    pub state: CallState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<StateReason>,
}

/// Fehler-Antwort an den Ausloeser einer Operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallErrorMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub code: ErrorCode,
    pub message: String,
}

/// Alle Events die der Server sendet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "session:ready")]
    SessionReady(SessionReady),
    #[serde(rename = "presence:online")]
    PresenceOnline(PresenceSnapshot),

    #[serde(rename = "call:incoming")]
    CallIncoming(IncomingCall),
    #[serde(rename = "call:state")]
    StateChanged(StateUpdate),
    #[serde(rename = "call:signal")]
    CallSignal(SignalMessage),
    #[serde(rename = "call:error")]
    CallError(CallErrorMessage),

    #[serde(rename = "voice:data")]
    VoiceData(VoiceData),
}

impl ServerEvent {
    /// Erstellt eine `call:state`-Nachricht
    pub fn zustand(session_id: SessionId, state: CallState, reason: Option<StateReason>) -> Self {
        Self::StateChanged(StateUpdate {
            session_id,
            state,
            reason,
        })
    }

    /// Erstellt eine `call:error`-Nachricht
    pub fn fehler(
        session_id: Option<SessionId>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self::CallError(CallErrorMessage {
            session_id,
            code,
            message: message.into(),
        })
    }

    /// Event-Name wie auf dem Draht (fuer Logging)
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionReady(_) => "session:ready",
            Self::PresenceOnline(_) => "presence:online",
            Self::CallIncoming(_) => "call:incoming",
            Self::StateChanged(_) => "call:state",
            Self::CallSignal(_) => "call:signal",
            Self::CallError(_) => "call:error",
            Self::VoiceData(_) => "voice:data",
        }
    }

    /// Serialisiert das Event als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert ein Event aus JSON (Client-Seite, Tests)
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    const SID: &str = "6f1d3c1e-0b8a-4d55-9a53-2b7b2a3f0c11";

    fn sid() -> SessionId {
        SessionId(Uuid::parse_str(SID).unwrap())
    }

    #[test]
    fn invite_vom_browser_parsen() {
        let text = r#"{"event":"call:invite","data":{"calleeUserId":"bob"}}"#;
        let event = ClientEvent::from_json(text).unwrap();
        assert_eq!(
            event,
            ClientEvent::CallInvite(InviteRequest {
                callee_user_id: UserId::new("bob"),
            })
        );
        assert_eq!(event.name(), "call:invite");
        assert_eq!(event.session_id(), None);
    }

    #[test]
    fn accept_und_reject_parsen() {
        let accept = format!(r#"{{"event":"call:accept","data":{{"sessionId":"{SID}"}}}}"#);
        let reject = format!(r#"{{"event":"call:reject","data":{{"sessionId":"{SID}"}}}}"#);

        let accept = ClientEvent::from_json(&accept).unwrap();
        let reject = ClientEvent::from_json(&reject).unwrap();

        assert!(matches!(accept, ClientEvent::CallAccept(r) if r.session_id == sid()));
        assert!(matches!(reject, ClientEvent::CallReject(r) if r.session_id == sid()));
    }

    #[test]
    fn signal_payload_bleibt_opak() {
        let payload = json!({
            "type": "offer",
            "sdp": "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n",
            "candidates": [{"candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host"}]
        });
        let text = json!({
            "event": "call:signal",
            "data": {"sessionId": SID, "payload": payload.clone()}
        })
        .to_string();

        let event = ClientEvent::from_json(&text).unwrap();
        let ClientEvent::CallSignal(signal) = event else {
            panic!("Erwartet call:signal");
        };
        assert_eq!(signal.payload, payload);

        // Server-Seite spiegelt dieselbe Struktur zurueck
        let raus = ServerEvent::CallSignal(signal).to_json().unwrap();
        let wert: serde_json::Value = serde_json::from_str(&raus).unwrap();
        assert_eq!(wert["event"], "call:signal");
        assert_eq!(wert["data"]["payload"], payload);
        assert_eq!(wert["data"]["sessionId"], SID);
    }

    #[test]
    fn logout_ohne_daten() {
        let event = ClientEvent::from_json(r#"{"event":"user:logout"}"#).unwrap();
        assert_eq!(event, ClientEvent::UserLogout);
    }

    #[test]
    fn bind_mit_optionalem_anzeigenamen() {
        let event =
            ClientEvent::from_json(r#"{"event":"user:bind","data":{"userId":"alice"}}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::UserBind(BindRequest {
                user_id: UserId::new("alice"),
                display_name: None,
            })
        );
    }

    #[test]
    fn unbekanntes_event_wird_abgelehnt() {
        assert!(ClientEvent::from_json(r#"{"event":"call:teleport","data":{}}"#).is_err());
        assert!(ClientEvent::from_json(r#"{"event":"call:accept","data":{}}"#).is_err());
        assert!(ClientEvent::from_json("kein json").is_err());
    }

    #[test]
    fn zustand_mit_grund_serialisieren() {
        let json = ServerEvent::zustand(sid(), CallState::Rejected, Some(StateReason::Timeout))
            .to_json()
            .unwrap();
        let wert: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            wert,
            json!({
                "event": "call:state",
                "data": {"sessionId": SID, "state": "rejected", "reason": "timeout"}
            })
        );
    }

    #[test]
    fn zustand_ohne_grund_laesst_feld_weg() {
        let json = ServerEvent::zustand(sid(), CallState::Ended, None)
            .to_json()
            .unwrap();
        assert!(!json.contains("reason"));
        assert!(json.contains("\"state\":\"ended\""));
    }

    #[test]
    fn fehler_ohne_session() {
        let json = ServerEvent::fehler(None, ErrorCode::UserOffline, "bob ist offline")
            .to_json()
            .unwrap();
        let wert: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(wert["event"], "call:error");
        assert_eq!(wert["data"]["code"], "USER_OFFLINE");
        assert!(wert["data"].get("sessionId").is_none());
    }

    #[test]
    fn error_code_als_str_passt_zu_serde() {
        let codes = [
            ErrorCode::UserOffline,
            ErrorCode::SessionAlreadyActive,
            ErrorCode::UnknownSession,
            ErrorCode::NotAParticipant,
            ErrorCode::InvalidTransition,
            ErrorCode::PeerDisconnected,
            ErrorCode::Timeout,
            ErrorCode::SessionEnded,
            ErrorCode::UserBusy,
            ErrorCode::NotAuthenticated,
            ErrorCode::AlreadyBound,
            ErrorCode::InvalidRequest,
            ErrorCode::InternalError,
        ];
        for code in &codes {
            let json = serde_json::to_string(code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.als_str()));
        }
    }

    #[test]
    fn terminale_zustaende() {
        assert!(CallState::Rejected.ist_terminal());
        assert!(CallState::Failed.ist_terminal());
        assert!(CallState::Ended.ist_terminal());
        assert!(!CallState::Calling.ist_terminal());
        assert!(!CallState::Connected.ist_terminal());
        assert!(CallState::Ringing.ist_ausstehend());
        assert!(!CallState::Connecting.ist_ausstehend());
    }

    #[test]
    fn session_id_aus_event() {
        let event = ClientEvent::CallHangup(SessionRef { session_id: sid() });
        assert_eq!(event.session_id(), Some(sid()));
    }
}
