//! Fehlertypen fuer den Signaling-Service

use callrelay_core::types::{ConnectionId, SessionId, UserId};
use callrelay_protocol::control::{CallState, ErrorCode};
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
///
/// Alle Varianten ausser [`SignalingError::VerbindungUnbekannt`] und
/// [`SignalingError::Malformed`] werden dem Ausloeser als `call:error`
/// gemeldet. Die beiden fatalen Varianten verwerfen nur die einzelne
/// Nachricht.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Angerufener hat keine lebende Verbindung
    #[error("User {0} ist offline")]
    UserOffline(UserId),

    /// Fuer das Paar oder die Verbindung laeuft bereits ein Anruf
    #[error("Es laeuft bereits ein Anruf")]
    SessionAlreadyActive,

    /// Session existiert nicht (nie angelegt oder bereits abgeraeumt)
    #[error("Unbekannte Session: {0}")]
    UnknownSession(SessionId),

    /// Verbindung ist kein Endpunkt der Session
    #[error("Kein Teilnehmer der Session {0}")]
    NotAParticipant(SessionId),

    /// Operation im aktuellen Zustand nicht erlaubt
    #[error("Ungueltiger Uebergang {von} -> {nach} in Session {session_id}")]
    InvalidTransition {
        session_id: SessionId,
        von: CallState,
        nach: CallState,
    },

    /// Session wurde wegen Verbindungsabbruch der Gegenseite beendet
    #[error("Gegenseite getrennt (Session {0})")]
    PeerDisconnected(SessionId),

    /// Session wurde durch den Klingel-Timeout beendet
    #[error("Klingel-Timeout (Session {0})")]
    Timeout(SessionId),

    /// Session ist bereits terminal
    #[error("Session {0} ist bereits beendet")]
    SessionEnded(SessionId),

    /// Alle Verbindungen des Angerufenen sind in einem Anruf
    #[error("User {0} ist besetzt")]
    UserBusy(UserId),

    /// Verbindung hat noch keine Identitaet
    #[error("Verbindung ist nicht angemeldet")]
    NotAuthenticated,

    /// Verbindung ist bereits an einen anderen User gebunden
    #[error("Verbindung ist bereits an {0} gebunden")]
    AlreadyBound(UserId),

    /// Anfrage ist syntaktisch gueltig, aber inhaltlich unzulaessig
    #[error("Ungueltige Anfrage: {0}")]
    UngueltigeAnfrage(String),

    /// Verbindung ist nicht (mehr) in der Registry
    #[error("Verbindung nicht registriert: {0}")]
    VerbindungUnbekannt(ConnectionId),

    /// Nachricht konnte nicht gelesen werden
    #[error("Ungueltige Nachricht: {0}")]
    Malformed(String),

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Fehler fuer eine unzulaessige Anfrage
    pub fn ungueltig(msg: impl Into<String>) -> Self {
        Self::UngueltigeAnfrage(msg.into())
    }

    /// Wire-Code fuer `call:error`
    pub fn fehlercode(&self) -> ErrorCode {
        match self {
            Self::UserOffline(_) => ErrorCode::UserOffline,
            Self::SessionAlreadyActive => ErrorCode::SessionAlreadyActive,
            Self::UnknownSession(_) => ErrorCode::UnknownSession,
            Self::NotAParticipant(_) => ErrorCode::NotAParticipant,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::PeerDisconnected(_) => ErrorCode::PeerDisconnected,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::SessionEnded(_) => ErrorCode::SessionEnded,
            Self::UserBusy(_) => ErrorCode::UserBusy,
            Self::NotAuthenticated => ErrorCode::NotAuthenticated,
            Self::AlreadyBound(_) => ErrorCode::AlreadyBound,
            Self::UngueltigeAnfrage(_) | Self::Malformed(_) => ErrorCode::InvalidRequest,
            Self::VerbindungUnbekannt(_) | Self::Intern(_) => ErrorCode::InternalError,
        }
    }

    /// Session auf die sich der Fehler bezieht (falls bekannt)
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::UnknownSession(sid)
            | Self::NotAParticipant(sid)
            | Self::PeerDisconnected(sid)
            | Self::Timeout(sid)
            | Self::SessionEnded(sid) => Some(*sid),
            Self::InvalidTransition { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }

    /// Fatal fuer die einzelne Nachricht: loggen und verwerfen, keine Antwort
    pub fn ist_fatal(&self) -> bool {
        matches!(self, Self::VerbindungUnbekannt(_) | Self::Malformed(_))
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
