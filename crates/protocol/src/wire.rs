//! Wire-Format fuer WebSocket-Verbindungen
//!
//! Ein Text-Frame enthaelt genau ein JSON-Event im Umschlag
//! `{"event": "<name>", "data": {...}}`. Binaer-Frames sind nicht Teil des
//! Protokolls.
//!
//! Die maximale Nachrichtengroesse ist konfigurierbar (Standard: 64 KB,
//! SDP-Angebote mit vielen Kandidaten liegen deutlich darunter).

use callrelay_core::types::SessionId;
use serde::Deserialize;
use thiserror::Error;

use crate::control::{ClientEvent, ServerEvent};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Nachrichtengroesse (64 KB)
pub const DEFAULT_MAX_NACHRICHT_GROESSE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehler beim Kodieren oder Dekodieren eines Events
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Nachricht zu gross: {groesse} Bytes (Maximum: {maximum} Bytes)")]
    ZuGross { groesse: usize, maximum: usize },

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Umschlag-Kopf
// ---------------------------------------------------------------------------

/// Minimal gelesener Umschlag einer nicht dekodierbaren Nachricht
///
/// Erlaubt es, eine kaputte `call:*`-Nachricht noch ihrer Session
/// zuzuordnen.
#[derive(Debug, Clone, PartialEq)]
pub struct Umschlagkopf {
    pub event: String,
    pub session_id: Option<SessionId>,
}

#[derive(Deserialize)]
struct RoherUmschlag {
    event: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// EventCodec
// ---------------------------------------------------------------------------

/// Kodiert `ServerEvent`s und dekodiert `ClientEvent`s fuer Text-Frames
#[derive(Debug, Clone)]
pub struct EventCodec {
    /// Maximale erlaubte Nachrichtengroesse in Bytes
    max_groesse: usize,
}

impl EventCodec {
    /// Erstellt einen neuen `EventCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_groesse: DEFAULT_MAX_NACHRICHT_GROESSE,
        }
    }

    /// Erstellt einen `EventCodec` mit benutzerdefinierter maximaler Groesse
    pub fn with_max_size(max_groesse: usize) -> Self {
        Self { max_groesse }
    }

    /// Gibt die konfigurierte maximale Nachrichtengroesse zurueck
    pub fn max_groesse(&self) -> usize {
        self.max_groesse
    }

    /// Dekodiert einen eingehenden Text-Frame
    pub fn dekodieren(&self, text: &str) -> Result<ClientEvent, WireError> {
        self.groesse_pruefen(text.len())?;
        Ok(serde_json::from_str(text)?)
    }

    /// Kodiert ein ausgehendes Event als Text-Frame
    pub fn kodieren(&self, event: &ServerEvent) -> Result<String, WireError> {
        let json = serde_json::to_string(event)?;
        self.groesse_pruefen(json.len())?;
        Ok(json)
    }

    /// Liest Event-Name und `data.sessionId` aus einem sonst ungueltigen Frame
    ///
    /// Gibt `None` zurueck wenn nicht einmal der Umschlag lesbar ist.
    pub fn kopf_lesen(&self, text: &str) -> Option<Umschlagkopf> {
        if text.len() > self.max_groesse {
            return None;
        }
        let roh: RoherUmschlag = serde_json::from_str(text).ok()?;
        let session_id = roh
            .data
            .as_ref()
            .and_then(|d| d.get("sessionId"))
            .and_then(|v| v.as_str())
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
            .map(SessionId);
        Some(Umschlagkopf {
            event: roh.event,
            session_id,
        })
    }

    fn groesse_pruefen(&self, groesse: usize) -> Result<(), WireError> {
        if groesse > self.max_groesse {
            return Err(WireError::ZuGross {
                groesse,
                maximum: self.max_groesse,
            });
        }
        Ok(())
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{CallState, ErrorCode};
    use uuid::Uuid;

    #[test]
    fn zu_grosse_nachricht_wird_abgelehnt() {
        let codec = EventCodec::with_max_size(16);
        let text = r#"{"event":"call:invite","data":{"calleeUserId":"bob"}}"#;
        let fehler = codec.dekodieren(text).unwrap_err();
        assert!(matches!(fehler, WireError::ZuGross { maximum: 16, .. }));
    }

    #[test]
    fn gueltige_nachricht_dekodieren() {
        let codec = EventCodec::new();
        let event = codec
            .dekodieren(r#"{"event":"call:invite","data":{"calleeUserId":"bob"}}"#)
            .unwrap();
        assert_eq!(event.name(), "call:invite");
    }

    #[test]
    fn kodieren_erzeugt_umschlag() {
        let codec = EventCodec::new();
        let sid = SessionId(Uuid::nil());
        let text = codec
            .kodieren(&ServerEvent::zustand(sid, CallState::Ringing, None))
            .unwrap();
        assert!(text.starts_with(r#"{"event":"call:state","data":"#));
    }

    #[test]
    fn kopf_aus_kaputter_nachricht() {
        let codec = EventCodec::new();
        let sid = Uuid::new_v4();
        // payload fehlt -> als call:signal ungueltig
        let text = format!(r#"{{"event":"call:signal","data":{{"sessionId":"{sid}"}}}}"#);
        assert!(codec.dekodieren(&text).is_err());

        let kopf = codec.kopf_lesen(&text).unwrap();
        assert_eq!(kopf.event, "call:signal");
        assert_eq!(kopf.session_id, Some(SessionId(sid)));
    }

    #[test]
    fn kopf_ohne_session() {
        let codec = EventCodec::new();
        let kopf = codec.kopf_lesen(r#"{"event":"voice:data","data":{"volume":"laut"}}"#).unwrap();
        assert_eq!(kopf.event, "voice:data");
        assert_eq!(kopf.session_id, None);

        assert!(codec.kopf_lesen("{{{").is_none());
    }

    #[test]
    fn fehler_kodieren() {
        let codec = EventCodec::new();
        let text = codec
            .kodieren(&ServerEvent::fehler(None, ErrorCode::NotAuthenticated, "bitte binden"))
            .unwrap();
        assert!(text.contains("NOT_AUTHENTICATED"));
    }
}
