//! Voice-Activity-Metadaten
//!
//! Lautstaerke und Sprech-Flag fuer die Sprechanzeige im UI. Keine Audiodaten,
//! nur Metadaten die nach wenigen hundert Millisekunden veraltet sind.
//!
//! ```json
//! {"event": "voice:data", "data": {"userId": "alice", "volume": 0.42,
//!  "isSpeaking": true, "timestamp": 1718000000000}}
//! ```

use callrelay_core::types::{jetzt_ms, UserId};
use serde::{Deserialize, Serialize};

/// Untere Grenze der Lautstaerke
pub const MIN_LAUTSTAERKE: f32 = 0.0;
/// Obere Grenze der Lautstaerke
pub const MAX_LAUTSTAERKE: f32 = 1.0;

/// Voice-Activity-Event (Client -> Server -> alle anderen Clients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceData {
    /// Sprechender User
    pub user_id: UserId,
    /// Optionaler Empfaenger; ohne Angabe an alle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    /// Lautstaerke 0.0 bis 1.0
    pub volume: f32,
    pub is_speaking: bool,
    /// Client-Zeitstempel in Millisekunden (fehlt er, stempelt der Relay)
    #[serde(default)]
    pub timestamp: u64,
}

impl VoiceData {
    /// Klemmt die Lautstaerke auf 0.0–1.0 und ergaenzt einen fehlenden
    /// Zeitstempel
    ///
    /// Gibt `None` zurueck wenn die Lautstaerke keine endliche Zahl ist.
    pub fn normalisiert(mut self) -> Option<Self> {
        if !self.volume.is_finite() {
            return None;
        }
        self.volume = self.volume.clamp(MIN_LAUTSTAERKE, MAX_LAUTSTAERKE);
        if self.timestamp == 0 {
            self.timestamp = jetzt_ms();
        }
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beispiel(volume: f32) -> VoiceData {
        VoiceData {
            user_id: UserId::new("alice"),
            recipient_id: None,
            volume,
            is_speaking: true,
            timestamp: 1_718_000_000_000,
        }
    }

    #[test]
    fn browser_format_parsen() {
        let json = r#"{"userId":"alice","recipientId":"bob","volume":0.5,"isSpeaking":false,"timestamp":42}"#;
        let data: VoiceData = serde_json::from_str(json).unwrap();
        assert_eq!(data.user_id, UserId::new("alice"));
        assert_eq!(data.recipient_id, Some(UserId::new("bob")));
        assert!(!data.is_speaking);
        assert_eq!(data.timestamp, 42);
    }

    #[test]
    fn ohne_empfaenger_kein_feld() {
        let json = serde_json::to_string(&beispiel(0.3)).unwrap();
        assert!(!json.contains("recipientId"));
        assert!(json.contains("\"isSpeaking\":true"));
    }

    #[test]
    fn lautstaerke_wird_geklemmt() {
        assert_eq!(beispiel(1.7).normalisiert().unwrap().volume, 1.0);
        assert_eq!(beispiel(-0.2).normalisiert().unwrap().volume, 0.0);
        assert_eq!(beispiel(0.25).normalisiert().unwrap().volume, 0.25);
    }

    #[test]
    fn nan_ist_ungueltig() {
        assert!(beispiel(f32::NAN).normalisiert().is_none());
        assert!(beispiel(f32::INFINITY).normalisiert().is_none());
    }

    #[test]
    fn fehlender_zeitstempel_wird_ergaenzt() {
        let json = r#"{"userId":"alice","volume":0.5,"isSpeaking":true}"#;
        let data: VoiceData = serde_json::from_str(json).unwrap();
        assert_eq!(data.timestamp, 0);
        assert!(data.normalisiert().unwrap().timestamp > 0);

        assert_eq!(beispiel(0.5).normalisiert().unwrap().timestamp, 1_718_000_000_000);
    }
}
