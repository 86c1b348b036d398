//! Gemeinsame Identifikationstypen fuer callrelay
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Verbindungs-, Anruf- und Benutzer-IDs zur Compilezeit auszuschliessen.
//! Auf dem Draht erscheinen sie als nackte Strings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige ID einer Transport-Verbindung (ein Browser-Tab)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Erstellt eine neue zufaellige ConnectionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Eindeutige ID eines Anrufversuchs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Erstellt eine neue zufaellige SessionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call:{}", self.0)
    }
}

/// Benutzer-ID aus dem externen User-Verzeichnis
///
/// Opaker String – callrelay vergibt keine User-IDs, es referenziert sie nur.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leere oder reine Whitespace-IDs sind ungueltig
    pub fn ist_gueltig(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Authentifizierte Identitaet einer Verbindung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: UserId,
    pub display_name: String,
}

impl UserIdentity {
    /// Erstellt eine Identitaet; ohne Anzeigename wird die User-ID verwendet
    pub fn neu(user_id: UserId, display_name: Option<String>) -> Self {
        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| user_id.0.clone());
        Self {
            user_id,
            display_name,
        }
    }
}

/// Aktueller Unix-Timestamp in Millisekunden
pub fn jetzt_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_eindeutig() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b, "Zwei neue ConnectionIds muessen verschieden sein");
    }

    #[test]
    fn session_id_display() {
        let id = SessionId(Uuid::nil());
        assert!(id.to_string().starts_with("call:"));
    }

    #[test]
    fn session_id_auf_dem_draht_ohne_praefix() {
        let id = SessionId(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }

    #[test]
    fn user_id_ist_transparent() {
        let uid = UserId::new("alice");
        assert_eq!(serde_json::to_string(&uid).unwrap(), "\"alice\"");
        let zurueck: UserId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(zurueck, uid);
    }

    #[test]
    fn leere_user_id_ungueltig() {
        assert!(!UserId::new("   ").ist_gueltig());
        assert!(UserId::new("bob").ist_gueltig());
    }

    #[test]
    fn identitaet_ohne_anzeigename() {
        let ident = UserIdentity::neu(UserId::new("carol"), None);
        assert_eq!(ident.display_name, "carol");

        let ident = UserIdentity::neu(UserId::new("carol"), Some("  ".into()));
        assert_eq!(ident.display_name, "carol");

        let ident = UserIdentity::neu(UserId::new("carol"), Some("Carol K.".into()));
        assert_eq!(ident.display_name, "Carol K.");
    }
}
