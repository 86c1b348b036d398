//! callrelay-core – Gemeinsame Typen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen callrelay-Crates gemeinsam genutzt werden.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{jetzt_ms, ConnectionId, SessionId, UserId, UserIdentity};
