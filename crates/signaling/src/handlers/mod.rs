//! Handler fuer alle Client-Events
//!
//! Jeder Handler ist fuer eine Event-Familie zustaendig und hat Zugriff auf
//! den gemeinsamen SignalingState. Events fuer andere Verbindungen werden
//! ueber die Registry zugestellt; der Rueckgabewert ist nur die direkte
//! Antwort an den Ausloeser.

pub mod call_handler;
pub mod user_handler;
pub mod voice_handler;
