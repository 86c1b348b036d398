//! callrelay-protocol – Nachrichten-Definitionen
//!
//! Dieses Crate definiert alle Events, Enums und Strukturen die zwischen
//! Browser-Client und Relay ueber die WebSocket-Verbindung ausgetauscht
//! werden.

pub mod control;
pub mod voice;
pub mod wire;

pub use control::{CallState, ClientEvent, ErrorCode, ServerEvent, StateReason};
pub use voice::VoiceData;
pub use wire::{EventCodec, WireError};
