//! callrelay-signaling – WebSocket Signaling- und Presence-Relay
//!
//! Dieser Crate implementiert den Relay-Kern: Verbindungen, Presence,
//! Anruf-Sessions (WebRTC-Signaling, Medien laufen peer-to-peer) und
//! Voice-Activity-Fan-out.
//!
//! ## Architektur
//!
//! ```text
//! WebSocket Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task, einziger Schreiber)
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- UserHandler   (bind, logout)
//!     +-- CallHandler   (invite, ring, accept, reject, connected, signal, hangup, failed)
//!     +-- VoiceHandler  (voice:data)
//!
//! ConnectionRegistry  – Verbindung <-> User, einzige Quelle fuer Liveness
//! PresenceTracker     – abgeleitete Online-Liste, spiegelt Wechsel an alle
//! CallSessionManager  – Anruf-Zustandsautomat, ein Lock fuer alle Sessions
//! VoiceBroadcaster    – verlustbehafteter Fan-out von Sprachaktivitaet
//! Sweeper             – Klingel-Timeout und Abraeumen beendeter Sessions
//! ```

pub mod broadcast;
pub mod calls;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod presence;
pub mod registry;
pub mod server_state;
pub mod sweeper;
pub mod ws;

// Bequeme Re-Exporte
pub use broadcast::{ClientSender, SendeQueue, VoiceBroadcaster};
pub use calls::{AnrufKonfig, CallSession, CallSessionManager};
pub use connection::ClientConnection;
pub use dispatcher::{DispatcherContext, MessageDispatcher};
pub use error::{SignalingError, SignalingResult};
pub use presence::PresenceTracker;
pub use registry::{ConnectionRegistry, PresenceEvent, Zustellung};
pub use server_state::{SignalingConfig, SignalingState};
pub use sweeper::sweeper_starten;
pub use ws::SignalingServer;
