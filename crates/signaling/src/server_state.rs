//! Gemeinsamer Relay-Zustand fuer den Signaling-Service
//!
//! Haelt Registry, Presence, Anruf-Sessions und Voice-Broadcaster, die
//! sicher zwischen tokio-Tasks geteilt werden koennen.

use callrelay_core::types::ConnectionId;
use callrelay_observability::RelayMetrics;
use callrelay_protocol::wire::EventCodec;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broadcast::VoiceBroadcaster;
use crate::calls::{AnrufKonfig, CallSessionManager};
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Anzeigename des Relays (fuer Logs)
    pub server_name: String,
    /// Maximale gleichzeitige Verbindungen
    pub max_verbindungen: usize,
    /// Klingel-Timeout in Sekunden
    pub klingel_timeout_sek: u64,
    /// Aufbewahrung terminaler Sessions in Sekunden
    pub nachlauf_sek: u64,
    /// Intervall des Timeout-Sweeps in Millisekunden
    pub sweep_intervall_ms: u64,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Groesse der ausgehenden Queues pro Verbindung (Signaling und Voice je)
    pub sende_queue_groesse: usize,
    /// Maximale Groesse einer eingehenden Nachricht in Bytes
    pub max_nachricht_groesse: usize,
    /// HTTP-Pfad des WebSocket-Endpunkts
    pub ws_pfad: String,
    /// Erlaubte CORS-Origins (leer = alle)
    pub cors_origins: Vec<String>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_name: "callrelay".to_string(),
            max_verbindungen: 10_000,
            klingel_timeout_sek: 45,
            nachlauf_sek: 30,
            sweep_intervall_ms: 1000,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            sende_queue_groesse: 256,
            max_nachricht_groesse: callrelay_protocol::wire::DEFAULT_MAX_NACHRICHT_GROESSE,
            ws_pfad: "/ws".to_string(),
            cors_origins: Vec::new(),
        }
    }
}

impl SignalingConfig {
    pub fn anruf_konfig(&self) -> AnrufKonfig {
        AnrufKonfig {
            klingel_timeout: Duration::from_secs(self.klingel_timeout_sek),
            nachlauf: Duration::from_secs(self.nachlauf_sek),
        }
    }
}

/// Gemeinsamer Relay-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    /// Relay-Konfiguration
    pub config: Arc<SignalingConfig>,
    /// Connection-Registry (einzige Quelle fuer Liveness)
    pub registry: ConnectionRegistry,
    /// Presence-Tracker (abgeleitet aus der Registry)
    pub presence: PresenceTracker,
    /// Anruf-Sessions
    pub calls: CallSessionManager,
    /// Voice-Activity-Fan-out
    pub voice: VoiceBroadcaster,
    /// Prometheus-Metriken
    pub metriken: RelayMetrics,
    /// Text-Frame-Codec
    pub codec: EventCodec,
    /// Startzeitpunkt des Relays (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(config: SignalingConfig, metriken: RelayMetrics) -> Arc<Self> {
        let registry = ConnectionRegistry::neu();
        let calls =
            CallSessionManager::neu(registry.clone(), config.anruf_konfig(), metriken.clone());
        Arc::new(Self {
            presence: PresenceTracker::neu(registry.clone()),
            voice: VoiceBroadcaster::neu(registry.clone(), metriken.clone()),
            codec: EventCodec::with_max_size(config.max_nachricht_groesse),
            config: Arc::new(config),
            registry,
            calls,
            metriken,
            start_time: Instant::now(),
        })
    }

    /// Uptime in Sekunden
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Entfernt eine Verbindung und laesst betroffene Anrufe scheitern
    ///
    /// Reihenfolge: Registry-Eintrag entfernen (Presence-Event im selben
    /// Lock), dann Sessions unter dem Anruf-Lock scheitern lassen und die
    /// Gegenseite benachrichtigen. Mehrfacher Aufruf ist harmlos.
    pub fn verbindung_trennen(&self, connection_id: &ConnectionId) -> bool {
        let Some(verbindung) = self.registry.abmelden(connection_id) else {
            return false;
        };

        let zustellungen = self.calls.verbindung_verloren(connection_id);
        if !zustellungen.is_empty() {
            tracing::info!(
                connection_id = %connection_id,
                user_id = ?verbindung.user_id(),
                benachrichtigt = zustellungen.len(),
                "Verbindung mit aktivem Anruf getrennt"
            );
        }
        self.gauges_aktualisieren();
        true
    }

    /// Setzt die Verbindungs-Gauges auf den aktuellen Stand
    pub fn gauges_aktualisieren(&self) {
        self.metriken
            .connections_active
            .set(self.registry.anzahl() as i64);
        self.metriken
            .online_users
            .set(self.registry.online_anzahl() as i64);
    }
}
