//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Relay ohne Konfigurationsdatei
//! lauffaehig ist.

use callrelay_signaling::SignalingConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Anruf-Richtlinien (Timeouts)
    pub anrufe: AnrufEinstellungen,
    /// Verbindungs-Einstellungen (Keepalive, Queues)
    pub verbindung: VerbindungsEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Relays
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Verbindungen
    pub max_verbindungen: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "callrelay".into(),
            max_verbindungen: 10_000,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer WebSocket und Observability
    pub bind_adresse: String,
    /// Port fuer den WebSocket-Endpunkt
    pub ws_port: u16,
    /// HTTP-Pfad des WebSocket-Endpunkts
    pub ws_pfad: String,
    /// CORS-Origins (leer = alle erlaubt)
    pub cors_origins: Vec<String>,
    /// Maximale Groesse einer eingehenden Nachricht in Bytes
    pub max_nachricht_groesse: usize,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            ws_port: 3001,
            ws_pfad: "/ws".into(),
            cors_origins: vec![],
            max_nachricht_groesse: callrelay_protocol::wire::DEFAULT_MAX_NACHRICHT_GROESSE,
        }
    }
}

/// Anruf-Richtlinien
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnrufEinstellungen {
    /// Klingel-Timeout in Sekunden
    pub klingel_timeout_sek: u64,
    /// Wie lange beendete Sessions fuer spaete Duplikate erhalten bleiben
    pub nachlauf_sek: u64,
    /// Intervall des Timeout-Sweeps in Millisekunden
    pub sweep_intervall_ms: u64,
}

impl Default for AnrufEinstellungen {
    fn default() -> Self {
        Self {
            klingel_timeout_sek: 45,
            nachlauf_sek: 30,
            sweep_intervall_ms: 1000,
        }
    }
}

/// Verbindungs-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// Keepalive-Ping-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Trennung nach so vielen Sekunden ohne Frame
    pub timeout_sek: u64,
    /// Groesse der ausgehenden Queues pro Verbindung
    pub sende_queue_groesse: usize,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            keepalive_sek: 30,
            timeout_sek: 90,
            sende_queue_groesse: 256,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Parst eine Konfiguration aus einem TOML-String
    pub fn aus_toml(inhalt: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(inhalt)
    }

    /// Gibt die Bind-Adresse fuer den WebSocket-Endpunkt zurueck
    pub fn ws_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        self.adresse(self.netzwerk.ws_port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        self.adresse(self.observability.port)
    }

    fn adresse(&self, port: u16) -> anyhow::Result<SocketAddr> {
        let text = format!("{}:{}", self.netzwerk.bind_adresse, port);
        text.parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Bind-Adresse '{text}': {e}"))
    }

    /// Laufzeit-Konfiguration fuer den Signaling-Kern
    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            server_name: self.server.name.clone(),
            max_verbindungen: self.server.max_verbindungen,
            klingel_timeout_sek: self.anrufe.klingel_timeout_sek,
            nachlauf_sek: self.anrufe.nachlauf_sek,
            sweep_intervall_ms: self.anrufe.sweep_intervall_ms,
            keepalive_sek: self.verbindung.keepalive_sek,
            verbindungs_timeout_sek: self.verbindung.timeout_sek,
            sende_queue_groesse: self.verbindung.sende_queue_groesse,
            max_nachricht_groesse: self.netzwerk.max_nachricht_groesse,
            ws_pfad: self.netzwerk.ws_pfad.clone(),
            cors_origins: self.netzwerk.cors_origins.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server.max_verbindungen, 10_000);
        assert_eq!(cfg.netzwerk.ws_port, 3001);
        assert_eq!(cfg.anrufe.klingel_timeout_sek, 45);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.observability.aktiviert);
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.ws_bind_adresse().unwrap().to_string(), "0.0.0.0:3001");
        assert_eq!(
            cfg.observability_bind_adresse().unwrap().to_string(),
            "0.0.0.0:9300"
        );
    }

    #[test]
    fn ungueltige_bind_adresse() {
        let mut cfg = ServerConfig::default();
        cfg.netzwerk.bind_adresse = "nirgendwo".into();
        assert!(cfg.ws_bind_adresse().is_err());
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Buero"
            max_verbindungen = 100

            [anrufe]
            klingel_timeout_sek = 20

            [netzwerk]
            ws_port = 8000
            cors_origins = ["https://app.example"]
        "#;
        let cfg = ServerConfig::aus_toml(toml).unwrap();
        assert_eq!(cfg.server.name, "Buero");
        assert_eq!(cfg.server.max_verbindungen, 100);
        assert_eq!(cfg.netzwerk.ws_port, 8000);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.netzwerk.ws_pfad, "/ws");
        assert_eq!(cfg.anrufe.nachlauf_sek, 30);

        let signaling = cfg.signaling_config();
        assert_eq!(signaling.klingel_timeout_sek, 20);
        assert_eq!(signaling.max_verbindungen, 100);
        assert_eq!(signaling.cors_origins, vec!["https://app.example".to_string()]);
    }

    #[test]
    fn fehlende_datei_ergibt_standard() {
        let cfg = ServerConfig::laden("/gibt/es/nicht/callrelay.toml").unwrap();
        assert_eq!(cfg.netzwerk.ws_pfad, "/ws");
    }

    #[test]
    fn kaputtes_toml_ist_fehler() {
        assert!(ServerConfig::aus_toml("[server\nname = 1").is_err());
    }
}
