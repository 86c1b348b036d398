//! callrelay – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Relay.

use anyhow::Result;
use callrelay_observability::logging_initialisieren;
use callrelay_server::{config::ServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("CALLRELAY_CONFIG").unwrap_or_else(|_| "config.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = ServerConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "callrelay wird initialisiert"
    );

    Server::neu(config).starten().await
}
