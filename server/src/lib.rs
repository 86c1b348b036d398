//! callrelay-server – Bibliotheks-Root
//!
//! Verdrahtet Signaling-Kern, Hintergrund-Tasks und Observability und
//! stellt den oeffentlichen Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use callrelay_observability::{observability_server_starten, RelayMetrics};
use callrelay_signaling::{sweeper_starten, SignalingServer, SignalingState};
use config::ServerConfig;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.ws_bind_adresse()?).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown-Signal empfangen, Relay wird beendet"),
                Err(e) => tracing::error!(fehler = %e, "Signal-Handler fehlgeschlagen"),
            }
            let _ = shutdown_tx.send(true);
        });

        self.ausfuehren(listener, shutdown_rx).await
    }

    /// Laeuft auf einem bereits gebundenen Listener bis `shutdown_rx` auf
    /// `true` wechselt
    ///
    /// Reihenfolge:
    /// 1. Metriken und Relay-Zustand anlegen
    /// 2. Presence-Spiegelung und Timeout-Sweep starten
    /// 3. Observability-Server starten (falls aktiviert)
    /// 4. WebSocket-Server bis zum Shutdown betreiben
    pub async fn ausfuehren(
        self,
        listener: TcpListener,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let metriken = RelayMetrics::neu()?;
        let state = SignalingState::neu(self.config.signaling_config(), metriken.clone());

        tracing::info!(
            server_name = %self.config.server.name,
            ws = %listener.local_addr()?,
            pfad = %self.config.netzwerk.ws_pfad,
            klingel_timeout_sek = self.config.anrufe.klingel_timeout_sek,
            "Relay startet"
        );

        let presence_task = state
            .presence
            .spiegelung_starten(metriken.clone(), shutdown_rx.clone());
        let sweep_task = sweeper_starten(Arc::clone(&state), shutdown_rx.clone());

        let observability_task = if self.config.observability.aktiviert {
            let addr = self.config.observability_bind_adresse()?;
            let metriken = metriken.clone();
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = observability_server_starten(addr, metriken, rx).await {
                    tracing::error!(fehler = %e, "Observability-Server fehlgeschlagen");
                }
            }))
        } else {
            None
        };

        let ws_addr = listener.local_addr()?;
        SignalingServer::neu(Arc::clone(&state), ws_addr)
            .starten_mit_listener(listener, shutdown_rx)
            .await?;

        let _ = presence_task.await;
        let _ = sweep_task.await;
        if let Some(task) = observability_task {
            let _ = task.await;
        }

        tracing::info!(
            verbindungen = state.registry.anzahl(),
            anrufe = state.calls.aktive_anzahl(),
            "Relay beendet"
        );
        Ok(())
    }
}
