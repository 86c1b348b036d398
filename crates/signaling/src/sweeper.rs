//! Timeout-Sweep fuer Anruf-Sessions
//!
//! Ein einzelner Task prueft periodisch alle Sessions: unbeantwortete
//! Anrufe scheitern nach dem Klingel-Timeout, terminale Sessions werden nach
//! dem Nachlauf entfernt.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::server_state::SignalingState;

/// Startet den Sweep-Task
pub fn sweeper_starten(
    state: Arc<SignalingState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let intervall = Duration::from_millis(state.config.sweep_intervall_ms.max(10));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(intervall);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let zustellungen = state.calls.sweep(Instant::now());
                    if !zustellungen.is_empty() {
                        tracing::debug!(anzahl = zustellungen.len(), "Sweep: Timeouts zugestellt");
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Sweep-Task beendet");
    })
}
