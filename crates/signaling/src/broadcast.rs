//! Sende-Queues und Voice-Activity-Fan-out
//!
//! Jede Verbindung besitzt zwei ausgehende `mpsc`-Queues, die nur vom
//! Verbindungs-Task geleert werden:
//! - Steuer-Queue fuer `call:*`, `presence:*` und `session:*`
//! - Voice-Queue fuer `voice:data`
//!
//! Der Verbindungs-Task leert die Steuer-Queue immer zuerst, ein Voice-Flood
//! kann Signaling-Events also weder verdraengen noch verzoegern. Laeuft die
//! Steuer-Queue trotzdem voll, wird die Verbindung getrennt statt ein
//! Signaling-Event zu verlieren; `verbindung_trennen` laesst laufende Anrufe
//! dann mit `peer_disconnected` scheitern.
//!
//! Der [`VoiceBroadcaster`] verteilt `voice:data`-Events an alle anderen
//! Verbindungen. Best-effort: volle oder geschlossene Voice-Queues werden
//! uebersprungen, nichts wird wiederholt.

use callrelay_core::types::ConnectionId;
use callrelay_observability::RelayMetrics;
use callrelay_protocol::control::ServerEvent;
use callrelay_protocol::voice::VoiceData;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use crate::error::{SignalingError, SignalingResult};
use crate::registry::ConnectionRegistry;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queues einer Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub connection_id: ConnectionId,
    steuerung: mpsc::Sender<ServerEvent>,
    voice: mpsc::Sender<ServerEvent>,
    ueberlauf: Arc<Notify>,
}

impl ClientSender {
    /// Erstellt Sender und Empfangsseite einer Verbindung
    ///
    /// Beide Queues fassen `groesse` Events.
    pub fn kanal(connection_id: ConnectionId, groesse: usize) -> (Self, SendeQueue) {
        let groesse = groesse.max(1);
        let (steuer_tx, steuer_rx) = mpsc::channel(groesse);
        let (voice_tx, voice_rx) = mpsc::channel(groesse);
        let ueberlauf = Arc::new(Notify::new());

        let sender = Self {
            connection_id,
            steuerung: steuer_tx,
            voice: voice_tx,
            ueberlauf: Arc::clone(&ueberlauf),
        };
        let queue = SendeQueue {
            steuerung: steuer_rx,
            voice: voice_rx,
            ueberlauf,
        };
        (sender, queue)
    }

    /// Reiht ein Signaling-Event nicht-blockierend ein
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist. Bei
    /// voller Queue wird der Verbindungs-Task zum Trennen aufgefordert.
    pub fn senden(&self, event: ServerEvent) -> bool {
        match self.steuerung.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    event = event.name(),
                    "Steuer-Queue voll – Verbindung wird getrennt"
                );
                self.ueberlauf.notify_one();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    "Send-Queue geschlossen (Verbindung getrennt)"
                );
                false
            }
        }
    }

    /// Reiht ein Voice-Event ein; volle Queue verwirft still
    pub fn senden_verlustbehaftet(&self, event: ServerEvent) -> bool {
        self.voice.try_send(event).is_ok()
    }

    /// Der Verbindungs-Task liest noch aus der Queue
    pub fn ist_offen(&self) -> bool {
        !self.steuerung.is_closed()
    }
}

// ---------------------------------------------------------------------------
// SendeQueue
// ---------------------------------------------------------------------------

/// Empfangsseite der Send-Queues, gehoert dem Verbindungs-Task
#[derive(Debug)]
pub struct SendeQueue {
    steuerung: mpsc::Receiver<ServerEvent>,
    voice: mpsc::Receiver<ServerEvent>,
    ueberlauf: Arc<Notify>,
}

impl SendeQueue {
    /// Naechstes ausgehendes Event, Signaling vor Voice
    ///
    /// `None` heisst: die Steuer-Queue ist uebergelaufen und die Verbindung
    /// muss getrennt werden.
    pub async fn naechstes(&mut self) -> Option<ServerEvent> {
        tokio::select! {
            biased;
            _ = self.ueberlauf.notified() => None,
            Some(event) = self.steuerung.recv() => Some(event),
            Some(event) = self.voice.recv() => Some(event),
        }
    }

    /// Nicht-blockierend, Signaling vor Voice
    pub fn try_recv(&mut self) -> Result<ServerEvent, mpsc::error::TryRecvError> {
        match self.steuerung.try_recv() {
            Ok(event) => Ok(event),
            Err(_) => self.voice.try_recv(),
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceBroadcaster
// ---------------------------------------------------------------------------

/// Fire-and-forget-Verteilung von Voice-Activity-Metadaten
#[derive(Clone)]
pub struct VoiceBroadcaster {
    registry: ConnectionRegistry,
    metriken: RelayMetrics,
}

impl VoiceBroadcaster {
    pub fn neu(registry: ConnectionRegistry, metriken: RelayMetrics) -> Self {
        Self { registry, metriken }
    }

    /// Verteilt ein Voice-Event des Absenders
    ///
    /// Ohne `recipientId` an alle anderen Verbindungen, mit `recipientId` nur
    /// an die Verbindungen dieses Users. Nie zurueck an den Absender.
    /// Gibt die Anzahl der Empfaenger zurueck, bei denen das Event
    /// eingereiht wurde.
    pub fn veroeffentlichen(
        &self,
        absender: &ConnectionId,
        data: VoiceData,
    ) -> SignalingResult<usize> {
        let verbindung = self.registry.lookup(absender)?;

        let mut data = data
            .normalisiert()
            .ok_or_else(|| SignalingError::Malformed("volume ist keine endliche Zahl".into()))?;

        // Gebundene Verbindungen sprechen nur fuer sich selbst
        if let Some(identitaet) = verbindung.identitaet {
            data.user_id = identitaet.user_id;
        }

        let empfaenger = match &data.recipient_id {
            Some(user_id) => self.registry.sender_von_user(user_id, Some(absender)),
            None => self.registry.sender_ausser(absender),
        };

        if empfaenger.is_empty() {
            return Ok(0);
        }

        let event = ServerEvent::VoiceData(data);
        let mut zugestellt = 0;
        for sender in &empfaenger {
            if sender.senden_verlustbehaftet(event.clone()) {
                zugestellt += 1;
            }
        }

        let verworfen = empfaenger.len() - zugestellt;
        self.metriken.voice_events_total.inc_by(zugestellt as u64);
        if verworfen > 0 {
            self.metriken.voice_dropped_total.inc_by(verworfen as u64);
        }

        tracing::trace!(
            connection_id = %absender,
            zugestellt,
            verworfen,
            "voice:data verteilt"
        );
        Ok(zugestellt)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
