//! Presence-Tracker – Wer ist online?
//!
//! Rein abgeleitet aus der [`ConnectionRegistry`]: haelt keinen eigenen
//! Zustand. Ein User ist online solange er mindestens eine gebundene
//! Verbindung hat.
//!
//! Die Spiegelung ([`PresenceTracker::spiegelung_starten`]) schickt bei jedem
//! Online/Offline-Wechsel die komplette Liste als `presence:online` an alle
//! Verbindungen.

use callrelay_core::types::UserId;
use callrelay_observability::RelayMetrics;
use callrelay_protocol::control::{PresenceSnapshot, ServerEvent};
use std::collections::HashSet;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::registry::{ConnectionRegistry, PresenceEvent};

/// Abgeleitete Sicht auf die online User
#[derive(Clone)]
pub struct PresenceTracker {
    registry: ConnectionRegistry,
}

impl PresenceTracker {
    pub fn neu(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Menge aller User mit mindestens einer Verbindung
    pub fn online_users(&self) -> HashSet<UserId> {
        self.registry.online_user_ids().into_iter().collect()
    }

    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.registry.ist_online(user_id)
    }

    pub fn online_anzahl(&self) -> usize {
        self.registry.online_anzahl()
    }

    /// Abonniert Presence-Events (join/leave pro Verbindung)
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.registry.events_abonnieren()
    }

    /// Aktuelle Liste als `presence:online`-Event
    pub fn snapshot(&self) -> ServerEvent {
        ServerEvent::PresenceOnline(PresenceSnapshot {
            user_ids: self.registry.online_user_ids(),
        })
    }

    /// Startet den Task der Presence-Wechsel an alle Verbindungen spiegelt
    ///
    /// Das Abonnement wird vor dem Spawn angelegt, damit keine Events
    /// zwischen Aufruf und Task-Start verloren gehen.
    pub fn spiegelung_starten(
        &self,
        metriken: RelayMetrics,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let tracker = self.clone();
        let mut events = self.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    ergebnis = events.recv() => {
                        match ergebnis {
                            Ok(event) if event.status_gewechselt() => {
                                tracker.verteilen(&metriken);
                            }
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(verpasst)) => {
                                tracing::warn!(verpasst, "Presence-Events verpasst – sende Snapshot");
                                tracker.verteilen(&metriken);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }

                    Ok(()) = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Presence-Spiegelung beendet");
        })
    }

    fn verteilen(&self, metriken: &RelayMetrics) {
        let snapshot = self.snapshot();
        metriken.online_users.set(self.online_anzahl() as i64);
        let gesendet = self.registry.an_alle_senden(snapshot, None);
        tracing::debug!(
            online = self.online_anzahl(),
            empfaenger = gesendet,
            "presence:online verteilt"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{ClientSender, SendeQueue};
    use callrelay_core::types::{ConnectionId, UserIdentity};
    use std::time::Duration;

    fn verbinden(
        registry: &ConnectionRegistry,
        user: &str,
    ) -> (ConnectionId, SendeQueue) {
        let id = ConnectionId::new();
        let (sender, rx) = ClientSender::kanal(id, 16);
        registry.registrieren(id, sender);
        registry
            .binden(&id, UserIdentity::neu(UserId::new(user), None))
            .unwrap();
        (id, rx)
    }

    async fn naechster_snapshot(rx: &mut SendeQueue) -> Vec<UserId> {
        let event = tokio::time::timeout(Duration::from_secs(1), rx.naechstes())
            .await
            .expect("Timeout beim Warten auf presence:online")
            .expect("Queue geschlossen");
        match event {
            ServerEvent::PresenceOnline(s) => s.user_ids,
            anderes => panic!("presence:online erwartet, bekommen: {anderes:?}"),
        }
    }

    #[test]
    fn online_users_aus_registry() {
        let registry = ConnectionRegistry::neu();
        let presence = PresenceTracker::neu(registry.clone());
        let (a, _ra) = verbinden(&registry, "alice");
        let (_b, _rb) = verbinden(&registry, "bob");

        let online = presence.online_users();
        assert!(online.contains(&UserId::new("alice")));
        assert!(online.contains(&UserId::new("bob")));
        assert_eq!(presence.online_anzahl(), 2);

        registry.abmelden(&a);
        assert!(!presence.ist_online(&UserId::new("alice")));
    }

    #[tokio::test]
    async fn spiegelung_schickt_liste_bei_wechsel() {
        let registry = ConnectionRegistry::neu();
        let presence = PresenceTracker::neu(registry.clone());
        let metriken = RelayMetrics::neu().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = presence.spiegelung_starten(metriken.clone(), shutdown_rx);

        let (_a, mut ra) = verbinden(&registry, "alice");
        assert_eq!(naechster_snapshot(&mut ra).await, vec![UserId::new("alice")]);

        let (b, _rb) = verbinden(&registry, "bob");
        assert_eq!(
            naechster_snapshot(&mut ra).await,
            vec![UserId::new("alice"), UserId::new("bob")]
        );

        registry.abmelden(&b);
        assert_eq!(naechster_snapshot(&mut ra).await, vec![UserId::new("alice")]);
        assert_eq!(metriken.online_users.get(), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
