//! Connection-Registry – Einzige Quelle fuer "lebt diese Verbindung noch"
//!
//! Bildet `ConnectionId` auf die Send-Queue der Verbindung und ihre
//! (optionale) User-Identitaet ab. Ein User kann mehrere Verbindungen
//! gleichzeitig haben (mehrere Tabs).
//!
//! Jede Mutation erzeugt ein [`PresenceEvent`] auf dem Broadcast-Kanal.
//! Das Event wird im selben kritischen Abschnitt versendet wie die Mutation,
//! damit Subscriber die Reihenfolge der Mutationen sehen.
//!
//! Gesendet wird nie unter dem Registry-Lock: die Sender werden geklont und
//! nach dem Freigeben befuellt.

use callrelay_core::types::{ConnectionId, UserId, UserIdentity};
use callrelay_protocol::control::ServerEvent;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

use crate::broadcast::ClientSender;
use crate::error::{SignalingError, SignalingResult};

/// Groesse des Broadcast-Kanals fuer Presence-Events
const EVENT_KANAL_GROESSE: usize = 256;

// ---------------------------------------------------------------------------
// Presence-Events
// ---------------------------------------------------------------------------

/// Events die die Registry bei jeder Mutation versendet
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// Verbindung registriert (noch ohne Identitaet)
    Verbunden { connection_id: ConnectionId },
    /// Verbindung an einen User gebunden
    Gebunden {
        connection_id: ConnectionId,
        user_id: UserId,
        /// Erste Verbindung des Users: User ist jetzt online
        erste_verbindung: bool,
    },
    /// Verbindung entfernt
    Getrennt {
        connection_id: ConnectionId,
        user_id: Option<UserId>,
        /// Letzte Verbindung des Users: User ist jetzt offline
        letzte_verbindung: bool,
    },
}

impl PresenceEvent {
    /// Hat sich die Menge der online User geaendert?
    pub fn status_gewechselt(&self) -> bool {
        match self {
            Self::Verbunden { .. } => false,
            Self::Gebunden {
                erste_verbindung, ..
            } => *erste_verbindung,
            Self::Getrennt {
                letzte_verbindung, ..
            } => *letzte_verbindung,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Verbunden { connection_id }
            | Self::Gebunden { connection_id, .. }
            | Self::Getrennt { connection_id, .. } => *connection_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Eine registrierte Verbindung
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub sender: ClientSender,
    pub identitaet: Option<UserIdentity>,
    pub verbunden_seit: Instant,
}

impl Connection {
    /// Liveness: der Verbindungs-Task liest noch aus seiner Queue
    pub fn ist_lebendig(&self) -> bool {
        self.sender.ist_offen()
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.identitaet.as_ref().map(|i| &i.user_id)
    }
}

/// Ein Event fuer genau eine Verbindung
#[derive(Debug, Clone, PartialEq)]
pub struct Zustellung {
    pub an: ConnectionId,
    pub event: ServerEvent,
}

impl Zustellung {
    pub fn neu(an: ConnectionId, event: ServerEvent) -> Self {
        Self { an, event }
    }
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

/// Registry aller offenen Verbindungen
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    events: broadcast::Sender<PresenceEvent>,
}

#[derive(Default)]
struct RegistryInner {
    verbindungen: HashMap<ConnectionId, Connection>,
    /// User -> alle gebundenen Verbindungen
    nach_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn neu() -> Self {
        let (events, _) = broadcast::channel(EVENT_KANAL_GROESSE);
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            events,
        }
    }

    /// Nimmt eine neue Verbindung auf
    pub fn registrieren(&self, id: ConnectionId, sender: ClientSender) {
        let mut inner = self.inner.write();
        inner.verbindungen.insert(
            id,
            Connection {
                id,
                sender,
                identitaet: None,
                verbunden_seit: Instant::now(),
            },
        );
        let _ = self.events.send(PresenceEvent::Verbunden { connection_id: id });
        drop(inner);

        tracing::debug!(connection_id = %id, "Verbindung registriert");
    }

    /// Bindet eine User-Identitaet an die Verbindung
    ///
    /// Erneutes Binden an denselben User ist ein No-op.
    pub fn binden(&self, id: &ConnectionId, identitaet: UserIdentity) -> SignalingResult<()> {
        if !identitaet.user_id.ist_gueltig() {
            return Err(SignalingError::ungueltig("userId darf nicht leer sein"));
        }

        let mut inner = self.inner.write();
        let verbindung = inner
            .verbindungen
            .get_mut(id)
            .ok_or(SignalingError::VerbindungUnbekannt(*id))?;

        if let Some(bisher) = &verbindung.identitaet {
            if bisher.user_id == identitaet.user_id {
                return Ok(());
            }
            return Err(SignalingError::AlreadyBound(bisher.user_id.clone()));
        }

        let user_id = identitaet.user_id.clone();
        verbindung.identitaet = Some(identitaet);

        let tabs = inner.nach_user.entry(user_id.clone()).or_default();
        let erste_verbindung = tabs.is_empty();
        tabs.insert(*id);

        let _ = self.events.send(PresenceEvent::Gebunden {
            connection_id: *id,
            user_id: user_id.clone(),
            erste_verbindung,
        });
        drop(inner);

        tracing::info!(connection_id = %id, user_id = %user_id, "Verbindung gebunden");
        Ok(())
    }

    /// Entfernt eine Verbindung
    ///
    /// Gibt die entfernte Verbindung zurueck, `None` wenn sie bereits weg war.
    pub fn abmelden(&self, id: &ConnectionId) -> Option<Connection> {
        let mut inner = self.inner.write();
        let verbindung = inner.verbindungen.remove(id)?;

        let mut letzte_verbindung = false;
        if let Some(user_id) = verbindung.user_id() {
            if let Some(tabs) = inner.nach_user.get_mut(user_id) {
                tabs.remove(id);
                if tabs.is_empty() {
                    inner.nach_user.remove(user_id);
                    letzte_verbindung = true;
                }
            }
        }

        let _ = self.events.send(PresenceEvent::Getrennt {
            connection_id: *id,
            user_id: verbindung.user_id().cloned(),
            letzte_verbindung,
        });
        drop(inner);

        tracing::debug!(
            connection_id = %id,
            user_id = ?verbindung.user_id(),
            "Verbindung abgemeldet"
        );
        Some(verbindung)
    }

    /// Sucht eine Verbindung
    pub fn lookup(&self, id: &ConnectionId) -> SignalingResult<Connection> {
        self.inner
            .read()
            .verbindungen
            .get(id)
            .cloned()
            .ok_or(SignalingError::VerbindungUnbekannt(*id))
    }

    /// Alle Verbindungen eines Users
    pub fn lookup_by_user(&self, user_id: &UserId) -> Vec<Connection> {
        let inner = self.inner.read();
        let Some(tabs) = inner.nach_user.get(user_id) else {
            return Vec::new();
        };
        tabs.iter()
            .filter_map(|id| inner.verbindungen.get(id).cloned())
            .collect()
    }

    /// Registriert und Send-Queue noch offen
    pub fn ist_lebendig(&self, id: &ConnectionId) -> bool {
        self.inner
            .read()
            .verbindungen
            .get(id)
            .is_some_and(Connection::ist_lebendig)
    }

    /// Sortierte Liste aller online User
    pub fn online_user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.inner.read().nach_user.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.inner.read().nach_user.contains_key(user_id)
    }

    pub fn online_anzahl(&self) -> usize {
        self.inner.read().nach_user.len()
    }

    /// Anzahl registrierter Verbindungen
    pub fn anzahl(&self) -> usize {
        self.inner.read().verbindungen.len()
    }

    /// Abonniert die Presence-Events
    pub fn events_abonnieren(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Senden
    // -----------------------------------------------------------------------

    /// Sender aller Verbindungen ausser einer
    pub fn sender_ausser(&self, ausser: &ConnectionId) -> Vec<ClientSender> {
        self.inner
            .read()
            .verbindungen
            .values()
            .filter(|v| &v.id != ausser)
            .map(|v| v.sender.clone())
            .collect()
    }

    /// Sender aller Verbindungen eines Users, optional ohne eine Verbindung
    pub fn sender_von_user(
        &self,
        user_id: &UserId,
        ausser: Option<&ConnectionId>,
    ) -> Vec<ClientSender> {
        let inner = self.inner.read();
        let Some(tabs) = inner.nach_user.get(user_id) else {
            return Vec::new();
        };
        tabs.iter()
            .filter(|id| Some(*id) != ausser)
            .filter_map(|id| inner.verbindungen.get(id))
            .map(|v| v.sender.clone())
            .collect()
    }

    /// Sendet ein Event an eine Verbindung
    pub fn an_verbindung_senden(&self, id: &ConnectionId, event: ServerEvent) -> bool {
        let sender = self.inner.read().verbindungen.get(id).map(|v| v.sender.clone());
        match sender {
            Some(sender) => sender.senden(event),
            None => {
                tracing::debug!(connection_id = %id, "Senden an unbekannte Verbindung");
                false
            }
        }
    }

    /// Sendet ein Event an alle Verbindungen (optional ohne eine)
    ///
    /// Gibt die Anzahl der erfolgreichen Sendungen zurueck.
    pub fn an_alle_senden(&self, event: ServerEvent, ausser: Option<&ConnectionId>) -> usize {
        let sender: Vec<ClientSender> = self
            .inner
            .read()
            .verbindungen
            .values()
            .filter(|v| Some(&v.id) != ausser)
            .map(|v| v.sender.clone())
            .collect();

        sender.iter().filter(|s| s.senden(event.clone())).count()
    }

    /// Stellt eine Liste von Events zu
    ///
    /// Die Reihenfolge pro Verbindung bleibt erhalten. Verbindungen die
    /// inzwischen weg sind werden uebersprungen.
    pub fn zustellen(&self, zustellungen: &[Zustellung]) -> usize {
        if zustellungen.is_empty() {
            return 0;
        }

        let ziele: Vec<(Option<ClientSender>, &ServerEvent)> = {
            let inner = self.inner.read();
            zustellungen
                .iter()
                .map(|z| (inner.verbindungen.get(&z.an).map(|v| v.sender.clone()), &z.event))
                .collect()
        };

        let mut gesendet = 0;
        for (sender, event) in ziele {
            match sender {
                Some(sender) => {
                    if sender.senden(event.clone()) {
                        gesendet += 1;
                    }
                }
                None => {
                    tracing::trace!(event = event.name(), "Empfaenger nicht mehr registriert");
                }
            }
        }
        gesendet
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
