//! Call-Session-Manager – Zustandsautomat pro Anrufversuch
//!
//! ```text
//! (keine) --invite--> calling --ring--> ringing --accept--> connecting --connected--> connected
//!                        |                 |                    |                        |
//!                        +-- reject/timeout (rejected) ---------+                        |
//!                        +-- failed / hangup (ended) aus jedem nicht-terminalen Zustand -+
//! ```
//!
//! Alle Operationen laufen unter einem einzigen Mutex. Sie berechnen die
//! ausgehenden Events als `Vec<Zustellung>`, reihen sie noch unter dem Lock
//! nicht-blockierend in die Verbindungs-Queues ein und geben sie zurueck.
//! Jede Verbindung sieht die Uebergaenge einer Session damit in genau der
//! Reihenfolge, in der sie unter dem Lock passiert sind.
//! Die Pruefung "Session noch im erwarteten Zustand" unter dem Lock sorgt
//! dafuer, dass von zwei konkurrierenden Operationen (z.B. accept gegen
//! Timeout) hoechstens eine wirkt.
//!
//! Lock-Reihenfolge: Anruf-Lock vor Registry-Lock, nie umgekehrt.

use callrelay_core::types::{ConnectionId, SessionId, UserId};
use callrelay_observability::RelayMetrics;
use callrelay_protocol::control::{CallState, IncomingCall, ServerEvent, SignalMessage, StateReason};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{SignalingError, SignalingResult};
use crate::registry::{ConnectionRegistry, Zustellung};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Zeitliche Richtwerte fuer Anruf-Sessions
#[derive(Debug, Clone, Copy)]
pub struct AnrufKonfig {
    /// Wie lange eine Einladung unbeantwortet klingeln darf
    pub klingel_timeout: Duration,
    /// Wie lange terminale Sessions fuer spaete Nachrichten aufbewahrt werden
    pub nachlauf: Duration,
}

impl Default for AnrufKonfig {
    fn default() -> Self {
        Self {
            klingel_timeout: Duration::from_secs(45),
            nachlauf: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Uebergangstabelle
// ---------------------------------------------------------------------------

/// Erlaubte Uebergaenge des Zustandsautomaten
///
/// `failed` und `ended` sind aus jedem nicht-terminalen Zustand erreichbar.
pub fn uebergang_erlaubt(von: CallState, nach: CallState) -> bool {
    use CallState::*;
    match (von, nach) {
        (Calling, Ringing) => true,
        (Ringing, Connecting) => true,
        (Calling | Ringing, Rejected) => true,
        (Connecting, Connected) => true,
        (v, Failed | Ended) => !v.ist_terminal(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// CallSession
// ---------------------------------------------------------------------------

/// Ein Anrufversuch zwischen zwei Usern
#[derive(Debug, Clone)]
pub struct CallSession {
    pub id: SessionId,
    pub anrufer: ConnectionId,
    pub anrufer_user: UserId,
    pub anrufer_name: String,
    pub angerufener_user: UserId,
    /// Verbindung des Angerufenen; gesetzt sobald ein Kandidat antwortet
    pub angerufener: Option<ConnectionId>,
    /// Verbindungen des Angerufenen auf denen es klingelt
    pub kandidaten: Vec<ConnectionId>,
    pub zustand: CallState,
    /// Grund der letzten serverseitigen Zustandsaenderung
    pub grund: Option<StateReason>,
    pub erstellt: Instant,
    pub letzter_uebergang: Instant,
    /// Alle durchlaufenen Zustaende, beginnend mit `calling`
    pub verlauf: Vec<CallState>,
}

impl CallSession {
    /// Ist die Verbindung ein Endpunkt dieser Session?
    ///
    /// Vor dem Binden des Angerufenen zaehlen alle Kandidaten.
    pub fn ist_teilnehmer(&self, verbindung: &ConnectionId) -> bool {
        if &self.anrufer == verbindung {
            return true;
        }
        match &self.angerufener {
            Some(angerufener) => angerufener == verbindung,
            None => self.kandidaten.contains(verbindung),
        }
    }

    /// Verbindungen der Angerufenen-Seite (gebunden oder alle Kandidaten)
    pub fn angerufenen_seite(&self) -> Vec<ConnectionId> {
        match self.angerufener {
            Some(angerufener) => vec![angerufener],
            None => self.kandidaten.clone(),
        }
    }

    /// Die jeweils andere Seite aus Sicht von `verbindung`
    pub fn gegenseite(&self, verbindung: &ConnectionId) -> Vec<ConnectionId> {
        if &self.anrufer == verbindung {
            self.angerufenen_seite()
        } else {
            vec![self.anrufer]
        }
    }

    /// Beide Seiten
    pub fn alle_verbindungen(&self) -> Vec<ConnectionId> {
        let mut alle = vec![self.anrufer];
        alle.extend(self.angerufenen_seite());
        alle
    }

    fn paar(&self) -> (UserId, UserId) {
        (self.anrufer_user.clone(), self.angerufener_user.clone())
    }

    /// Fuehrt einen Uebergang aus oder lehnt ihn ab
    fn wechseln(
        &mut self,
        nach: CallState,
        grund: Option<StateReason>,
        jetzt: Instant,
    ) -> SignalingResult<()> {
        let von = self.zustand;
        if !uebergang_erlaubt(von, nach) {
            return Err(SignalingError::InvalidTransition {
                session_id: self.id,
                von,
                nach,
            });
        }
        self.zustand = nach;
        self.grund = grund;
        self.letzter_uebergang = jetzt;
        self.verlauf.push(nach);

        tracing::info!(
            session_id = %self.id,
            von = %von,
            nach = %nach,
            grund = grund.map(|g| g.als_str()).unwrap_or("-"),
            "Anruf-Zustand geaendert"
        );
        Ok(())
    }

    /// Fehler fuer Operationen auf einer terminalen Session
    fn beendet_fehler(&self) -> SignalingError {
        match self.grund {
            Some(StateReason::Timeout) => SignalingError::Timeout(self.id),
            Some(StateReason::PeerDisconnected) => SignalingError::PeerDisconnected(self.id),
            _ => SignalingError::SessionEnded(self.id),
        }
    }

    fn zustand_an(&self, an: &[ConnectionId], grund: Option<StateReason>) -> Vec<Zustellung> {
        an.iter()
            .map(|c| Zustellung::neu(*c, ServerEvent::zustand(self.id, self.zustand, grund)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// CallSessionManager
// ---------------------------------------------------------------------------

/// Verwaltet alle Anruf-Sessions
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct CallSessionManager {
    inner: Arc<Mutex<AnrufInner>>,
    registry: ConnectionRegistry,
    konfig: AnrufKonfig,
    metriken: RelayMetrics,
}

#[derive(Default)]
struct AnrufInner {
    sitzungen: HashMap<SessionId, CallSession>,
    /// Nicht-terminale Session pro (Anrufer, Angerufener)
    aktive_paare: HashMap<(UserId, UserId), SessionId>,
    /// Verbindungen in einer nicht-terminalen Session (inkl. Kandidaten)
    aktive_verbindungen: HashMap<ConnectionId, SessionId>,
}

impl AnrufInner {
    /// Session fuer eine Operation von `verbindung` holen und pruefen
    fn pruefen(
        &mut self,
        verbindung: &ConnectionId,
        session_id: &SessionId,
    ) -> SignalingResult<&mut CallSession> {
        let sitzung = self
            .sitzungen
            .get_mut(session_id)
            .ok_or(SignalingError::UnknownSession(*session_id))?;
        if !sitzung.ist_teilnehmer(verbindung) {
            return Err(SignalingError::NotAParticipant(*session_id));
        }
        if sitzung.zustand.ist_terminal() {
            return Err(sitzung.beendet_fehler());
        }
        Ok(sitzung)
    }

    /// Gibt Paar und Verbindungen einer terminal gewordenen Session frei
    fn freigeben(&mut self, session_id: &SessionId) {
        let Some(sitzung) = self.sitzungen.get(session_id) else {
            return;
        };
        let paar = sitzung.paar();
        if self.aktive_paare.get(&paar) == Some(session_id) {
            self.aktive_paare.remove(&paar);
        }
        self.aktive_verbindungen.retain(|_, sid| sid != session_id);
    }

    /// Bindet den antwortenden Kandidaten, gibt die uebrigen frei
    fn angerufenen_binden(&mut self, session_id: &SessionId, verbindung: ConnectionId) -> Vec<ConnectionId> {
        let Some(sitzung) = self.sitzungen.get_mut(session_id) else {
            return Vec::new();
        };
        if sitzung.angerufener.is_some() {
            return Vec::new();
        }
        sitzung.angerufener = Some(verbindung);
        let uebrige: Vec<ConnectionId> = sitzung
            .kandidaten
            .iter()
            .filter(|c| **c != verbindung)
            .copied()
            .collect();
        for c in &uebrige {
            self.aktive_verbindungen.remove(c);
        }
        uebrige
    }
}

impl CallSessionManager {
    pub fn neu(registry: ConnectionRegistry, konfig: AnrufKonfig, metriken: RelayMetrics) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AnrufInner::default())),
            registry,
            konfig,
            metriken,
        }
    }

    pub fn konfig(&self) -> AnrufKonfig {
        self.konfig
    }

    // -----------------------------------------------------------------------
    // Einladung
    // -----------------------------------------------------------------------

    /// Startet einen Anruf von `anrufer` an `angerufener_user`
    ///
    /// Klingelt auf allen freien Verbindungen des Angerufenen und bestaetigt
    /// dem Anrufer den Zustand `calling`.
    pub fn einladen(
        &self,
        anrufer: &ConnectionId,
        angerufener_user: &UserId,
    ) -> SignalingResult<(SessionId, Vec<Zustellung>)> {
        let verbindung = self.registry.lookup(anrufer)?;
        let identitaet = verbindung
            .identitaet
            .ok_or(SignalingError::NotAuthenticated)?;

        if !angerufener_user.ist_gueltig() {
            return Err(SignalingError::ungueltig("calleeUserId darf nicht leer sein"));
        }
        if &identitaet.user_id == angerufener_user {
            return Err(SignalingError::ungueltig("Anruf an sich selbst"));
        }

        let mut inner = self.inner.lock();

        if inner.aktive_verbindungen.contains_key(anrufer) {
            return Err(SignalingError::SessionAlreadyActive);
        }
        let paar = (identitaet.user_id.clone(), angerufener_user.clone());
        if inner.aktive_paare.contains_key(&paar) {
            return Err(SignalingError::SessionAlreadyActive);
        }

        // Liveness unter dem Anruf-Lock pruefen: eine gerade abgemeldete
        // Verbindung kann so nicht mehr Kandidat werden.
        let lebendig: Vec<ConnectionId> = self
            .registry
            .lookup_by_user(angerufener_user)
            .into_iter()
            .filter(|c| c.ist_lebendig())
            .map(|c| c.id)
            .collect();
        if lebendig.is_empty() {
            return Err(SignalingError::UserOffline(angerufener_user.clone()));
        }

        let kandidaten: Vec<ConnectionId> = lebendig
            .into_iter()
            .filter(|c| !inner.aktive_verbindungen.contains_key(c))
            .collect();
        if kandidaten.is_empty() {
            return Err(SignalingError::UserBusy(angerufener_user.clone()));
        }

        let jetzt = Instant::now();
        let sitzung = CallSession {
            id: SessionId::new(),
            anrufer: *anrufer,
            anrufer_user: identitaet.user_id.clone(),
            anrufer_name: identitaet.display_name.clone(),
            angerufener_user: angerufener_user.clone(),
            angerufener: None,
            kandidaten,
            zustand: CallState::Calling,
            grund: None,
            erstellt: jetzt,
            letzter_uebergang: jetzt,
            verlauf: vec![CallState::Calling],
        };
        let session_id = sitzung.id;

        let mut zustellungen: Vec<Zustellung> = sitzung
            .kandidaten
            .iter()
            .map(|c| {
                Zustellung::neu(
                    *c,
                    ServerEvent::CallIncoming(IncomingCall {
                        session_id,
                        caller_user_id: sitzung.anrufer_user.clone(),
                        caller_display_name: sitzung.anrufer_name.clone(),
                    }),
                )
            })
            .collect();
        zustellungen.push(Zustellung::neu(
            *anrufer,
            ServerEvent::zustand(session_id, CallState::Calling, None),
        ));

        inner.aktive_paare.insert(paar, session_id);
        inner.aktive_verbindungen.insert(*anrufer, session_id);
        for c in &sitzung.kandidaten {
            inner.aktive_verbindungen.insert(*c, session_id);
        }

        tracing::info!(
            session_id = %session_id,
            anrufer = %sitzung.anrufer_user,
            angerufener = %sitzung.angerufener_user,
            kandidaten = sitzung.kandidaten.len(),
            "Anruf gestartet"
        );

        inner.sitzungen.insert(session_id, sitzung);
        self.metriken.calls_active.set(inner.aktive_paare.len() as i64);

        Ok((session_id, self.ausliefern(zustellungen)))
    }

    // -----------------------------------------------------------------------
    // Angerufenen-Seite
    // -----------------------------------------------------------------------

    /// Client des Angerufenen meldet: es klingelt
    pub fn klingeln(
        &self,
        verbindung: &ConnectionId,
        session_id: &SessionId,
    ) -> SignalingResult<Vec<Zustellung>> {
        let mut inner = self.inner.lock();
        let sitzung = inner.pruefen(verbindung, session_id)?;
        if &sitzung.anrufer == verbindung {
            return Err(SignalingError::ungueltig("Nur der Angerufene kann klingeln"));
        }
        // Mehrere Tabs melden dasselbe Klingeln
        if sitzung.zustand == CallState::Ringing {
            return Ok(Vec::new());
        }

        let anrufer = sitzung.anrufer;
        if !self.registry.ist_lebendig(&anrufer) {
            sitzung.wechseln(
                CallState::Failed,
                Some(StateReason::PeerDisconnected),
                Instant::now(),
            )?;
            let an = sitzung.angerufenen_seite();
            let zustellungen = sitzung.zustand_an(&an, Some(StateReason::PeerDisconnected));
            self.abschliessen(&mut inner, session_id);
            return Ok(self.ausliefern(zustellungen));
        }

        sitzung.wechseln(CallState::Ringing, None, Instant::now())?;
        let zustellungen = sitzung.zustand_an(&[anrufer], None);
        Ok(self.ausliefern(zustellungen))
    }

    /// Angerufener nimmt an (nur aus `ringing`)
    pub fn annehmen(
        &self,
        verbindung: &ConnectionId,
        session_id: &SessionId,
    ) -> SignalingResult<Vec<Zustellung>> {
        let mut inner = self.inner.lock();
        let sitzung = inner.pruefen(verbindung, session_id)?;
        if &sitzung.anrufer == verbindung {
            return Err(SignalingError::ungueltig("Nur der Angerufene kann annehmen"));
        }
        sitzung.wechseln(CallState::Connecting, None, Instant::now())?;
        let anrufer = sitzung.anrufer;

        let uebrige = inner.angerufenen_binden(session_id, *verbindung);
        let Some(sitzung) = inner.sitzungen.get(session_id) else {
            return Err(SignalingError::UnknownSession(*session_id));
        };

        let mut zustellungen = sitzung.zustand_an(&[anrufer, *verbindung], None);
        zustellungen.extend(sitzung.zustand_an(&uebrige, Some(StateReason::AnsweredElsewhere)));
        Ok(self.ausliefern(zustellungen))
    }

    /// Angerufener lehnt ab (aus `calling` oder `ringing`)
    pub fn ablehnen(
        &self,
        verbindung: &ConnectionId,
        session_id: &SessionId,
    ) -> SignalingResult<Vec<Zustellung>> {
        let mut inner = self.inner.lock();
        let sitzung = inner.pruefen(verbindung, session_id)?;
        if &sitzung.anrufer == verbindung {
            return Err(SignalingError::ungueltig(
                "Der Anrufer beendet mit call:hangup, nicht call:reject",
            ));
        }
        sitzung.wechseln(CallState::Rejected, None, Instant::now())?;
        let anrufer = sitzung.anrufer;

        let uebrige = inner.angerufenen_binden(session_id, *verbindung);
        let Some(sitzung) = inner.sitzungen.get(session_id) else {
            return Err(SignalingError::UnknownSession(*session_id));
        };

        let mut zustellungen = sitzung.zustand_an(&[anrufer, *verbindung], None);
        zustellungen.extend(sitzung.zustand_an(&uebrige, Some(StateReason::AnsweredElsewhere)));
        self.abschliessen(&mut inner, session_id);
        Ok(self.ausliefern(zustellungen))
    }

    // -----------------------------------------------------------------------
    // Beide Seiten
    // -----------------------------------------------------------------------

    /// Aushandlung erfolgreich (`connecting -> connected`)
    ///
    /// Beide Seiten duerfen das melden; die zweite Meldung ist ein No-op.
    pub fn verbunden(
        &self,
        verbindung: &ConnectionId,
        session_id: &SessionId,
    ) -> SignalingResult<Vec<Zustellung>> {
        let mut inner = self.inner.lock();
        let sitzung = inner.pruefen(verbindung, session_id)?;
        if sitzung.zustand == CallState::Connected {
            return Ok(Vec::new());
        }
        let jetzt = Instant::now();
        sitzung.wechseln(CallState::Connected, None, jetzt)?;

        self.metriken
            .call_setup_seconds
            .observe(jetzt.saturating_duration_since(sitzung.erstellt).as_secs_f64());

        let an = sitzung.alle_verbindungen();
        let zustellungen = sitzung.zustand_an(&an, None);
        Ok(self.ausliefern(zustellungen))
    }

    /// Reicht eine opake SDP/ICE-Nutzlast unveraendert an die Gegenseite weiter
    pub fn signal_weiterleiten(
        &self,
        verbindung: &ConnectionId,
        session_id: &SessionId,
        payload: serde_json::Value,
    ) -> SignalingResult<Vec<Zustellung>> {
        let mut inner = self.inner.lock();
        let sitzung = inner.pruefen(verbindung, session_id)?;
        let gegenseite = sitzung.gegenseite(verbindung);

        tracing::trace!(
            session_id = %session_id,
            connection_id = %verbindung,
            empfaenger = gegenseite.len(),
            "call:signal weitergeleitet"
        );

        let mut zustellungen = Vec::with_capacity(gegenseite.len());
        for an in gegenseite {
            zustellungen.push(Zustellung::neu(
                an,
                ServerEvent::CallSignal(SignalMessage {
                    session_id: *session_id,
                    payload: payload.clone(),
                }),
            ));
        }
        Ok(self.ausliefern(zustellungen))
    }

    /// Auflegen aus jedem nicht-terminalen Zustand (`-> ended`)
    ///
    /// Legt der Anrufer vor der Annahme auf, erfahren es alle Kandidaten.
    pub fn auflegen(
        &self,
        verbindung: &ConnectionId,
        session_id: &SessionId,
    ) -> SignalingResult<Vec<Zustellung>> {
        let mut inner = self.inner.lock();
        let sitzung = inner.pruefen(verbindung, session_id)?;
        sitzung.wechseln(CallState::Ended, None, Instant::now())?;
        let ist_anrufer = &sitzung.anrufer == verbindung;

        let uebrige = if ist_anrufer {
            Vec::new()
        } else {
            inner.angerufenen_binden(session_id, *verbindung)
        };
        let Some(sitzung) = inner.sitzungen.get(session_id) else {
            return Err(SignalingError::UnknownSession(*session_id));
        };

        let mut zustellungen = sitzung.zustand_an(&sitzung.alle_verbindungen(), None);
        zustellungen.extend(sitzung.zustand_an(&uebrige, Some(StateReason::AnsweredElsewhere)));
        self.abschliessen(&mut inner, session_id);
        Ok(self.ausliefern(zustellungen))
    }

    /// Ein Teilnehmer meldet einen Fehler (`-> failed`)
    pub fn fehlschlagen(
        &self,
        verbindung: &ConnectionId,
        session_id: &SessionId,
        grund: StateReason,
    ) -> SignalingResult<Vec<Zustellung>> {
        let mut inner = self.inner.lock();
        let sitzung = inner.pruefen(verbindung, session_id)?;
        sitzung.wechseln(CallState::Failed, Some(grund), Instant::now())?;

        let zustellungen = sitzung.zustand_an(&sitzung.alle_verbindungen(), Some(grund));
        self.abschliessen(&mut inner, session_id);
        Ok(self.ausliefern(zustellungen))
    }

    // -----------------------------------------------------------------------
    // Verbindungsabbruch und Timeouts
    // -----------------------------------------------------------------------

    /// Eine Verbindung ist weg: betroffene Session scheitert
    ///
    /// Idempotent; eine unbekannte Verbindung ergibt keine Zustellungen.
    pub fn verbindung_verloren(&self, verbindung: &ConnectionId) -> Vec<Zustellung> {
        let mut inner = self.inner.lock();
        let Some(session_id) = inner.aktive_verbindungen.remove(verbindung) else {
            return Vec::new();
        };
        let Some(sitzung) = inner.sitzungen.get_mut(&session_id) else {
            return Vec::new();
        };
        if sitzung.zustand.ist_terminal() {
            return Vec::new();
        }

        let ist_endpunkt =
            &sitzung.anrufer == verbindung || sitzung.angerufener.as_ref() == Some(verbindung);

        if !ist_endpunkt {
            // Ungebundener Kandidat: nur aus der Liste nehmen
            sitzung.kandidaten.retain(|c| c != verbindung);
            if !sitzung.kandidaten.is_empty() {
                tracing::debug!(
                    session_id = %session_id,
                    connection_id = %verbindung,
                    "Kandidat getrennt, Anruf klingelt weiter"
                );
                return Vec::new();
            }
        }

        let grund = Some(StateReason::PeerDisconnected);
        if sitzung
            .wechseln(CallState::Failed, grund, Instant::now())
            .is_err()
        {
            return Vec::new();
        }
        let uebrige: Vec<ConnectionId> = sitzung
            .alle_verbindungen()
            .into_iter()
            .filter(|c| c != verbindung)
            .collect();
        let zustellungen = sitzung.zustand_an(&uebrige, grund);
        self.abschliessen(&mut inner, &session_id);
        self.ausliefern(zustellungen)
    }

    /// Periodische Pruefung
    ///
    /// Unbeantwortete Einladungen nach dem Klingel-Timeout -> `rejected`
    /// (Grund `timeout`, an beide Seiten). Terminale Sessions werden nach
    /// dem Nachlauf entfernt.
    pub fn sweep(&self, jetzt: Instant) -> Vec<Zustellung> {
        let mut inner = self.inner.lock();
        let mut zustellungen = Vec::new();

        let abgelaufen: Vec<SessionId> = inner
            .sitzungen
            .values()
            .filter(|s| {
                s.zustand.ist_ausstehend()
                    && jetzt.saturating_duration_since(s.erstellt) >= self.konfig.klingel_timeout
            })
            .map(|s| s.id)
            .collect();

        for session_id in abgelaufen {
            let Some(sitzung) = inner.sitzungen.get_mut(&session_id) else {
                continue;
            };
            let grund = Some(StateReason::Timeout);
            if sitzung.wechseln(CallState::Rejected, grund, jetzt).is_err() {
                continue;
            }
            zustellungen.extend(sitzung.zustand_an(&sitzung.alle_verbindungen(), grund));
            self.abschliessen(&mut inner, &session_id);
        }

        let vorher = inner.sitzungen.len();
        let nachlauf = self.konfig.nachlauf;
        inner.sitzungen.retain(|_, s| {
            !(s.zustand.ist_terminal()
                && jetzt.saturating_duration_since(s.letzter_uebergang) >= nachlauf)
        });
        let entfernt = vorher - inner.sitzungen.len();
        if entfernt > 0 {
            tracing::debug!(entfernt, "Beendete Sessions abgeraeumt");
        }

        self.ausliefern(zustellungen)
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    /// Momentaufnahme einer Session (auch terminal, bis sie abgeraeumt ist)
    pub fn sitzung(&self, session_id: &SessionId) -> Option<CallSession> {
        self.inner.lock().sitzungen.get(session_id).cloned()
    }

    /// Aktive Session einer Verbindung
    pub fn sitzung_von_verbindung(&self, verbindung: &ConnectionId) -> Option<SessionId> {
        self.inner.lock().aktive_verbindungen.get(verbindung).copied()
    }

    /// Ist die Verbindung Endpunkt einer noch nicht terminalen Session?
    pub fn ist_teilnehmer(&self, verbindung: &ConnectionId, session_id: &SessionId) -> bool {
        self.inner
            .lock()
            .sitzungen
            .get(session_id)
            .is_some_and(|s| !s.zustand.ist_terminal() && s.ist_teilnehmer(verbindung))
    }

    /// Anzahl nicht-terminaler Sessions
    pub fn aktive_anzahl(&self) -> usize {
        self.inner.lock().aktive_paare.len()
    }

    /// Anzahl gehaltener Sessions (inkl. terminaler im Nachlauf)
    pub fn gesamt_anzahl(&self) -> usize {
        self.inner.lock().sitzungen.len()
    }

    /// Reiht die Zustellungen ein; nur mit gehaltenem Anruf-Lock aufrufen
    fn ausliefern(&self, zustellungen: Vec<Zustellung>) -> Vec<Zustellung> {
        self.registry.zustellen(&zustellungen);
        zustellungen
    }

    fn abschliessen(&self, inner: &mut AnrufInner, session_id: &SessionId) {
        inner.freigeben(session_id);
        if let Some(sitzung) = inner.sitzungen.get(session_id) {
            self.metriken.anruf_beendet(sitzung.zustand.als_str());
        }
        self.metriken.calls_active.set(inner.aktive_paare.len() as i64);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
