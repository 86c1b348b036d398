//! Prometheus-kompatible Metriken fuer callrelay
//!
//! Registrierte Metriken:
//! - `callrelay_connections_active` – Gauge: Offene WebSocket-Verbindungen
//! - `callrelay_online_users` – Gauge: User mit mindestens einer Verbindung
//! - `callrelay_calls_active` – Gauge: Nicht-terminale Anruf-Sessions
//! - `callrelay_calls_total` – Counter: Beendete Anrufe (outcome)
//! - `callrelay_call_errors_total` – Counter: `call:error`-Antworten (code)
//! - `callrelay_voice_events_total` – Counter: Zugestellte Voice-Events
//! - `callrelay_voice_dropped_total` – Counter: Verworfene Voice-Events
//! - `callrelay_call_setup_seconds` – Histogram: Einladung bis `connected`

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle callrelay-Prometheus-Metriken
#[derive(Clone)]
pub struct RelayMetrics {
    pub registry: Arc<Registry>,

    // Verbindungen
    pub connections_active: IntGauge,
    pub online_users: IntGauge,

    // Anrufe
    pub calls_active: IntGauge,
    pub calls_total: IntCounterVec,
    pub call_errors_total: IntCounterVec,
    pub call_setup_seconds: Histogram,

    // Voice-Activity
    pub voice_events_total: IntCounter,
    pub voice_dropped_total: IntCounter,
}

impl RelayMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Verbindungen ---
        let connections_active = IntGauge::with_opts(Opts::new(
            "callrelay_connections_active",
            "Anzahl offener WebSocket-Verbindungen",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        let online_users = IntGauge::with_opts(Opts::new(
            "callrelay_online_users",
            "Anzahl User mit mindestens einer Verbindung",
        ))?;
        registry.register(Box::new(online_users.clone()))?;

        // --- Anrufe ---
        let calls_active = IntGauge::with_opts(Opts::new(
            "callrelay_calls_active",
            "Anzahl nicht-terminaler Anruf-Sessions",
        ))?;
        registry.register(Box::new(calls_active.clone()))?;

        let calls_total = IntCounterVec::new(
            Opts::new(
                "callrelay_calls_total",
                "Beendete Anruf-Sessions nach Endzustand",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(calls_total.clone()))?;

        let call_errors_total = IntCounterVec::new(
            Opts::new(
                "callrelay_call_errors_total",
                "An Clients gemeldete Fehler nach Code",
            ),
            &["code"],
        )?;
        registry.register(Box::new(call_errors_total.clone()))?;

        let call_setup_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "callrelay_call_setup_seconds",
                "Zeit von der Einladung bis zum Zustand connected",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0]),
        )?;
        registry.register(Box::new(call_setup_seconds.clone()))?;

        // --- Voice-Activity ---
        let voice_events_total = IntCounter::with_opts(Opts::new(
            "callrelay_voice_events_total",
            "Zugestellte voice:data-Events (pro Empfaenger)",
        ))?;
        registry.register(Box::new(voice_events_total.clone()))?;

        let voice_dropped_total = IntCounter::with_opts(Opts::new(
            "callrelay_voice_dropped_total",
            "Verworfene voice:data-Events (volle oder geschlossene Queue)",
        ))?;
        registry.register(Box::new(voice_dropped_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connections_active,
            online_users,
            calls_active,
            calls_total,
            call_errors_total,
            call_setup_seconds,
            voice_events_total,
            voice_dropped_total,
        })
    }

    /// Zaehlt einen beendeten Anruf (`rejected`, `failed`, `ended`)
    pub fn anruf_beendet(&self, outcome: &str) {
        self.calls_total.with_label_values(&[outcome]).inc();
    }

    /// Zaehlt eine `call:error`-Antwort
    pub fn fehler_gemeldet(&self, code: &str) {
        self.call_errors_total.with_label_values(&[code]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RelayMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<RelayMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = RelayMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn zwei_instanzen_kollidieren_nicht() {
        // Eigene Registry pro Instanz, kein globaler Zustand
        let a = RelayMetrics::neu().unwrap();
        let b = RelayMetrics::neu().unwrap();
        a.connections_active.set(3);
        assert_eq!(b.connections_active.get(), 0);
    }

    #[test]
    fn anruf_outcome_zaehlen() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.anruf_beendet("ended");
        metriken.anruf_beendet("ended");
        metriken.anruf_beendet("rejected");
        assert_eq!(metriken.calls_total.with_label_values(&["ended"]).get(), 2);
        assert_eq!(
            metriken.calls_total.with_label_values(&["rejected"]).get(),
            1
        );
    }

    #[test]
    fn fehler_code_zaehlen() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.fehler_gemeldet("USER_OFFLINE");
        assert_eq!(
            metriken
                .call_errors_total
                .with_label_values(&["USER_OFFLINE"])
                .get(),
            1
        );
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.connections_active.set(5);
        metriken.voice_events_total.inc();
        metriken.call_setup_seconds.observe(2.5);

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("callrelay_connections_active 5"));
        assert!(output.contains("callrelay_voice_events_total 1"));
        assert!(output.contains("callrelay_call_setup_seconds_bucket"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
