//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `CALLRELAY_LOG_LEVEL`: Log-Level oder EnvFilter-Direktiven, Standard: info
//! - `CALLRELAY_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Die Umgebung hat Vorrang vor den Werten aus der Konfigurationsdatei.

use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Level
pub const ENV_LOG_LEVEL: &str = "CALLRELAY_LOG_LEVEL";
/// Umgebungsvariable fuer das Log-Format
pub const ENV_LOG_FORMAT: &str = "CALLRELAY_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// `level` und `format` stammen aus der Konfiguration und werden von
/// `CALLRELAY_LOG_LEVEL` / `CALLRELAY_LOG_FORMAT` ueberschrieben.
/// Ein zweiter Aufruf ist wirkungslos.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = format_waehlen(std::env::var(ENV_LOG_FORMAT).ok(), format);

    let ergebnis = match format {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging war bereits initialisiert");
    }
}

/// Waehlt das Ausgabeformat: Umgebung vor Konfiguration, unbekannt -> text
pub fn format_waehlen<'a>(aus_env: Option<String>, konfiguriert: &'a str) -> &'a str {
    match aus_env.as_deref() {
        Some("json") => "json",
        Some("text") => "text",
        _ if log_format_gueltig(konfiguriert) => konfiguriert,
        _ => "text",
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
