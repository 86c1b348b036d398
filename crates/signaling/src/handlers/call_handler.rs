//! Call-Handler – call:invite, call:ring, call:accept, call:reject,
//! call:connected, call:signal, call:hangup, call:failed
//!
//! Duenne Schicht ueber dem [`CallSessionManager`](crate::calls::CallSessionManager):
//! die Operation reiht ihre Events selbst unter dem Anruf-Lock ein. Fehler
//! gehen als `call:error` nur an den Ausloeser (das macht der Dispatcher).

use callrelay_protocol::control::{
    FailureReport, InviteRequest, ServerEvent, SessionRef, SignalMessage, StateReason,
};

use crate::dispatcher::DispatcherContext;
use crate::error::SignalingResult;
use crate::registry::Zustellung;
use crate::server_state::SignalingState;

/// Bei Rueckkehr der Operation sind ihre Events bereits eingereiht
fn zugestellt(zustellungen: Vec<Zustellung>) -> SignalingResult<Option<ServerEvent>> {
    tracing::trace!(anzahl = zustellungen.len(), "Anruf-Events eingereiht");
    Ok(None)
}

/// Verarbeitet `call:invite`
pub fn handle_invite(
    request: InviteRequest,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<Option<ServerEvent>> {
    let (session_id, zustellungen) = state
        .calls
        .einladen(&ctx.connection_id, &request.callee_user_id)?;
    tracing::debug!(
        connection_id = %ctx.connection_id,
        session_id = %session_id,
        "Einladung zugestellt"
    );
    zugestellt(zustellungen)
}

/// Verarbeitet `call:ring` (Client des Angerufenen zeigt den Anruf an)
pub fn handle_ring(
    request: SessionRef,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<Option<ServerEvent>> {
    let zustellungen = state
        .calls
        .klingeln(&ctx.connection_id, &request.session_id)?;
    zugestellt(zustellungen)
}

/// Verarbeitet `call:accept`
pub fn handle_accept(
    request: SessionRef,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<Option<ServerEvent>> {
    let zustellungen = state
        .calls
        .annehmen(&ctx.connection_id, &request.session_id)?;
    zugestellt(zustellungen)
}

/// Verarbeitet `call:reject`
pub fn handle_reject(
    request: SessionRef,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<Option<ServerEvent>> {
    let zustellungen = state
        .calls
        .ablehnen(&ctx.connection_id, &request.session_id)?;
    zugestellt(zustellungen)
}

/// Verarbeitet `call:connected` (ICE/SDP-Aushandlung erfolgreich)
pub fn handle_connected(
    request: SessionRef,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<Option<ServerEvent>> {
    let zustellungen = state
        .calls
        .verbunden(&ctx.connection_id, &request.session_id)?;
    zugestellt(zustellungen)
}

/// Verarbeitet `call:signal` (opake Weiterleitung)
pub fn handle_signal(
    request: SignalMessage,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<Option<ServerEvent>> {
    let zustellungen = state.calls.signal_weiterleiten(
        &ctx.connection_id,
        &request.session_id,
        request.payload,
    )?;
    zugestellt(zustellungen)
}

/// Verarbeitet `call:hangup`
pub fn handle_hangup(
    request: SessionRef,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<Option<ServerEvent>> {
    let zustellungen = state
        .calls
        .auflegen(&ctx.connection_id, &request.session_id)?;
    zugestellt(zustellungen)
}

/// Verarbeitet `call:failed` (Client meldet gescheiterte Aushandlung)
pub fn handle_failed(
    request: FailureReport,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<Option<ServerEvent>> {
    tracing::info!(
        connection_id = %ctx.connection_id,
        session_id = %request.session_id,
        grund = request.reason.as_deref().unwrap_or("-"),
        "Client meldet Anruf-Fehler"
    );
    let zustellungen = state.calls.fehlschlagen(
        &ctx.connection_id,
        &request.session_id,
        StateReason::RemoteFailure,
    )?;
    zugestellt(zustellungen)
}
