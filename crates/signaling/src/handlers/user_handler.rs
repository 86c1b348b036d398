//! User-Handler – user:bind, user:logout
//!
//! Bindet die Identitaet aus dem externen User-Verzeichnis an die
//! Verbindung. Die Authentifizierung selbst passiert vor dem Relay.

use callrelay_core::types::UserIdentity;
use callrelay_protocol::control::{BindRequest, ServerEvent, SessionReady};

use crate::dispatcher::DispatcherContext;
use crate::error::SignalingResult;
use crate::server_state::SignalingState;

/// Verarbeitet `user:bind`
///
/// Antwortet mit einem erneuten `session:ready` inkl. gebundener User-ID.
pub fn handle_bind(
    request: BindRequest,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<Option<ServerEvent>> {
    let identitaet = UserIdentity::neu(request.user_id, request.display_name);
    let user_id = identitaet.user_id.clone();

    state.registry.binden(&ctx.connection_id, identitaet)?;
    state.gauges_aktualisieren();

    Ok(Some(ServerEvent::SessionReady(SessionReady {
        connection_id: ctx.connection_id,
        user_id: Some(user_id),
        online_users: state.registry.online_user_ids(),
    })))
}

/// Verarbeitet `user:logout`
///
/// Die Verbindung wird nach diesem Event vom Verbindungs-Task geschlossen;
/// das Abmelden (inkl. Scheitern laufender Anrufe) passiert dort.
pub fn handle_logout(ctx: &mut DispatcherContext) -> SignalingResult<Option<ServerEvent>> {
    tracing::info!(connection_id = %ctx.connection_id, "Logout angefordert");
    ctx.abmelden = true;
    Ok(None)
}
