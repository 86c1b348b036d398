//! Voice-Handler – voice:data
//!
//! Reicht Voice-Activity-Metadaten an den VoiceBroadcaster weiter. Keine
//! Antwort an den Absender, auch nicht bei null Empfaengern.

use callrelay_protocol::control::ServerEvent;
use callrelay_protocol::voice::VoiceData;

use crate::dispatcher::DispatcherContext;
use crate::error::SignalingResult;
use crate::server_state::SignalingState;

/// Verarbeitet `voice:data`
pub fn handle_voice_data(
    data: VoiceData,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<Option<ServerEvent>> {
    state.voice.veroeffentlichen(&ctx.connection_id, data)?;
    Ok(None)
}
