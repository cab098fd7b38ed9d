//! Command dispatcher: command tag → handler table, built once at startup.

use std::collections::HashMap;

use tracing::{debug, error};

use tessera_proto::{verify, Envelope};

use crate::registry::SocketId;
use crate::state::ServerState;
use crate::{auth, channels, games, presence, scores};

/// The only commands an unverified socket may execute. Everything else is
/// silently ignored until the handshake completes: the single choke point
/// keeping data-plane effects behind proven identity.
pub const UNVERIFIED_ALLOWED: [&str; 2] = ["ConnectionAttempt", "SubmitVerification"];

pub type Handler = fn(&mut ServerState, SocketId, &Envelope);

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<&'static str, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a command tag. Registering a tag twice is a
    /// startup-time configuration error, so it fails loudly.
    pub fn register(&mut self, tag: &'static str, handler: Handler) {
        if self.handlers.insert(tag, handler).is_some() {
            panic!("duplicate handler registration for command '{tag}'");
        }
    }

    /// Invoke the handler for an already-verified envelope.
    ///
    /// The transport path has checked sender verification and the integrity
    /// hash before we get here; re-checking catches internal wiring bugs.
    /// On a violation the offending connection is dropped, not the process.
    pub fn dispatch(&self, state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
        let tag = envelope.command.tag();

        if !UNVERIFIED_ALLOWED.contains(&tag) && !state.registry.is_verified_socket(socket_id) {
            error!(socket = %socket_id, command = tag, "Dispatch reached without verification");
            state.close_socket(socket_id);
            return;
        }
        match serde_json::to_value(envelope) {
            Ok(value) if verify::verify_hash(&value) => {}
            _ => {
                error!(socket = %socket_id, command = tag, "Dispatch reached with bad integrity hash");
                state.close_socket(socket_id);
                return;
            }
        }

        match self.handlers.get(tag) {
            Some(handler) => handler(state, socket_id, envelope),
            None => debug!(command = tag, "No handler registered, dropping"),
        }
    }
}

/// The full handler table. Mini-game managers register here like any other
/// collaborator.
pub fn build_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();

    dispatcher.register("ConnectionAttempt", auth::on_connection_attempt);
    dispatcher.register("SubmitVerification", auth::on_submit_verification);
    dispatcher.register("DisconnectAttempt", auth::on_disconnect_attempt);
    dispatcher.register("DisconnectCommit", auth::on_disconnect_commit);
    dispatcher.register("RequestPublicKey", auth::on_request_public_key);

    dispatcher.register("ChatMessage", channels::on_chat_message);
    dispatcher.register("Audio", channels::on_audio);
    dispatcher.register("ChannelCreate", channels::on_channel_create);
    dispatcher.register("ChannelJoin", channels::on_channel_join);
    dispatcher.register("ChannelLeave", channels::on_channel_leave);
    dispatcher.register("RequestAllChannels", channels::on_request_all_channels);

    dispatcher.register("JoinWorld", presence::on_join_world);
    dispatcher.register("TryPassword", presence::on_try_password);
    dispatcher.register("SetAdmin", presence::on_set_admin);
    dispatcher.register("UpdatePosition", presence::on_update_position);
    dispatcher.register("UpdateSkin", presence::on_update_skin);

    dispatcher.register("UpdateScore", scores::on_update_score);
    dispatcher.register("RequestLeaderboard", scores::on_request_leaderboard);

    dispatcher.register("TicTacToe", games::on_tic_tac_toe);
    dispatcher.register("CaptureTheFlag", games::on_capture_the_flag);

    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use tessera_proto::command::{ChatMessage, Notice};
    use tessera_proto::{ClientKind, Command};

    fn marker_handler(state: &mut ServerState, _socket: SocketId, _envelope: &Envelope) {
        state.lobby.push("handler-ran".into());
    }

    #[test]
    #[should_panic(expected = "duplicate handler registration")]
    fn test_duplicate_registration_panics() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("ChatMessage", marker_handler);
        dispatcher.register("ChatMessage", marker_handler);
    }

    #[tokio::test]
    async fn test_unverified_dispatch_is_inert() {
        let (mut state, _events) = testutil::make_state();
        let (socket_id, _rx) = testutil::attach_socket(&mut state);

        let mut dispatcher = Dispatcher::new();
        dispatcher.register("ChatMessage", marker_handler);

        let envelope = testutil::sealed(
            Command::ChatMessage(ChatMessage { text: "hi".into() }),
            "hash:nobody",
        );
        dispatcher.dispatch(&mut state, socket_id, &envelope);

        assert!(state.lobby.is_empty());
    }

    #[tokio::test]
    async fn test_verified_dispatch_invokes_handler() {
        let (mut state, _events) = testutil::make_state();
        let (socket_id, _rx) = testutil::attach_socket(&mut state);
        state
            .registry
            .register("hash:alice", "key", ClientKind::Headless, socket_id);

        let mut dispatcher = Dispatcher::new();
        dispatcher.register("ChatMessage", marker_handler);

        let envelope = testutil::sealed(
            Command::ChatMessage(ChatMessage { text: "hi".into() }),
            "hash:alice",
        );
        dispatcher.dispatch(&mut state, socket_id, &envelope);

        assert_eq!(state.lobby, vec!["handler-ran".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_dropped_quietly() {
        let (mut state, _events) = testutil::make_state();
        let (socket_id, _rx) = testutil::attach_socket(&mut state);
        state
            .registry
            .register("hash:alice", "key", ClientKind::Headless, socket_id);

        let dispatcher = Dispatcher::new();
        let envelope = testutil::sealed(Command::Info(Notice::new("x")), "hash:alice");
        // no handler for Info in an empty table; must not panic
        dispatcher.dispatch(&mut state, socket_id, &envelope);
    }

    #[test]
    fn test_full_table_builds() {
        // building the production table must not trip the duplicate check
        let _ = build_dispatcher();
    }
}
