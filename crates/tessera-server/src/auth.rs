//! Server side of the authentication state machine.
//!
//! A socket moves `Anonymous → AwaitingChallenge → Verified` (or is
//! rejected and closed), and symmetrically through a second challenge for
//! graceful disconnection. A session that fails any precondition is
//! dropped whole, never left half-registered.

use rand::RngCore;
use tracing::{debug, info, warn};

use tessera_proto::command::{
    ChannelLeave, Empty, LobbyLogic, MyIdentity, Notice, VerificationChallenge, WorldList,
    WorldSizes,
};
use tessera_proto::constants::{CHALLENGE_SIZE, PERSONAL_CHANNEL_HISTORY, STALENESS_WINDOW_MS};
use tessera_proto::identity::verify_signature;
use tessera_proto::{identity_string, split_identity, ClientKind, Command, Envelope};

use crate::coordinator::TickEvent;
use crate::registry::SocketId;
use crate::state::{DisconnectSession, PendingSession, ServerState};

/// Single-use random challenge, hex on the wire.
fn generate_challenge() -> String {
    let mut bytes = [0u8; CHALLENGE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn on_connection_attempt(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::ConnectionAttempt(payload) = &envelope.command else {
        return;
    };
    let identity = identity_string(&payload.public_key, &payload.nick);

    // Replay mitigation: the declared timestamp must be recent.
    match envelope.age_ms() {
        Some(age) if age <= STALENESS_WINDOW_MS => {}
        _ => {
            state.error_to(socket_id, "Connection attempt is too old.");
            state.close_socket(socket_id);
            return;
        }
    }

    // No two simultaneous sessions may claim the same identity string.
    if state.registry.has_live_key(&identity) {
        state.error_to(
            socket_id,
            "The combination of your public key and nick is already in use.",
        );
        return;
    }

    let challenge = generate_challenge();
    let kind = if payload.is_browser_client {
        ClientKind::Browser
    } else {
        ClientKind::Headless
    };
    let eviction_task = state.scheduler.schedule_once(
        state.config.challenge_timeout,
        TickEvent::ChallengeExpired { socket_id },
    );
    state.pending.insert(
        socket_id,
        PendingSession {
            identity,
            challenge: challenge.clone(),
            public_key: payload.public_key.clone(),
            kind,
            eviction_task,
        },
    );

    state.send_socket(
        socket_id,
        Command::PromptVerification(VerificationChallenge {
            verification_data: challenge,
        }),
    );
}

pub fn on_submit_verification(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::SubmitVerification(payload) = &envelope.command else {
        return;
    };
    let Some(session) = state.pending.remove(&socket_id) else {
        debug!(socket = %socket_id, "Verification submitted without a pending session");
        return;
    };
    state.scheduler.cancel(session.eviction_task);

    let verified = verify_signature(
        &session.public_key,
        &payload.signature,
        &session.challenge,
        session.kind,
    );
    if !verified {
        info!(identity = %session.identity, "Verification failed, closing socket");
        state.error_to(socket_id, "Client could not be verified");
        state.send_socket(socket_id, Command::FailedVerification(Empty {}));
        state.close_socket(socket_id);
        return;
    }

    state.success_to(socket_id, "Client is verified.");
    state
        .registry
        .register(&session.identity, &session.public_key, session.kind, socket_id);
    info!(identity = %session.identity, socket = %socket_id, "Verified connection");

    state.send_socket(socket_id, Command::Connected(Notice::new("Welcome")));
    state.send_socket(
        socket_id,
        Command::MyIdentity(MyIdentity {
            identity: session.identity.clone(),
        }),
    );

    ensure_personal_channel(state, socket_id, &session.identity);

    // Lobby bootstrap: layout, catalogs, occupancy.
    state.send_socket(
        socket_id,
        Command::LobbyLogic(LobbyLogic {
            logic: state.catalog.lobby.clone(),
        }),
    );
    state.send_socket(
        socket_id,
        Command::AllWorlds(WorldList {
            worlds: state.catalog.names(),
        }),
    );
    state.send_socket(
        socket_id,
        Command::AllPrivateWorlds(WorldList {
            worlds: state.rooms.private_world_names(),
        }),
    );
    state.send_bot_sizes_to(socket_id);
    state.send_socket(
        socket_id,
        Command::WorldSize(WorldSizes {
            worlds: state.world_sizes(),
        }),
    );

    if session.kind == ClientKind::Headless {
        state.cli_clients.push(session.identity.clone());
    }
    state.lobby_insert(&session.identity);
}

/// Every identity gets a channel with itself, created on first
/// verification and rejoined on reconnect.
fn ensure_personal_channel(state: &mut ServerState, socket_id: SocketId, identity: &str) {
    let name = format!("#channel_{identity}");
    if state.rooms.contains(&name) {
        if let Err(e) = state.rooms.join(&name, identity, None) {
            debug!(channel = %name, error = %e, "Personal channel rejoin skipped");
        }
    } else {
        match state
            .rooms
            .create_channel(&name, identity, None, PERSONAL_CHANNEL_HISTORY, false)
        {
            Ok(()) => state.success_to(socket_id, format!("Created channel {name}")),
            Err(e) => warn!(channel = %name, error = %e, "Failed to create personal channel"),
        }
    }
}

/// The scheduler fired before `SubmitVerification` arrived: evict the
/// pending session and close its socket.
pub fn on_challenge_expired(state: &mut ServerState, socket_id: SocketId) {
    if let Some(session) = state.pending.remove(&socket_id) {
        info!(identity = %session.identity, "Authentication challenge expired, evicting session");
        state.error_to(socket_id, "Verification challenge expired.");
        state.close_socket(socket_id);
    }
}

pub fn on_disconnect_attempt(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::DisconnectAttempt(payload) = &envelope.command else {
        return;
    };
    // A fresh nonce every time; a replayed commit must not verify.
    let challenge = generate_challenge();
    state.disconnects.insert(
        socket_id,
        DisconnectSession {
            identity: payload.identity.clone(),
            explicit: payload.explicit,
            channels: payload.channels.clone(),
            challenge: challenge.clone(),
        },
    );
    state.send_socket(
        socket_id,
        Command::DisconnectVerification(VerificationChallenge {
            verification_data: challenge,
        }),
    );
}

pub fn on_disconnect_commit(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::DisconnectCommit(payload) = &envelope.command else {
        return;
    };
    let Some(session) = state.disconnects.remove(&socket_id) else {
        debug!(socket = %socket_id, "Disconnect commit without a pending handshake");
        return;
    };

    let Some(public_key) = state.registry.live_key_of(&session.identity).map(String::from) else {
        state.error_to(socket_id, "Disconnection attempt failed.");
        return;
    };
    let kind = state
        .registry
        .kind_of(&session.identity)
        .unwrap_or(ClientKind::Headless);

    if !verify_signature(&public_key, &payload.signature, &session.challenge, kind) {
        state.error_to(socket_id, "Disconnection attempt failed.");
        return;
    }

    state.registry.deregister_key(&session.identity);
    info!(identity = %session.identity, "Graceful disconnect verified, key deregistered");

    if session.explicit {
        for channel in &session.channels {
            state.send_socket(
                socket_id,
                Command::ChannelLeave(ChannelLeave {
                    channel: channel.clone(),
                }),
            );
        }
    }

    match kind {
        ClientKind::Headless => {
            state.cli_clients_remove(&session.identity);
            state.close_socket(socket_id);
        }
        // browser clients tear down their session in place and may
        // reconnect without a fresh page load
        ClientKind::Browser => {
            state.send_socket(socket_id, Command::BrowserDisconnect(Empty {}));
        }
    }
}

pub fn on_request_public_key(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::RequestPublicKey(payload) = &envelope.command else {
        return;
    };
    let Some(identity) = state
        .registry
        .find_by_prefix(&payload.identity_prefix)
        .map(String::from)
    else {
        debug!(prefix = %payload.identity_prefix, "No unique identity for prefix");
        return;
    };
    let Some(public_key) = state.registry.live_key_of(&identity).map(String::from) else {
        return;
    };
    let nick = split_identity(&identity).1.map(String::from);
    state.send_socket(
        socket_id,
        Command::GivePublicKey(tessera_proto::command::GivePublicKey {
            identity,
            public_key,
            nick,
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use chrono::Utc;
    use tessera_proto::command::{ConnectionAttempt, SubmitVerification};
    use tessera_proto::Keypair;

    fn attempt_for(keypair: &Keypair, nick: &str) -> ConnectionAttempt {
        ConnectionAttempt {
            public_key: keypair.public_key_material(ClientKind::Headless).unwrap(),
            nick: nick.to_string(),
            is_browser_client: false,
        }
    }

    #[tokio::test]
    async fn test_full_handshake_bootstrap() {
        let (mut state, _events) = testutil::make_state();
        let (socket_id, mut rx) = testutil::attach_socket(&mut state);
        let keypair = Keypair::generate();

        let attempt = testutil::sealed(
            Command::ConnectionAttempt(attempt_for(&keypair, "alice")),
            "",
        );
        on_connection_attempt(&mut state, socket_id, &attempt);
        let messages = testutil::drain(&mut rx);
        let challenge = testutil::find(&messages, "PromptVerification").unwrap()["payload"]
            ["verification_data"]
            .as_str()
            .unwrap()
            .to_string();

        let submit = testutil::sealed(
            Command::SubmitVerification(SubmitVerification {
                signature: keypair.sign(challenge.as_bytes()),
                browser: false,
            }),
            "",
        );
        on_submit_verification(&mut state, socket_id, &submit);

        let messages = testutil::drain(&mut rx);
        for tag in [
            "Success",
            "Connected",
            "MyIdentity",
            "LobbyLogic",
            "AllWorlds",
            "AllPrivateWorlds",
            "AllBotSizes",
            "WorldSize",
        ] {
            assert!(testutil::find(&messages, tag).is_some(), "missing {tag}");
        }

        let identity = testutil::find(&messages, "MyIdentity").unwrap()["payload"]["identity"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(state.registry.is_verified_socket(socket_id));
        assert!(state.registry.has_live_key(&identity));
        assert!(state.in_lobby(&identity));
        assert!(state.cli_clients.contains(&identity));
        assert!(state.rooms.contains(&format!("#channel_{identity}")));
        assert!(state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_stale_attempt_rejected_and_closed() {
        let (mut state, _events) = testutil::make_state();
        let (socket_id, mut rx) = testutil::attach_socket(&mut state);
        let keypair = Keypair::generate();

        let mut envelope = Envelope::new(
            Command::ConnectionAttempt(attempt_for(&keypair, "alice")),
            "",
        );
        envelope.timestamp = (Utc::now() - chrono::Duration::milliseconds(301_000)).to_rfc2822();
        let envelope = envelope.seal().unwrap();

        on_connection_attempt(&mut state, socket_id, &envelope);

        let messages = testutil::drain(&mut rx);
        assert!(testutil::find(&messages, "Error").is_some());
        assert!(testutil::find(&messages, "PromptVerification").is_none());
        assert!(state.sinks.get(&socket_id).is_none(), "socket must be closed");
        assert!(state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let (mut state, _events) = testutil::make_state();
        let keypair = Keypair::generate();

        let (s1, mut rx1) = testutil::attach_socket(&mut state);
        let identity = testutil::authenticate(&mut state, s1, &mut rx1, &keypair, "alice");

        let (s2, mut rx2) = testutil::attach_socket(&mut state);
        let attempt = testutil::sealed(
            Command::ConnectionAttempt(attempt_for(&keypair, "alice")),
            "",
        );
        on_connection_attempt(&mut state, s2, &attempt);

        let messages = testutil::drain(&mut rx2);
        assert!(testutil::find(&messages, "Error").is_some());
        assert!(testutil::find(&messages, "PromptVerification").is_none());
        // the first session remains registered
        assert!(state.registry.has_live_key(&identity));
        assert!(state.registry.is_verified_socket(s1));
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_and_closed() {
        let (mut state, _events) = testutil::make_state();
        let (socket_id, mut rx) = testutil::attach_socket(&mut state);
        let keypair = Keypair::generate();

        let attempt = testutil::sealed(
            Command::ConnectionAttempt(attempt_for(&keypair, "alice")),
            "",
        );
        on_connection_attempt(&mut state, socket_id, &attempt);
        testutil::drain(&mut rx);

        // sign the wrong data
        let submit = testutil::sealed(
            Command::SubmitVerification(SubmitVerification {
                signature: keypair.sign(b"not-the-challenge"),
                browser: false,
            }),
            "",
        );
        on_submit_verification(&mut state, socket_id, &submit);

        let messages = testutil::drain(&mut rx);
        assert!(testutil::find(&messages, "Error").is_some());
        assert!(testutil::find(&messages, "FailedVerification").is_some());
        assert!(state.sinks.get(&socket_id).is_none());
        assert!(!state.registry.is_verified_socket(socket_id));
    }

    #[tokio::test]
    async fn test_challenge_eviction() {
        let (mut state, _events) = testutil::make_state();
        let (socket_id, mut rx) = testutil::attach_socket(&mut state);
        let keypair = Keypair::generate();

        let attempt = testutil::sealed(
            Command::ConnectionAttempt(attempt_for(&keypair, "alice")),
            "",
        );
        on_connection_attempt(&mut state, socket_id, &attempt);
        testutil::drain(&mut rx);
        assert!(state.pending.contains_key(&socket_id));

        on_challenge_expired(&mut state, socket_id);
        assert!(state.pending.is_empty());
        assert!(state.sinks.get(&socket_id).is_none());
    }

    #[tokio::test]
    async fn test_graceful_disconnect_roundtrip() {
        let (mut state, _events) = testutil::make_state();
        let (socket_id, mut rx) = testutil::attach_socket(&mut state);
        let keypair = Keypair::generate();
        let identity = testutil::authenticate(&mut state, socket_id, &mut rx, &keypair, "alice");

        let attempt = testutil::sealed(
            Command::DisconnectAttempt(tessera_proto::command::DisconnectAttempt {
                identity: identity.clone(),
                explicit: true,
                channels: vec!["#lounge".into()],
            }),
            &identity,
        );
        on_disconnect_attempt(&mut state, socket_id, &attempt);

        let messages = testutil::drain(&mut rx);
        let challenge = testutil::find(&messages, "DisconnectVerification").unwrap()["payload"]
            ["verification_data"]
            .as_str()
            .unwrap()
            .to_string();

        let commit = testutil::sealed(
            Command::DisconnectCommit(tessera_proto::command::DisconnectCommit {
                signature: keypair.sign(challenge.as_bytes()),
            }),
            &identity,
        );
        on_disconnect_commit(&mut state, socket_id, &commit);

        let messages = testutil::drain(&mut rx);
        let leave = testutil::find(&messages, "ChannelLeave").unwrap();
        assert_eq!(leave["payload"]["channel"], "#lounge");

        assert!(!state.registry.has_live_key(&identity));
        assert!(!state.cli_clients.contains(&identity));
        assert!(state.sinks.get(&socket_id).is_none());
    }

    #[tokio::test]
    async fn test_disconnect_commit_with_bad_signature() {
        let (mut state, _events) = testutil::make_state();
        let (socket_id, mut rx) = testutil::attach_socket(&mut state);
        let keypair = Keypair::generate();
        let identity = testutil::authenticate(&mut state, socket_id, &mut rx, &keypair, "alice");

        let attempt = testutil::sealed(
            Command::DisconnectAttempt(tessera_proto::command::DisconnectAttempt {
                identity: identity.clone(),
                explicit: false,
                channels: Vec::new(),
            }),
            &identity,
        );
        on_disconnect_attempt(&mut state, socket_id, &attempt);
        testutil::drain(&mut rx);

        let commit = testutil::sealed(
            Command::DisconnectCommit(tessera_proto::command::DisconnectCommit {
                signature: keypair.sign(b"wrong"),
            }),
            &identity,
        );
        on_disconnect_commit(&mut state, socket_id, &commit);

        let messages = testutil::drain(&mut rx);
        assert!(testutil::find(&messages, "Error").is_some());
        // still registered: the failure is recoverable
        assert!(state.registry.has_live_key(&identity));
    }

    #[tokio::test]
    async fn test_request_public_key_by_prefix() {
        let (mut state, _events) = testutil::make_state();
        let (socket_id, mut rx) = testutil::attach_socket(&mut state);
        let keypair = Keypair::generate();
        let identity = testutil::authenticate(&mut state, socket_id, &mut rx, &keypair, "alice");

        let prefix = identity[..12].to_string();
        let request = testutil::sealed(
            Command::RequestPublicKey(tessera_proto::command::RequestPublicKey {
                identity_prefix: prefix,
            }),
            &identity,
        );
        on_request_public_key(&mut state, socket_id, &request);

        let messages = testutil::drain(&mut rx);
        let reply = testutil::find(&messages, "GivePublicKey").unwrap();
        assert_eq!(reply["payload"]["identity"], identity.as_str());
        assert_eq!(reply["payload"]["nick"], "alice");
    }
}
