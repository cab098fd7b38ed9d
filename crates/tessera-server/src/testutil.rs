//! Shared helpers for server tests: fake sockets are plain unbounded
//! channels, so handler logic runs without any network I/O.

use serde_json::Value;
use tokio::sync::mpsc;

use tessera_proto::command::{ConnectionAttempt, SubmitVerification};
use tessera_proto::{identity_string, ClientKind, Command, Envelope, Keypair};

use crate::config::ServerConfig;
use crate::coordinator::ServerEvent;
use crate::registry::SocketId;
use crate::state::ServerState;

pub fn make_state() -> (ServerState, mpsc::UnboundedReceiver<ServerEvent>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    (ServerState::new(ServerConfig::default(), events_tx), events_rx)
}

pub fn attach_socket(state: &mut ServerState) -> (SocketId, mpsc::UnboundedReceiver<String>) {
    let socket_id = SocketId::new();
    let (tx, rx) = mpsc::unbounded_channel();
    state.sinks.insert(socket_id, tx);
    (socket_id, rx)
}

/// Everything queued on a fake socket, parsed.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(text) = rx.try_recv() {
        out.push(serde_json::from_str(&text).expect("outbound frames are JSON"));
    }
    out
}

pub fn find<'a>(messages: &'a [Value], tag: &str) -> Option<&'a Value> {
    messages.iter().find(|message| message["command"] == tag)
}

pub fn sealed(command: Command, identity: &str) -> Envelope {
    Envelope::new(command, identity).seal().expect("seal")
}

/// Drive the full connect handshake for a socket with a real keypair.
/// Returns the verified identity string; bootstrap traffic is drained away.
pub fn authenticate(
    state: &mut ServerState,
    socket_id: SocketId,
    rx: &mut mpsc::UnboundedReceiver<String>,
    keypair: &Keypair,
    nick: &str,
) -> String {
    let material = keypair
        .public_key_material(ClientKind::Headless)
        .expect("key material");
    let identity = identity_string(&material, nick);

    let attempt = sealed(
        Command::ConnectionAttempt(ConnectionAttempt {
            public_key: material,
            nick: nick.to_string(),
            is_browser_client: false,
        }),
        "",
    );
    crate::auth::on_connection_attempt(state, socket_id, &attempt);

    let messages = drain(rx);
    let challenge = find(&messages, "PromptVerification").expect("challenge sent")["payload"]
        ["verification_data"]
        .as_str()
        .expect("challenge string")
        .to_string();

    let submit = sealed(
        Command::SubmitVerification(SubmitVerification {
            signature: keypair.sign(challenge.as_bytes()),
            browser: false,
        }),
        &identity,
    );
    crate::auth::on_submit_verification(state, socket_id, &submit);
    drain(rx);

    identity
}
