//! Broadcast/session coordinator.
//!
//! One tokio task owns all server state. Socket tasks, the scheduler and
//! everything else communicate with it through [`ServerEvent`]s, so every
//! handshake step and room mutation runs as a discrete, non-preemptible
//! reaction; interleaving order is the only concurrency concern.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tessera_proto::command::UpdateWorldTiles;
use tessera_proto::{verify, Command, Envelope};

use crate::auth;
use crate::config::ServerConfig;
use crate::dispatch::{build_dispatcher, Dispatcher, UNVERIFIED_ALLOWED};
use crate::games;
use crate::presence;
use crate::registry::SocketId;
use crate::state::{OutboundSink, ServerState};

/// Ticks produced by the scheduler.
#[derive(Debug, Clone)]
pub enum TickEvent {
    /// Advance one patrol walker in a world room (room name with prefix)
    PatrolStep { world: String, patrol: usize },
    /// Advance the drifting bridge in a world room
    BridgeStep { world: String },
    /// An authentication challenge went unanswered too long
    ChallengeExpired { socket_id: SocketId },
}

/// Everything that can happen to the coordinator.
#[derive(Debug)]
pub enum ServerEvent {
    SocketConnected {
        socket_id: SocketId,
        sink: OutboundSink,
    },
    SocketClosed {
        socket_id: SocketId,
    },
    /// One raw text frame off a socket
    Frame {
        socket_id: SocketId,
        text: String,
    },
    Tick(TickEvent),
}

pub struct ChatServer {
    state: ServerState,
    dispatcher: Dispatcher,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedSender<ServerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = ServerState::new(config, events_tx.clone());
        let server = Self {
            state,
            dispatcher: build_dispatcher(),
            events_rx,
        };
        (server, events_tx)
    }

    /// Spawn the coordinator as a background task.
    pub fn spawn(config: ServerConfig) -> (mpsc::UnboundedSender<ServerEvent>, JoinHandle<()>) {
        let (server, events_tx) = Self::new(config);
        (events_tx, tokio::spawn(server.run()))
    }

    pub async fn run(mut self) {
        info!("Coordinator running");
        while let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
        info!("Coordinator stopped");
    }

    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SocketConnected { socket_id, sink } => {
                debug!(socket = %socket_id, "New connection");
                self.state.sinks.insert(socket_id, sink);
            }
            ServerEvent::SocketClosed { socket_id } => self.on_socket_closed(socket_id),
            ServerEvent::Frame { socket_id, text } => self.on_frame(socket_id, &text),
            ServerEvent::Tick(tick) => self.on_tick(tick),
        }
    }

    /// The receive pipeline: shape check, integrity check, verification
    /// gate, then dispatch.
    fn on_frame(&mut self, socket_id: SocketId, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!(socket = %socket_id, error = %e, "Frame is not JSON, dropping");
                return;
            }
        };
        if !self.state.verifiers.verify_shape(&value) {
            debug!(socket = %socket_id, "Malformed envelope, dropping");
            return;
        }
        if !verify::verify_hash(&value) {
            warn!(socket = %socket_id, "Integrity hash mismatch, dropping");
            return;
        }
        let envelope = match Envelope::from_value(value) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(socket = %socket_id, error = %e, "Envelope decode failed");
                return;
            }
        };

        let tag = envelope.command.tag();
        if !UNVERIFIED_ALLOWED.contains(&tag) && !self.state.registry.is_verified_socket(socket_id)
        {
            debug!(socket = %socket_id, command = tag, "Command from unverified socket ignored");
            return;
        }

        self.dispatcher.dispatch(&mut self.state, socket_id, &envelope);
    }

    /// Membership cleanup when a socket goes away: owner-revert, room
    /// eviction with occupancy broadcasts, mini-game notification, then
    /// the socket-to-identity mapping itself.
    fn on_socket_closed(&mut self, socket_id: SocketId) {
        // a handshake never outlives its socket
        if let Some(session) = self.state.pending.remove(&socket_id) {
            self.state.scheduler.cancel(session.eviction_task);
        }
        self.state.disconnects.remove(&socket_id);
        self.state.sinks.remove(&socket_id);

        let Some((identity, last_socket)) = self.state.registry.remove_socket(socket_id) else {
            debug!(socket = %socket_id, "Unverified socket closed");
            return;
        };
        if !last_socket {
            debug!(identity = %identity, "Socket closed, identity still connected elsewhere");
            return;
        }

        self.state.revert_owned_worlds(&identity);

        let mut last_world = String::new();
        for room_name in self.state.rooms.rooms_with_member(&identity) {
            let world = room_name.trim_start_matches('#').to_string();
            presence::leave_world(&mut self.state, &identity, &world);
            if self.state.catalog.contains(&world) {
                last_world = world;
            }
        }
        self.state.lobby_remove(&identity);
        self.state.cli_clients_remove(&identity);

        games::on_member_departed(&mut self.state, &identity, &last_world);
        info!(identity = %identity, "Identity disconnected, cleanup complete");
    }

    fn on_tick(&mut self, tick: TickEvent) {
        match tick {
            TickEvent::ChallengeExpired { socket_id } => {
                auth::on_challenge_expired(&mut self.state, socket_id);
            }
            TickEvent::PatrolStep { world, patrol } => self.patrol_step(&world, patrol),
            TickEvent::BridgeStep { world } => self.bridge_step(&world),
        }
    }

    fn patrol_step(&mut self, room_name: &str, index: usize) {
        let (recipients, updates) = {
            let Some(room) = self.state.rooms.get_mut(room_name) else {
                return;
            };
            // joins pause the animation so bootstrap wins the race
            if room.animation_suppressed() {
                return;
            }
            let mut patrols = std::mem::take(&mut room.patrols);
            let updates = match patrols.get_mut(index) {
                Some(patrol) => patrol.step(&mut room.grid),
                None => Vec::new(),
            };
            room.patrols = patrols;
            let recipients: Vec<String> = room.positions.keys().cloned().collect();
            (recipients, updates)
        };
        self.broadcast_tiles(recipients, updates);
    }

    fn bridge_step(&mut self, room_name: &str) {
        let (recipients, updates) = {
            let Some(room) = self.state.rooms.get_mut(room_name) else {
                return;
            };
            if room.animation_suppressed() {
                return;
            }
            let mut bridge = room.bridge.take();
            let updates = match bridge.as_mut() {
                Some(bridge) => bridge.step(&mut room.grid),
                None => Vec::new(),
            };
            room.bridge = bridge;
            let recipients: Vec<String> = room.positions.keys().cloned().collect();
            (recipients, updates)
        };
        self.broadcast_tiles(recipients, updates);
    }

    fn broadcast_tiles(&self, recipients: Vec<String>, updates: Vec<tessera_proto::command::TileUpdate>) {
        if updates.is_empty() || recipients.is_empty() {
            return;
        }
        let command = Command::UpdateWorldTiles(UpdateWorldTiles {
            updated_tiles: updates,
        });
        let Ok(envelope) = Envelope::new(command, "").seal() else {
            return;
        };
        for identity in recipients {
            self.state.send_user_envelope(&identity, &envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use tessera_proto::command::{ChatMessage, Coordinates, SetAdmin};
    use tessera_proto::{ClientKind, Keypair};

    fn make_server() -> ChatServer {
        let (server, _tx) = ChatServer::new(ServerConfig::default());
        server
    }

    fn verified_peer(
        server: &mut ChatServer,
        nick: &str,
    ) -> (SocketId, tokio::sync::mpsc::UnboundedReceiver<String>, String) {
        let (socket_id, mut rx) = testutil::attach_socket(&mut server.state);
        let keypair = Keypair::generate();
        let identity = testutil::authenticate(&mut server.state, socket_id, &mut rx, &keypair, nick);
        testutil::drain(&mut rx);
        (socket_id, rx, identity)
    }

    #[tokio::test]
    async fn test_malformed_frame_dropped() {
        let mut server = make_server();
        let (socket_id, _rx) = testutil::attach_socket(&mut server.state);

        server.on_frame(socket_id, "not json at all");
        server.on_frame(socket_id, r#"{"payload": {}}"#);
        server.on_frame(socket_id, r#"{"command": "Teleport", "payload": {}}"#);
        // nothing registered, nothing broadcast, nothing panicked
        assert!(server.state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_tampered_frame_dropped_before_dispatch() {
        let mut server = make_server();
        let (s1, _rx1, alice) = verified_peer(&mut server, "alice");
        let (_s2, mut rx2, _bob) = verified_peer(&mut server, "bob");

        let envelope = Envelope::new(
            Command::ChatMessage(ChatMessage {
                text: "original".into(),
            }),
            alice.clone(),
        )
        .with_from("alice")
        .seal()
        .unwrap();
        let mut value = serde_json::to_value(&envelope).unwrap();
        value["payload"]["text"] = "tampered".into();
        server.on_frame(s1, &value.to_string());

        // the unaddressed broadcast never happened
        assert!(testutil::drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_unverified_socket_commands_ignored() {
        let mut server = make_server();
        let (s1, _rx1) = testutil::attach_socket(&mut server.state);
        let (_s2, mut rx2, _bob) = verified_peer(&mut server, "bob");

        let envelope = testutil::sealed(
            Command::ChatMessage(ChatMessage {
                text: "sneaky".into(),
            }),
            "hash:sneak",
        );
        server.on_frame(s1, &envelope.to_text().unwrap());

        assert!(testutil::drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_cleanup_reverts_owned_world() {
        let mut server = make_server();
        let (s1, mut rx1, alice) = verified_peer(&mut server, "alice");
        let (_s2, mut rx2, _bob) = verified_peer(&mut server, "bob");

        // alice enters the cave and claims admin
        server.state.lobby_remove(&alice);
        server.state.rooms.get_mut("#CaveWorld").unwrap().add_user(&alice);
        let set_admin = testutil::sealed(
            Command::SetAdmin(SetAdmin {
                world_name: "CaveWorld".into(),
                password: "swordfish".into(),
            }),
            &alice,
        );
        server.dispatcher.dispatch(&mut server.state, s1, &set_admin);
        testutil::drain(&mut rx1);
        testutil::drain(&mut rx2);

        server.handle_event(ServerEvent::SocketClosed { socket_id: s1 });

        let cave = server.state.rooms.get("#CaveWorld").unwrap();
        assert!(!cave.is_private);
        assert!(cave.world_admin.is_none());
        assert!(cave.admin_password.is_none());
        assert!(!cave.has_user(&alice));
        assert!(!server.state.registry.has_live_key(&alice));

        // bob is in the lobby and hears both the occupancy and privacy change
        let bob_msgs = testutil::drain(&mut rx2);
        assert!(testutil::find(&bob_msgs, "AllPrivateWorlds").is_some());
        assert!(testutil::find(&bob_msgs, "WorldSizeUpdate").is_some());
    }

    #[tokio::test]
    async fn test_multi_socket_identity_cleanup_waits_for_last() {
        let mut server = make_server();
        let (s1, mut rx1, alice) = verified_peer(&mut server, "alice");

        // second socket for the same identity
        let (s2, _rx2) = testutil::attach_socket(&mut server.state);
        server
            .state
            .registry
            .register(&alice, "key", ClientKind::Headless, s2);

        server.handle_event(ServerEvent::SocketClosed { socket_id: s2 });
        assert!(server.state.registry.has_live_key(&alice));

        server.handle_event(ServerEvent::SocketClosed { socket_id: s1 });
        assert!(!server.state.registry.has_live_key(&alice));
        let _ = testutil::drain(&mut rx1);
    }

    #[tokio::test]
    async fn test_patrol_tick_broadcasts_tile_updates() {
        let mut server = make_server();
        let (_s1, mut rx1, alice) = verified_peer(&mut server, "alice");

        {
            let ice = server.state.rooms.get_mut("#IceWorld").unwrap();
            ice.add_user(&alice);
            ice.positions.insert(
                alice.clone(),
                Coordinates {
                    x: 1,
                    y: 1,
                    skin: "knight".into(),
                },
            );
        }

        server.handle_event(ServerEvent::Tick(TickEvent::PatrolStep {
            world: "#IceWorld".into(),
            patrol: 0,
        }));

        let messages = testutil::drain(&mut rx1);
        let tiles = testutil::find(&messages, "UpdateWorldTiles").unwrap();
        assert!(!tiles["payload"]["updated_tiles"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_patrol_tick_suppressed_during_join() {
        let mut server = make_server();
        let (_s1, mut rx1, alice) = verified_peer(&mut server, "alice");

        {
            let ice = server.state.rooms.get_mut("#IceWorld").unwrap();
            ice.add_user(&alice);
            ice.positions.insert(
                alice.clone(),
                Coordinates {
                    x: 1,
                    y: 1,
                    skin: "knight".into(),
                },
            );
            ice.suppress_animation(std::time::Duration::from_secs(5));
        }

        server.handle_event(ServerEvent::Tick(TickEvent::PatrolStep {
            world: "#IceWorld".into(),
            patrol: 0,
        }));

        assert!(testutil::drain(&mut rx1).is_empty());
    }
}
