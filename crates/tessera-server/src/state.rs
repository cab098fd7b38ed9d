//! Central server state, owned exclusively by the coordinator task.
//!
//! Nothing here is behind a lock: handlers run one at a time on the owning
//! task, and background loops only reach the state through scheduler ticks
//! on the same task. Collaborators never see these maps directly, only the
//! narrow send/query methods.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use tessera_proto::command::{BotSizes, Notice, OccupancyAction, WorldList, WorldSizeUpdate, WorldSizes};
use tessera_proto::{ClientKind, Command, Envelope, VerifierRegistry};

use crate::config::ServerConfig;
use crate::coordinator::{ServerEvent, TickEvent};
use crate::games::GameManagers;
use crate::registry::{IdentityRegistry, SocketId};
use crate::room::Room;
use crate::rooms::RoomManager;
use crate::scheduler::{Scheduler, TaskId};
use crate::scores::ScoreBoard;
use crate::worlds::{bridge_for, patrols_for, WorldCatalog, WORLD_HEIGHT, WORLD_WIDTH};

/// Per-socket outbound queue; dropping it closes the connection.
pub type OutboundSink = mpsc::UnboundedSender<String>;

const PATROL_TICK: Duration = Duration::from_millis(300);
const BRIDGE_TICK: Duration = Duration::from_millis(400);

/// A socket mid-handshake. Promoted to a registry entry on success,
/// discarded on failure or timeout; it never outlives the handshake.
pub struct PendingSession {
    pub identity: String,
    pub challenge: String,
    pub public_key: String,
    pub kind: ClientKind,
    pub eviction_task: TaskId,
}

/// A pending graceful-disconnect handshake.
pub struct DisconnectSession {
    pub identity: String,
    pub explicit: bool,
    pub channels: Vec<String>,
    pub challenge: String,
}

pub struct ServerState {
    pub config: ServerConfig,
    pub verifiers: VerifierRegistry,
    pub sinks: HashMap<SocketId, OutboundSink>,
    pub registry: IdentityRegistry,
    pub rooms: RoomManager,
    pub catalog: WorldCatalog,
    pub pending: HashMap<SocketId, PendingSession>,
    pub disconnects: HashMap<SocketId, DisconnectSession>,
    /// Identities currently in the lobby (not inside any world)
    pub lobby: Vec<String>,
    /// Identities of headless (CLI) clients
    pub cli_clients: Vec<String>,
    pub scores: ScoreBoard,
    pub games: GameManagers,
    pub scheduler: Scheduler,
}

impl ServerState {
    /// Build the state and create the static world rooms, wiring their
    /// background loops into the scheduler.
    pub fn new(config: ServerConfig, events_tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        let catalog = WorldCatalog::builtin();
        let mut rooms = RoomManager::new();
        let mut scheduler = Scheduler::new(events_tx);

        for entry in catalog.entries() {
            let name = format!("#{}", entry.name);
            let grid = (entry.grid_source)(WORLD_WIDTH, WORLD_HEIGHT);
            let mut room = Room::world(&name, grid, config.history_limit);
            room.patrols = patrols_for(&entry.name);
            room.bridge = bridge_for(&entry.name);

            for patrol in 0..room.patrols.len() {
                scheduler.schedule_periodic(
                    PATROL_TICK,
                    TickEvent::PatrolStep {
                        world: name.clone(),
                        patrol,
                    },
                );
            }
            if room.bridge.is_some() {
                scheduler.schedule_periodic(
                    BRIDGE_TICK,
                    TickEvent::BridgeStep { world: name.clone() },
                );
            }
            rooms.insert(room);
        }

        Self {
            config,
            verifiers: VerifierRegistry::standard(),
            sinks: HashMap::new(),
            registry: IdentityRegistry::new(),
            rooms,
            catalog,
            pending: HashMap::new(),
            disconnects: HashMap::new(),
            lobby: Vec::new(),
            cli_clients: Vec::new(),
            scores: ScoreBoard::new(),
            games: GameManagers::default(),
            scheduler,
        }
    }

    // -----------------------------------------------------------------------
    // Send primitives
    // -----------------------------------------------------------------------

    fn seal_command(&self, command: Command) -> Option<Envelope> {
        match Envelope::new(command, "").seal() {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                error!(error = %e, "Failed to seal outbound envelope");
                None
            }
        }
    }

    pub fn send_socket(&self, socket_id: SocketId, command: Command) {
        if let Some(envelope) = self.seal_command(command) {
            self.send_socket_envelope(socket_id, &envelope);
        }
    }

    pub fn send_socket_envelope(&self, socket_id: SocketId, envelope: &Envelope) {
        let Some(sink) = self.sinks.get(&socket_id) else {
            debug!(socket = %socket_id, "No sink for socket, dropping send");
            return;
        };
        match envelope.to_text() {
            Ok(text) => {
                if sink.send(text).is_err() {
                    warn!(socket = %socket_id, "Socket outbound queue closed");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize outbound envelope"),
        }
    }

    /// Send to every live socket registered under the identity.
    pub fn send_user(&self, identity: &str, command: Command) {
        if let Some(envelope) = self.seal_command(command) {
            self.send_user_envelope(identity, &envelope);
        }
    }

    pub fn send_user_envelope(&self, identity: &str, envelope: &Envelope) {
        for socket_id in self.registry.sockets_of(identity) {
            self.send_socket_envelope(socket_id, envelope);
        }
    }

    /// Registry-wide fan-out.
    pub fn broadcast_all(&self, command: Command) {
        let Some(envelope) = self.seal_command(command) else {
            return;
        };
        let identities: Vec<String> = self.registry.identities().map(String::from).collect();
        for identity in identities {
            self.send_user_envelope(&identity, &envelope);
        }
    }

    pub fn error_to(&self, socket_id: SocketId, msg: impl Into<String>) {
        self.send_socket(socket_id, Command::Error(Notice::new(msg)));
    }

    pub fn info_to(&self, socket_id: SocketId, msg: impl Into<String>) {
        self.send_socket(socket_id, Command::Info(Notice::new(msg)));
    }

    pub fn success_to(&self, socket_id: SocketId, msg: impl Into<String>) {
        self.send_socket(socket_id, Command::Success(Notice::new(msg)));
    }

    /// Dropping the sink ends the socket's send pump, which closes the
    /// WebSocket from our side.
    pub fn close_socket(&mut self, socket_id: SocketId) {
        self.sinks.remove(&socket_id);
    }

    // -----------------------------------------------------------------------
    // Lobby bookkeeping and broadcasts
    // -----------------------------------------------------------------------

    pub fn in_lobby(&self, identity: &str) -> bool {
        self.lobby.iter().any(|id| id == identity)
    }

    pub fn lobby_insert(&mut self, identity: &str) {
        if !self.in_lobby(identity) {
            self.lobby.push(identity.to_string());
        }
    }

    pub fn lobby_remove(&mut self, identity: &str) {
        self.lobby.retain(|id| id != identity);
    }

    pub fn cli_clients_remove(&mut self, identity: &str) {
        self.cli_clients.retain(|id| id != identity);
    }

    /// Interactive-member counts per world, in catalog order.
    pub fn world_sizes(&self) -> Vec<usize> {
        self.catalog
            .entries()
            .iter()
            .map(|entry| {
                self.rooms
                    .get(&format!("#{}", entry.name))
                    .map(Room::user_count)
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Bot counts per world, in catalog order.
    pub fn bot_sizes(&self) -> Vec<usize> {
        self.catalog
            .entries()
            .iter()
            .map(|entry| {
                self.rooms
                    .get(&format!("#{}", entry.name))
                    .map(Room::bot_count)
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Tell everyone in the lobby that a room's occupancy changed.
    pub fn send_world_size_update(&self, world: &str, action: OccupancyAction) {
        let Some(envelope) = self.seal_command(Command::WorldSizeUpdate(WorldSizeUpdate {
            world: world.to_string(),
            action,
        })) else {
            return;
        };
        for identity in &self.lobby {
            self.send_user_envelope(identity, &envelope);
        }
    }

    /// Tell everyone in the lobby which worlds are private right now.
    pub fn send_private_worlds_update(&self) {
        let Some(envelope) = self.seal_command(Command::AllPrivateWorlds(WorldList {
            worlds: self.rooms.private_world_names(),
        })) else {
            return;
        };
        for identity in &self.lobby {
            self.send_user_envelope(identity, &envelope);
        }
    }

    /// Tell a room's members who holds the admin seat (empty = vacant).
    pub fn send_world_admin_update(&self, room_name: &str, admin: &str) {
        let Some(room) = self.rooms.get(room_name) else {
            return;
        };
        let members: Vec<String> = room.users().map(String::from).collect();
        let command = Command::UpdateAdmin(tessera_proto::command::UpdateAdmin {
            identity: admin.to_string(),
        });
        let Some(envelope) = self.seal_command(command) else {
            return;
        };
        for member in members {
            self.send_user_envelope(&member, &envelope);
        }
    }

    /// Refresh a client's lobby view: occupancy and private-world catalog.
    pub fn update_lobby_knowledge(&self, socket_id: SocketId) {
        self.send_socket(
            socket_id,
            Command::WorldSize(WorldSizes {
                worlds: self.world_sizes(),
            }),
        );
        self.send_socket(
            socket_id,
            Command::AllPrivateWorlds(WorldList {
                worlds: self.rooms.private_world_names(),
            }),
        );
    }

    pub fn send_bot_sizes_to(&self, socket_id: SocketId) {
        self.send_socket(
            socket_id,
            Command::AllBotSizes(BotSizes {
                bots: self.bot_sizes(),
            }),
        );
    }

    /// A private world can never persist with no owner present: when the
    /// admin departs, its worlds revert to public, the passwords are
    /// cleared, and both the room and the lobby hear about it.
    pub fn revert_owned_worlds(&mut self, identity: &str) {
        for name in self.rooms.rooms_administered_by(identity) {
            if let Some(room) = self.rooms.get_mut(&name) {
                room.revert_privacy();
            }
            self.send_world_admin_update(&name, "");
            self.send_private_worlds_update();
        }
    }
}
