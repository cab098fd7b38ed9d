//! World membership transitions, presence fan-out and per-world privacy.

use std::time::Duration;

use tracing::debug;

use tessera_proto::command::{
    Coordinates, DeleteClient, Empty, JoinWorld, OccupancyAction,
};
use tessera_proto::{split_identity, Command, Envelope};

use crate::channels::position_of;
use crate::registry::SocketId;
use crate::room::{password_matches, MemberKind};
use crate::state::ServerState;
use crate::worlds::{WORLD_HEIGHT, WORLD_WIDTH};

/// How long a member join pauses background tile animation.
const JOIN_QUIET: Duration = Duration::from_secs(1);

/// A client asks to enter a world, switch worlds, or return to the lobby.
pub fn on_join_world(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::JoinWorld(payload) = &envelope.command else {
        return;
    };
    if state.in_lobby(&envelope.identity) {
        let identity = envelope.identity.clone();
        state.lobby_remove(&identity);
        lobby_to_world(state, socket_id, envelope, payload);
    } else {
        world_to_world(state, socket_id, envelope, payload);
    }
}

fn lobby_to_world(
    state: &mut ServerState,
    socket_id: SocketId,
    envelope: &Envelope,
    payload: &JoinWorld,
) {
    let room_name = format!("#{}", payload.world_name);
    if !state.rooms.contains(&room_name) || !state.catalog.contains(&payload.world_name) {
        // bad world name: back to the lobby, whose view is still current
        state.lobby_insert(&envelope.identity);
        return;
    }
    admit_to_world(state, socket_id, envelope, payload, &room_name);
}

fn world_to_world(
    state: &mut ServerState,
    socket_id: SocketId,
    envelope: &Envelope,
    payload: &JoinWorld,
) {
    let Some(current) = envelope.to.clone() else {
        debug!(identity = %envelope.identity, "World switch without a current world");
        return;
    };

    if payload.world_name.is_empty() {
        // back to the lobby
        leave_world(state, &envelope.identity, &current);
        state.lobby_insert(&envelope.identity);
        state.update_lobby_knowledge(socket_id);
        state.send_socket(
            socket_id,
            Command::JoinWorld(JoinWorld {
                world_name: String::new(),
                world_logic: None,
                coordinates: None,
                is_bot: None,
            }),
        );
        return;
    }

    leave_world(state, &envelope.identity, &current);
    let room_name = format!("#{}", payload.world_name);
    if state.rooms.contains(&room_name) && state.catalog.contains(&payload.world_name) {
        admit_to_world(state, socket_id, envelope, payload, &room_name);
    } else {
        // unknown target: fall back to the lobby
        state.lobby_insert(&envelope.identity);
        state.update_lobby_knowledge(socket_id);
        state.send_socket(
            socket_id,
            Command::JoinWorld(JoinWorld {
                world_name: payload.world_name.clone(),
                world_logic: None,
                coordinates: None,
                is_bot: None,
            }),
        );
    }
}

fn admit_to_world(
    state: &mut ServerState,
    socket_id: SocketId,
    envelope: &Envelope,
    payload: &JoinWorld,
    room_name: &str,
) {
    let identity = &envelope.identity;
    let is_bot = payload.is_bot.unwrap_or(false);
    let nick = split_identity(identity).1.unwrap_or("").to_string();

    if let Some(room) = state.rooms.get_mut(room_name) {
        if is_bot {
            room.add_bot(identity);
        } else {
            room.add_user(identity);
        }
    }

    if is_bot {
        state.info_to(socket_id, format!("{nick} [BOT] joined the channel"));
        state.send_world_size_update(&payload.world_name, OccupancyAction::JoinedBot);
    } else {
        state.info_to(socket_id, format!("{nick} joined the channel"));
        state.send_world_size_update(&payload.world_name, OccupancyAction::JoinedClient);
    }

    let grid = state
        .rooms
        .get(room_name)
        .map(|room| room.grid.clone())
        .unwrap_or_default();
    state.send_socket(
        socket_id,
        Command::JoinWorld(JoinWorld {
            world_name: payload.world_name.clone(),
            world_logic: Some(grid),
            coordinates: None,
            is_bot: None,
        }),
    );

    send_all_positions(state, socket_id, room_name, identity, payload.coordinates.clone());
}

/// Announce the newcomer to everyone already positioned, record its spawn
/// position, then hand it the full position map.
fn send_all_positions(
    state: &mut ServerState,
    socket_id: SocketId,
    room_name: &str,
    identity: &str,
    coordinates: Option<Coordinates>,
) {
    let Some(coords) = coordinates else {
        return;
    };

    let existing: Vec<String> = state
        .rooms
        .get(room_name)
        .map(|room| room.positions.keys().cloned().collect())
        .unwrap_or_default();
    for recipient in &existing {
        state.send_user(
            recipient,
            Command::UpdatePosition(position_of(identity, &coords)),
        );
    }

    if let Some(room) = state.rooms.get_mut(room_name) {
        room.positions.insert(identity.to_string(), coords);
        room.suppress_animation(JOIN_QUIET);
    }

    if let Some(room) = state.rooms.get(room_name) {
        for (id, c) in &room.positions {
            state.send_socket(socket_id, Command::UpdatePosition(position_of(id, c)));
        }
    }
}

/// Remove a member from a world with all its departure effects: the
/// same-kind members hear it left, the lobby sees the occupancy change, an
/// admin departure reverts privacy, and a reset world regenerates its grid.
pub(crate) fn leave_world(state: &mut ServerState, identity: &str, world: &str) {
    let room_name = format!("#{world}");
    let removed = match state.rooms.get_mut(&room_name) {
        Some(room) => room.remove_member(identity),
        None => return,
    };
    let Some(kind) = removed else {
        return;
    };

    let remaining: Vec<String> = state
        .rooms
        .get(&room_name)
        .map(|room| match kind {
            MemberKind::User => room.users().map(String::from).collect(),
            MemberKind::Bot => room.bots().map(String::from).collect(),
        })
        .unwrap_or_default();
    for id in remaining {
        state.send_user(
            &id,
            Command::DeleteClient(DeleteClient {
                identity: identity.to_string(),
            }),
        );
    }

    match kind {
        MemberKind::User => state.send_world_size_update(world, OccupancyAction::LeftClient),
        MemberKind::Bot => state.send_world_size_update(world, OccupancyAction::LeftBot),
    }

    check_admin_departure(state, &room_name, identity);
    regenerate_if_reset(state, &room_name);
}

/// If the departing identity held the admin seat, the world reverts to
/// public: a private world can never persist with no owner present.
pub(crate) fn check_admin_departure(state: &mut ServerState, room_name: &str, identity: &str) {
    let was_admin = state
        .rooms
        .get(room_name)
        .map(|room| room.world_admin.as_deref() == Some(identity))
        .unwrap_or(false);
    if !was_admin {
        return;
    }
    if let Some(room) = state.rooms.get_mut(room_name) {
        room.revert_privacy();
    }
    state.send_world_admin_update(room_name, "");
    state.send_private_worlds_update();
}

/// The regenerating world gets a fresh grid when membership returns to the
/// single remaining member. A semantic reset, not a teardown.
pub(crate) fn regenerate_if_reset(state: &mut ServerState, room_name: &str) {
    let world = room_name.trim_start_matches('#');
    let Some(entry) = state.catalog.entry(world) else {
        return;
    };
    if !entry.regenerates {
        return;
    }
    let source = entry.grid_source;
    if let Some(room) = state.rooms.get_mut(room_name) {
        if room.user_count() == 1 {
            room.grid = source(WORLD_WIDTH, WORLD_HEIGHT);
        }
    }
}

/// Position updates fan out per room: a user member reaches every member,
/// a bot member reaches only the other bots, a non-member is ignored.
pub fn on_update_position(state: &mut ServerState, _socket_id: SocketId, envelope: &Envelope) {
    let Command::UpdatePosition(payload) = &envelope.command else {
        return;
    };

    for name in state.rooms.names() {
        let recipients = {
            let Some(room) = state.rooms.get_mut(&name) else {
                continue;
            };
            let Some(kind) = room.member_kind(&envelope.identity) else {
                continue;
            };
            let first_sighting = !room.positions.contains_key(&envelope.identity);
            room.positions.insert(
                envelope.identity.clone(),
                Coordinates {
                    x: payload.x,
                    y: payload.y,
                    skin: payload.skin.clone(),
                },
            );
            if first_sighting {
                room.suppress_animation(JOIN_QUIET);
            }
            match kind {
                MemberKind::User => room.chat_recipients(),
                MemberKind::Bot => room.bots().map(String::from).collect(),
            }
        };
        for id in recipients {
            state.send_user(&id, Command::UpdatePosition(payload.clone()));
        }
    }
}

pub fn on_update_skin(state: &mut ServerState, _socket_id: SocketId, envelope: &Envelope) {
    let Command::UpdateSkin(payload) = &envelope.command else {
        return;
    };

    // a lobby client only sees its own appearance change
    if state.in_lobby(&payload.identity) {
        state.send_user(&payload.identity, Command::UpdateSkin(payload.clone()));
        return;
    }

    for name in state.rooms.names() {
        let recipients = {
            let Some(room) = state.rooms.get_mut(&name) else {
                continue;
            };
            if !room.positions.contains_key(&payload.identity) {
                continue;
            }
            if let Some(position) = room.positions.get_mut(&payload.identity) {
                position.skin = payload.skin.clone();
            }
            match room.member_kind(&payload.identity) {
                Some(MemberKind::User) => room.users().map(String::from).collect::<Vec<_>>(),
                Some(MemberKind::Bot) => room.bots().map(String::from).collect(),
                None => continue,
            }
        };
        for id in recipients {
            state.send_user(&id, Command::UpdateSkin(payload.clone()));
        }
    }
}

/// Pre-flight password check before a client attempts a world join.
pub fn on_try_password(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::TryPassword(payload) = &envelope.command else {
        return;
    };
    let room_name = format!("#{}", payload.world_name);
    let ok = state
        .rooms
        .get(&room_name)
        .map(|room| password_matches(room.required_password(), &payload.password))
        .unwrap_or(false);
    if ok {
        state.send_socket(socket_id, Command::SuccessPassword(Empty {}));
    } else {
        state.send_socket(socket_id, Command::FailPassword(Empty {}));
    }
}

/// A member claims the admin seat of a world: the world goes private behind
/// the supplied password, the room hears who rules it, and the lobby learns
/// the world is now private.
pub fn on_set_admin(state: &mut ServerState, _socket_id: SocketId, envelope: &Envelope) {
    let Command::SetAdmin(payload) = &envelope.command else {
        return;
    };
    let room_name = format!("#{}", payload.world_name);
    {
        let Some(room) = state.rooms.get_mut(&room_name) else {
            debug!(world = %payload.world_name, "SetAdmin for unknown world");
            return;
        };
        room.is_private = true;
        room.world_admin = Some(envelope.identity.clone());
        room.admin_password = Some(payload.password.clone());
    }
    state.send_world_admin_update(&room_name, &envelope.identity);
    state.send_private_worlds_update();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use tessera_proto::command::{SetAdmin, TryPassword, UpdatePosition, UpdateSkin};
    use tessera_proto::Keypair;

    struct Peer {
        socket_id: SocketId,
        rx: tokio::sync::mpsc::UnboundedReceiver<String>,
        identity: String,
    }

    fn join_peer(state: &mut ServerState, nick: &str) -> Peer {
        let (socket_id, mut rx) = testutil::attach_socket(state);
        let keypair = Keypair::generate();
        let identity = testutil::authenticate(state, socket_id, &mut rx, &keypair, nick);
        testutil::drain(&mut rx);
        Peer {
            socket_id,
            rx,
            identity,
        }
    }

    fn join_world(state: &mut ServerState, peer: &Peer, world: &str, is_bot: bool) {
        let envelope = testutil::sealed(
            Command::JoinWorld(JoinWorld {
                world_name: world.into(),
                world_logic: None,
                coordinates: Some(Coordinates {
                    x: 2,
                    y: 2,
                    skin: "knight".into(),
                }),
                is_bot: Some(is_bot),
            }),
            &peer.identity,
        );
        on_join_world(state, peer.socket_id, &envelope);
    }

    #[tokio::test]
    async fn test_lobby_to_world_join() {
        let (mut state, _events) = testutil::make_state();
        let mut alice = join_peer(&mut state, "alice");

        join_world(&mut state, &alice, "CaveWorld", false);

        let cave = state.rooms.get("#CaveWorld").unwrap();
        assert!(cave.has_user(&alice.identity));
        assert!(cave.positions.contains_key(&alice.identity));
        assert!(cave.animation_suppressed());
        assert!(!state.in_lobby(&alice.identity));

        let messages = testutil::drain(&mut alice.rx);
        let reply = testutil::find(&messages, "JoinWorld").unwrap();
        assert_eq!(reply["payload"]["world_name"], "CaveWorld");
        assert!(reply["payload"]["world_logic"].is_array());
        assert!(testutil::find(&messages, "UpdatePosition").is_some());
    }

    #[tokio::test]
    async fn test_unknown_world_returns_to_lobby() {
        let (mut state, _events) = testutil::make_state();
        let alice = join_peer(&mut state, "alice");

        join_world(&mut state, &alice, "Atlantis", false);
        assert!(state.in_lobby(&alice.identity));
    }

    #[tokio::test]
    async fn test_world_to_lobby_transition() {
        let (mut state, _events) = testutil::make_state();
        let mut alice = join_peer(&mut state, "alice");
        join_world(&mut state, &alice, "CaveWorld", false);
        testutil::drain(&mut alice.rx);

        let envelope = Envelope::new(
            Command::JoinWorld(JoinWorld {
                world_name: String::new(),
                world_logic: None,
                coordinates: None,
                is_bot: None,
            }),
            alice.identity.clone(),
        )
        .with_to("CaveWorld")
        .seal()
        .unwrap();
        on_join_world(&mut state, alice.socket_id, &envelope);

        assert!(!state.rooms.get("#CaveWorld").unwrap().has_user(&alice.identity));
        assert!(state.in_lobby(&alice.identity));

        let messages = testutil::drain(&mut alice.rx);
        assert!(testutil::find(&messages, "WorldSize").is_some());
        assert!(testutil::find(&messages, "AllPrivateWorlds").is_some());
        let reply = testutil::find(&messages, "JoinWorld").unwrap();
        assert_eq!(reply["payload"]["world_name"], "");
    }

    #[tokio::test]
    async fn test_bot_position_updates_stay_among_bots() {
        let (mut state, _events) = testutil::make_state();
        let mut alice = join_peer(&mut state, "alice");
        let mut roomba = join_peer(&mut state, "roomba");
        join_world(&mut state, &alice, "CaveWorld", false);
        join_world(&mut state, &roomba, "CaveWorld", true);
        testutil::drain(&mut alice.rx);
        testutil::drain(&mut roomba.rx);

        let envelope = testutil::sealed(
            Command::UpdatePosition(UpdatePosition {
                identity: roomba.identity.clone(),
                x: 9,
                y: 9,
                direction: "north".into(),
                skin: "vacuum".into(),
            }),
            &roomba.identity,
        );
        on_update_position(&mut state, roomba.socket_id, &envelope);

        assert!(testutil::drain(&mut alice.rx).is_empty());
        let bot_msgs = testutil::drain(&mut roomba.rx);
        assert!(testutil::find(&bot_msgs, "UpdatePosition").is_some());
    }

    #[tokio::test]
    async fn test_user_position_updates_reach_all_members() {
        let (mut state, _events) = testutil::make_state();
        let mut alice = join_peer(&mut state, "alice");
        let mut roomba = join_peer(&mut state, "roomba");
        join_world(&mut state, &alice, "CaveWorld", false);
        join_world(&mut state, &roomba, "CaveWorld", true);
        testutil::drain(&mut alice.rx);
        testutil::drain(&mut roomba.rx);

        let envelope = testutil::sealed(
            Command::UpdatePosition(UpdatePosition {
                identity: alice.identity.clone(),
                x: 4,
                y: 5,
                direction: "east".into(),
                skin: "knight".into(),
            }),
            &alice.identity,
        );
        on_update_position(&mut state, alice.socket_id, &envelope);

        assert!(testutil::find(&testutil::drain(&mut alice.rx), "UpdatePosition").is_some());
        assert!(testutil::find(&testutil::drain(&mut roomba.rx), "UpdatePosition").is_some());

        // last-write-wins position map
        let cave = state.rooms.get("#CaveWorld").unwrap();
        let position = cave.positions.get(&alice.identity).unwrap();
        assert_eq!((position.x, position.y), (4, 5));
    }

    #[tokio::test]
    async fn test_position_update_for_non_member_ignored() {
        let (mut state, _events) = testutil::make_state();
        let mut alice = join_peer(&mut state, "alice");
        let stranger = join_peer(&mut state, "stranger");
        join_world(&mut state, &alice, "CaveWorld", false);
        testutil::drain(&mut alice.rx);

        let envelope = testutil::sealed(
            Command::UpdatePosition(UpdatePosition {
                identity: stranger.identity.clone(),
                x: 1,
                y: 1,
                direction: "".into(),
                skin: "ghost".into(),
            }),
            &stranger.identity,
        );
        on_update_position(&mut state, stranger.socket_id, &envelope);

        assert!(testutil::drain(&mut alice.rx).is_empty());
        assert!(!state
            .rooms
            .get("#CaveWorld")
            .unwrap()
            .positions
            .contains_key(&stranger.identity));
    }

    #[tokio::test]
    async fn test_set_admin_makes_world_private() {
        let (mut state, _events) = testutil::make_state();
        let mut alice = join_peer(&mut state, "alice");
        join_world(&mut state, &alice, "CaveWorld", false);
        testutil::drain(&mut alice.rx);

        let envelope = testutil::sealed(
            Command::SetAdmin(SetAdmin {
                world_name: "CaveWorld".into(),
                password: "swordfish".into(),
            }),
            &alice.identity,
        );
        on_set_admin(&mut state, alice.socket_id, &envelope);

        let cave = state.rooms.get("#CaveWorld").unwrap();
        assert!(cave.is_private);
        assert_eq!(cave.world_admin.as_deref(), Some(alice.identity.as_str()));
        assert_eq!(cave.admin_password.as_deref(), Some("swordfish"));

        let messages = testutil::drain(&mut alice.rx);
        let update = testutil::find(&messages, "UpdateAdmin").unwrap();
        assert_eq!(update["payload"]["identity"], alice.identity.as_str());
    }

    #[tokio::test]
    async fn test_try_password() {
        let (mut state, _events) = testutil::make_state();
        let mut alice = join_peer(&mut state, "alice");
        {
            let cave = state.rooms.get_mut("#CaveWorld").unwrap();
            cave.is_private = true;
            cave.admin_password = Some("swordfish".into());
        }

        let wrong = testutil::sealed(
            Command::TryPassword(TryPassword {
                world_name: "CaveWorld".into(),
                password: "guess".into(),
            }),
            &alice.identity,
        );
        on_try_password(&mut state, alice.socket_id, &wrong);
        let messages = testutil::drain(&mut alice.rx);
        assert!(testutil::find(&messages, "FailPassword").is_some());

        let right = testutil::sealed(
            Command::TryPassword(TryPassword {
                world_name: "CaveWorld".into(),
                password: "swordfish".into(),
            }),
            &alice.identity,
        );
        on_try_password(&mut state, alice.socket_id, &right);
        let messages = testutil::drain(&mut alice.rx);
        assert!(testutil::find(&messages, "SuccessPassword").is_some());
    }

    #[tokio::test]
    async fn test_admin_departure_reverts_world() {
        let (mut state, _events) = testutil::make_state();
        let mut alice = join_peer(&mut state, "alice");
        join_world(&mut state, &alice, "CaveWorld", false);
        let set_admin = testutil::sealed(
            Command::SetAdmin(SetAdmin {
                world_name: "CaveWorld".into(),
                password: "swordfish".into(),
            }),
            &alice.identity,
        );
        on_set_admin(&mut state, alice.socket_id, &set_admin);
        testutil::drain(&mut alice.rx);

        leave_world(&mut state, &alice.identity, "CaveWorld");

        let cave = state.rooms.get("#CaveWorld").unwrap();
        assert!(!cave.is_private);
        assert!(cave.world_admin.is_none());
        assert!(cave.admin_password.is_none());
    }

    #[tokio::test]
    async fn test_world_regenerates_on_reset() {
        let (mut state, _events) = testutil::make_state();
        let alice = join_peer(&mut state, "alice");
        let bob = join_peer(&mut state, "bob");
        join_world(&mut state, &alice, "PsychedelicWorld", false);
        join_world(&mut state, &bob, "PsychedelicWorld", false);

        // pin a sentinel tile that regeneration will wipe
        state.rooms.get_mut("#PsychedelicWorld").unwrap().grid[5][5] = "sentinel".into();

        leave_world(&mut state, &bob.identity, "PsychedelicWorld");

        let world = state.rooms.get("#PsychedelicWorld").unwrap();
        assert_eq!(world.user_count(), 1);
        assert_ne!(world.grid[5][5], "sentinel");
    }

    #[tokio::test]
    async fn test_skin_update_in_lobby_echoes_to_self() {
        let (mut state, _events) = testutil::make_state();
        let mut alice = join_peer(&mut state, "alice");
        let mut bob = join_peer(&mut state, "bob");

        let envelope = testutil::sealed(
            Command::UpdateSkin(UpdateSkin {
                identity: alice.identity.clone(),
                skin: "wizard".into(),
            }),
            &alice.identity,
        );
        on_update_skin(&mut state, alice.socket_id, &envelope);

        assert!(testutil::find(&testutil::drain(&mut alice.rx), "UpdateSkin").is_some());
        assert!(testutil::drain(&mut bob.rx).is_empty());
    }
}
