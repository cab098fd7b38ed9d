//! Chat routing and channel membership handlers.

use tracing::debug;

use tessera_proto::command::{
    Coordinates, OccupancyAction, PrintChannel, UpdatePosition,
};
use tessera_proto::{split_identity, Command, Envelope};

use crate::presence::check_admin_departure;
use crate::registry::SocketId;
use crate::room::MemberKind;
use crate::state::ServerState;

/// Route a chat message: room-scoped, identity-scoped, or broadcast-to-all.
pub fn on_chat_message(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::ChatMessage(payload) = &envelope.command else {
        return;
    };

    match (&envelope.to, &envelope.from) {
        (Some(to), Some(_)) if to.starts_with('#') => {
            relay_room_chat(state, socket_id, envelope, to.clone());
        }
        (Some(to), _) => {
            let out = Envelope::new(
                Command::ChatMessage(payload.clone()),
                envelope.identity.clone(),
            )
            .with_to(to.clone())
            .with_from(envelope.from.clone().unwrap_or_default());
            if let Ok(out) = out.seal() {
                state.send_user_envelope(to, &out);
            }
        }
        (None, _) => {
            let out = Envelope::new(
                Command::ChatMessage(payload.clone()),
                envelope.identity.clone(),
            )
            .with_from(envelope.from.clone().unwrap_or_default());
            let Ok(out) = out.seal() else {
                return;
            };
            let identities: Vec<String> = state.registry.identities().map(String::from).collect();
            for identity in identities {
                state.send_user_envelope(&identity, &out);
            }
        }
    }
}

fn relay_room_chat(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope, to: String) {
    let Command::ChatMessage(payload) = &envelope.command else {
        return;
    };
    let Some(room) = state.rooms.get(&to) else {
        state.error_to(socket_id, format!("There is no channel named {to}"));
        return;
    };
    if !room.accepts_message_from(&envelope.identity) {
        state.error_to(socket_id, format!("You are not joined to the channel {to}"));
        return;
    }
    let recipients = room.chat_recipients();

    if let Some(room) = state.rooms.get_mut(&to) {
        room.record_history(&envelope.identity, &payload.text);
    }

    let out = Envelope::new(
        Command::ChatMessage(payload.clone()),
        envelope.identity.clone(),
    )
    .with_to(to)
    .with_from(envelope.from.clone().unwrap_or_default());
    let Ok(out) = out.seal() else {
        return;
    };
    for identity in recipients {
        state.send_user_envelope(&identity, &out);
    }
}

/// Relay an audio blob into a room. No history, and bot traffic stays among
/// bots just like position updates.
pub fn on_audio(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::Audio(payload) = &envelope.command else {
        return;
    };
    let (Some(to), Some(from)) = (&envelope.to, &envelope.from) else {
        return;
    };
    if !to.starts_with('#') {
        return;
    }
    let Some(room) = state.rooms.get(to) else {
        state.error_to(socket_id, format!("There is no channel named {to}"));
        return;
    };
    let recipients: Vec<String> = match room.member_kind(&envelope.identity) {
        Some(MemberKind::User) => room.users().map(String::from).collect(),
        Some(MemberKind::Bot) => room.bots().map(String::from).collect(),
        None => return,
    };

    let out = Envelope::new(Command::Audio(payload.clone()), envelope.identity.clone())
        .with_to(to.clone())
        .with_from(from.clone());
    let Ok(out) = out.seal() else {
        return;
    };
    for identity in recipients {
        state.send_user_envelope(&identity, &out);
    }
}

pub fn on_channel_create(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::ChannelCreate(payload) = &envelope.command else {
        return;
    };
    let name = format!("#{}", payload.channel);
    let history = payload.history.unwrap_or(state.config.history_limit);
    let external = payload.external_messages.unwrap_or(false);

    match state.rooms.create_channel(
        &name,
        &envelope.identity,
        payload.password.clone(),
        history,
        external,
    ) {
        Ok(()) => state.success_to(socket_id, format!("Created channel {name}")),
        Err(e) => state.error_to(socket_id, e.to_string()),
    }
}

pub fn on_channel_join(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::ChannelJoin(payload) = &envelope.command else {
        return;
    };
    let name = format!("#{}", payload.channel);

    match state
        .rooms
        .join(&name, &envelope.identity, payload.password.as_deref())
    {
        Ok(()) => {
            let nick = split_identity(&envelope.identity).1.unwrap_or("");
            state.info_to(socket_id, format!("{nick} joined the channel"));
            state.send_world_size_update(&payload.channel, OccupancyAction::JoinedClient);

            // joining a world also hands over the current position map
            if let Some(room) = state.rooms.get(&name) {
                if room.is_world {
                    for (identity, coords) in &room.positions {
                        state.send_socket(
                            socket_id,
                            Command::UpdatePosition(position_of(identity, coords)),
                        );
                    }
                }
            }
        }
        Err(e) => state.error_to(socket_id, e.to_string()),
    }
}

pub fn on_channel_leave(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::ChannelLeave(payload) = &envelope.command else {
        return;
    };
    let name = format!("#{}", payload.channel);

    match state.rooms.leave(&name, &envelope.identity) {
        Ok(()) => {
            state.success_to(
                socket_id,
                format!("{} left the channel {name}.", envelope.identity),
            );
            state.send_world_size_update(&payload.channel, OccupancyAction::LeftClient);
            check_admin_departure(state, &name, &envelope.identity);
        }
        Err(e) => state.error_to(socket_id, e.to_string()),
    }
}

pub fn on_request_all_channels(state: &mut ServerState, socket_id: SocketId, envelope: &Envelope) {
    let Command::RequestAllChannels(_) = &envelope.command else {
        return;
    };
    debug!(socket = %socket_id, "Listing channels");
    for channel in state.rooms.names() {
        state.send_socket(socket_id, Command::PrintChannel(PrintChannel { channel }));
    }
}

pub(crate) fn position_of(identity: &str, coords: &Coordinates) -> UpdatePosition {
    UpdatePosition {
        identity: identity.to_string(),
        x: coords.x,
        y: coords.y,
        direction: String::new(),
        skin: coords.skin.clone(),
    }
}
