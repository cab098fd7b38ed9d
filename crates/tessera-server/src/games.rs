//! Mini-game manager seam.
//!
//! Managers register through the dispatcher like any other collaborator and
//! receive a member-departed hook from disconnect cleanup. The rules of the
//! games live with the clients; the server side is matchmaking relay only.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use tessera_proto::command::{CtfMessage, TicTacToeMove};
use tessera_proto::{Command, Envelope};

use crate::registry::SocketId;
use crate::state::ServerState;

#[derive(Default)]
pub struct GameManagers {
    pub tic_tac_toe: TicTacToeRelay,
    pub ctf: CtfRelay,
}

impl GameManagers {
    /// Disconnect cleanup notifies every manager that a member departed.
    pub fn handle_departure(&mut self, state: &ServerState, identity: &str, world: &str) {
        self.tic_tac_toe.handle_departure(state, identity);
        self.ctf.handle_departure(identity, world);
    }
}

/// Tic-tac-toe matchmaking: tracks who is looking for a game and relays
/// addressed moves between the two players.
#[derive(Default)]
pub struct TicTacToeRelay {
    waiting: Vec<String>,
}

impl TicTacToeRelay {
    pub fn handle(&mut self, state: &ServerState, payload: &TicTacToeMove) {
        match payload.action.as_str() {
            "join" => {
                if !self.waiting.contains(&payload.from) {
                    self.waiting.push(payload.from.clone());
                }
            }
            "leave" | "exit" => {
                self.waiting.retain(|id| id != &payload.from);
            }
            _ => {}
        }
        if let Some(to) = &payload.to {
            state.send_user(to, Command::TicTacToe(payload.clone()));
        }
    }

    pub fn handle_departure(&mut self, state: &ServerState, identity: &str) {
        let was_waiting = self.waiting.iter().any(|id| id == identity);
        self.waiting.retain(|id| id != identity);
        if !was_waiting {
            return;
        }
        // anyone still waiting hears the opponent is gone
        for other in &self.waiting {
            state.send_user(
                other,
                Command::TicTacToe(TicTacToeMove {
                    action: "abort".into(),
                    from: identity.to_string(),
                    to: Some(other.clone()),
                    pos: None,
                }),
            );
        }
    }

    pub fn waiting(&self) -> &[String] {
        &self.waiting
    }
}

/// Capture-the-flag rounds run per world; messages relay to that world's
/// members.
#[derive(Default)]
pub struct CtfRelay {
    participants: HashMap<String, HashSet<String>>,
    running: HashSet<String>,
}

impl CtfRelay {
    pub fn handle(&mut self, state: &ServerState, identity: &str, payload: &CtfMessage) {
        match payload.action.as_str() {
            "requestGame" => {
                self.running.insert(payload.world.clone());
                self.participants
                    .entry(payload.world.clone())
                    .or_default()
                    .insert(identity.to_string());
            }
            "stopGame" => {
                self.running.remove(&payload.world);
                self.participants.remove(&payload.world);
            }
            _ => {}
        }

        let room_name = format!("#{}", payload.world);
        let recipients: Vec<String> = state
            .rooms
            .get(&room_name)
            .map(|room| room.chat_recipients())
            .unwrap_or_default();
        for id in recipients {
            state.send_user(&id, Command::CaptureTheFlag(payload.clone()));
        }
    }

    pub fn is_running(&self, world: &str) -> bool {
        self.running.contains(world)
    }

    pub fn handle_departure(&mut self, identity: &str, world: &str) {
        if !self.running.contains(world) {
            return;
        }
        if let Some(participants) = self.participants.get_mut(world) {
            participants.remove(identity);
            if participants.is_empty() {
                self.running.remove(world);
                self.participants.remove(world);
                debug!(world, "Capture-the-flag round ended, no participants left");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher handlers
// ---------------------------------------------------------------------------

pub fn on_tic_tac_toe(state: &mut ServerState, _socket_id: SocketId, envelope: &Envelope) {
    let Command::TicTacToe(payload) = &envelope.command else {
        return;
    };
    let mut games = std::mem::take(&mut state.games);
    games.tic_tac_toe.handle(state, payload);
    state.games = games;
}

pub fn on_capture_the_flag(state: &mut ServerState, _socket_id: SocketId, envelope: &Envelope) {
    let Command::CaptureTheFlag(payload) = &envelope.command else {
        return;
    };
    let mut games = std::mem::take(&mut state.games);
    games.ctf.handle(state, &envelope.identity, payload);
    state.games = games;
}

/// Entry point for disconnect cleanup.
pub fn on_member_departed(state: &mut ServerState, identity: &str, world: &str) {
    let mut games = std::mem::take(&mut state.games);
    games.handle_departure(state, identity, world);
    state.games = games;
}
