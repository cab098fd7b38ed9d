//! Per-identity mini-game scores.

use std::collections::HashMap;

use tessera_proto::command::{GameKind, Leaderboard, LeaderboardEntry};
use tessera_proto::{Command, Envelope};

use crate::registry::SocketId;
use crate::state::ServerState;

const WIN_POINTS: u32 = 3;
const LOSS_PENALTY: u32 = 1;

fn slot(game: GameKind) -> usize {
    match game {
        GameKind::Rps => 0,
        GameKind::TicTacToe => 1,
        GameKind::CaptureTheFlag => 2,
    }
}

/// Score table: identity → `[rps, tic-tac-toe, capture-the-flag]`.
/// In-memory only, like everything else here.
#[derive(Default)]
pub struct ScoreBoard {
    scores: HashMap<String, [u32; 3]>,
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a win or loss. Scores never go below zero.
    pub fn apply(&mut self, identity: &str, game: GameKind, win: bool) {
        let entry = self.scores.entry(identity.to_string()).or_insert([0; 3]);
        let score = &mut entry[slot(game)];
        if win {
            *score += WIN_POINTS;
        } else {
            *score = score.saturating_sub(LOSS_PENALTY);
        }
    }

    pub fn get(&self, identity: &str) -> Option<[u32; 3]> {
        self.scores.get(identity).copied()
    }

    /// Snapshot for a leaderboard reply, sorted by identity for stable output.
    pub fn entries(&self) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self
            .scores
            .iter()
            .map(|(identity, scores)| LeaderboardEntry {
                identity: identity.clone(),
                scores: *scores,
            })
            .collect();
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));
        entries
    }
}

// ---------------------------------------------------------------------------
// Dispatcher handlers
// ---------------------------------------------------------------------------

pub fn on_update_score(state: &mut ServerState, _socket_id: SocketId, envelope: &Envelope) {
    let Command::UpdateScore(payload) = &envelope.command else {
        return;
    };
    state.scores.apply(&payload.identity, payload.game, payload.win);
}

pub fn on_request_leaderboard(state: &mut ServerState, _socket_id: SocketId, envelope: &Envelope) {
    let Command::RequestLeaderboard(payload) = &envelope.command else {
        return;
    };
    state.send_user(
        &payload.identity,
        Command::Leaderboard(Leaderboard {
            entries: state.scores.entries(),
        }),
    );
}
