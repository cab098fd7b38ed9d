//! A single chat channel or game world.
//!
//! Channels and worlds share membership, admission and history machinery;
//! worlds additionally carry a live tile grid, a position map and any
//! background animation state.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use subtle::ConstantTimeEq;

use tessera_proto::command::{Coordinates, Grid};

use crate::worlds::{BridgeState, PatrolState};

/// The two disjoint member kinds. Bots count for occupancy and trigger the
/// same broadcasts, but their position traffic stays among bots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    User,
    Bot,
}

pub struct Room {
    pub name: String,
    users: HashSet<String>,
    bots: HashSet<String>,

    /// Creator of a dynamic channel (implicit owner)
    pub owner: Option<String>,
    /// Channel was created with a password
    pub secret: bool,
    pub password: Option<String>,
    /// Whether non-members may send into this room
    pub external_messages: bool,

    pub is_world: bool,
    /// World went private because a member claimed admin
    pub is_private: bool,
    pub world_admin: Option<String>,
    pub admin_password: Option<String>,

    history: Vec<(String, String)>,
    history_limit: usize,
    history_cursor: usize,

    /// Live position map, worlds only (identity → coordinate + appearance)
    pub positions: HashMap<String, Coordinates>,
    pub grid: Grid,
    pub patrols: Vec<PatrolState>,
    pub bridge: Option<BridgeState>,

    quiet_until: Option<Instant>,
}

impl Room {
    /// A dynamic chat channel; the creator becomes its sole member and
    /// implicit owner.
    pub fn channel(
        name: &str,
        owner: &str,
        password: Option<String>,
        history_limit: usize,
        external_messages: bool,
    ) -> Self {
        let mut users = HashSet::new();
        users.insert(owner.to_string());
        Self {
            name: name.to_string(),
            users,
            bots: HashSet::new(),
            owner: Some(owner.to_string()),
            secret: password.is_some(),
            password,
            external_messages,
            is_world: false,
            is_private: false,
            world_admin: None,
            admin_password: None,
            history: Vec::new(),
            history_limit,
            history_cursor: 0,
            positions: HashMap::new(),
            grid: Vec::new(),
            patrols: Vec::new(),
            bridge: None,
            quiet_until: None,
        }
    }

    /// A static world room, created once at server start.
    pub fn world(name: &str, grid: Grid, history_limit: usize) -> Self {
        Self {
            name: name.to_string(),
            users: HashSet::new(),
            bots: HashSet::new(),
            owner: None,
            secret: false,
            password: None,
            external_messages: false,
            is_world: true,
            is_private: false,
            world_admin: None,
            admin_password: None,
            history: Vec::new(),
            history_limit,
            history_cursor: 0,
            positions: HashMap::new(),
            grid,
            patrols: Vec::new(),
            bridge: None,
            quiet_until: None,
        }
    }

    /// Room names carry the reserved prefix exactly once and no whitespace.
    pub fn is_valid_name(name: &str) -> bool {
        name.starts_with('#')
            && name.matches('#').count() == 1
            && !name.contains(char::is_whitespace)
    }

    pub fn add_user(&mut self, identity: &str) {
        self.users.insert(identity.to_string());
    }

    pub fn add_bot(&mut self, identity: &str) {
        self.bots.insert(identity.to_string());
    }

    /// Evict a member of either kind, dropping its position entry.
    pub fn remove_member(&mut self, identity: &str) -> Option<MemberKind> {
        let kind = self.member_kind(identity)?;
        match kind {
            MemberKind::User => self.users.remove(identity),
            MemberKind::Bot => self.bots.remove(identity),
        };
        self.positions.remove(identity);
        Some(kind)
    }

    pub fn member_kind(&self, identity: &str) -> Option<MemberKind> {
        if self.users.contains(identity) {
            Some(MemberKind::User)
        } else if self.bots.contains(identity) {
            Some(MemberKind::Bot)
        } else {
            None
        }
    }

    pub fn has_user(&self, identity: &str) -> bool {
        self.users.contains(identity)
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(String::as_str)
    }

    pub fn bots(&self) -> impl Iterator<Item = &str> {
        self.bots.iter().map(String::as_str)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn bot_count(&self) -> usize {
        self.bots.len()
    }

    /// Everyone a room-scoped chat send reaches.
    pub fn chat_recipients(&self) -> Vec<String> {
        self.users.iter().chain(self.bots.iter()).cloned().collect()
    }

    /// Whether this sender may post into the room.
    pub fn accepts_message_from(&self, sender: &str) -> bool {
        self.member_kind(sender).is_some() || self.external_messages
    }

    /// Append to the bounded history ring; a zero limit disables history.
    pub fn record_history(&mut self, sender: &str, text: &str) {
        if self.history_limit == 0 {
            return;
        }
        let entry = (sender.to_string(), text.to_string());
        if self.history.len() < self.history_limit {
            self.history.push(entry);
        } else {
            self.history[self.history_cursor] = entry;
        }
        self.history_cursor = (self.history_cursor + 1) % self.history_limit;
    }

    pub fn history(&self) -> &[(String, String)] {
        &self.history
    }

    /// Drop admin ownership and revert to public. Returns whether anything
    /// actually changed.
    pub fn revert_privacy(&mut self) -> bool {
        if self.world_admin.is_none() && !self.is_private {
            return false;
        }
        self.world_admin = None;
        self.is_private = false;
        self.admin_password = None;
        true
    }

    /// The password currently guarding this room, if any.
    pub fn required_password(&self) -> Option<&str> {
        if self.is_private {
            self.admin_password.as_deref()
        } else if self.secret {
            self.password.as_deref()
        } else {
            None
        }
    }

    /// Hold off background tile mutation for a moment, so a joining member
    /// is not flooded while it still processes the bootstrap payloads.
    pub fn suppress_animation(&mut self, pause: Duration) {
        self.quiet_until = Some(Instant::now() + pause);
    }

    pub fn animation_suppressed(&self) -> bool {
        matches!(self.quiet_until, Some(until) if Instant::now() < until)
    }
}

/// Constant-time password comparison.
pub fn password_matches(stored: Option<&str>, given: &str) -> bool {
    let Some(stored) = stored else {
        return false;
    };
    stored.len() == given.len() && stored.as_bytes().ct_eq(given.as_bytes()).unwrap_u8() == 1
}
