//! Identity registry: who is connected, with which key, on which sockets.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use tessera_proto::ClientKind;

/// Opaque handle for one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(Uuid);

impl SocketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything known about a verified identity.
///
/// The record persists until process restart; only the socket set and the
/// live-key entry come and go as the identity (re)connects.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub public_key: String,
    pub first_seen: DateTime<Utc>,
    pub sockets: HashSet<SocketId>,
    pub kind: ClientKind,
}

/// Maps identity strings to their keys and live sockets.
#[derive(Default)]
pub struct IdentityRegistry {
    users: HashMap<String, UserInfo>,
    socket_owner: HashMap<SocketId, String>,
    /// Identities whose public key is currently registered live; a second
    /// connection attempt claiming one of these is refused.
    live_keys: HashMap<String, String>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket under a verified identity. An identity may hold
    /// more than one live socket (multi-device).
    pub fn register(
        &mut self,
        identity: &str,
        public_key: &str,
        kind: ClientKind,
        socket_id: SocketId,
    ) {
        let entry = self
            .users
            .entry(identity.to_string())
            .or_insert_with(|| UserInfo {
                public_key: public_key.to_string(),
                first_seen: Utc::now(),
                sockets: HashSet::new(),
                kind,
            });
        entry.sockets.insert(socket_id);
        entry.kind = kind;
        self.socket_owner.insert(socket_id, identity.to_string());
        self.live_keys
            .insert(identity.to_string(), public_key.to_string());
    }

    pub fn has_live_key(&self, identity: &str) -> bool {
        self.live_keys.contains_key(identity)
    }

    pub fn live_key_of(&self, identity: &str) -> Option<&str> {
        self.live_keys.get(identity).map(String::as_str)
    }

    /// Deregister the public key (graceful disconnect); the user record and
    /// its sockets stay until the sockets actually close.
    pub fn deregister_key(&mut self, identity: &str) {
        self.live_keys.remove(identity);
    }

    pub fn is_verified_socket(&self, socket_id: SocketId) -> bool {
        self.socket_owner.contains_key(&socket_id)
    }

    pub fn identity_of(&self, socket_id: SocketId) -> Option<&str> {
        self.socket_owner.get(&socket_id).map(String::as_str)
    }

    pub fn kind_of(&self, identity: &str) -> Option<ClientKind> {
        self.users.get(identity).map(|info| info.kind)
    }

    /// Every live socket currently registered under the identity.
    pub fn sockets_of(&self, identity: &str) -> Vec<SocketId> {
        self.users
            .get(identity)
            .map(|info| info.sockets.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop a socket. Returns the owning identity and whether this was its
    /// last live socket (which is when membership cleanup runs).
    pub fn remove_socket(&mut self, socket_id: SocketId) -> Option<(String, bool)> {
        let identity = self.socket_owner.remove(&socket_id)?;
        let last = match self.users.get_mut(&identity) {
            Some(info) => {
                info.sockets.remove(&socket_id);
                info.sockets.is_empty()
            }
            None => true,
        };
        if last {
            self.live_keys.remove(&identity);
        }
        Some((identity, last))
    }

    /// Resolve a unique identity prefix among live keys. Ambiguous or
    /// unknown prefixes resolve to nothing.
    pub fn find_by_prefix(&self, prefix: &str) -> Option<&str> {
        let mut matches = self
            .live_keys
            .keys()
            .filter(|identity| identity.starts_with(prefix));
        let first = matches.next()?;
        match matches.next() {
            Some(_) => None,
            None => Some(first.as_str()),
        }
    }

    /// All identities ever verified this process lifetime.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }
}
