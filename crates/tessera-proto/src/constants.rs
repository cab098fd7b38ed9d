/// Protocol version tag sent in the connection attempt
pub const PROTOCOL_VERSION: &str = "tessera/1";

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Challenge nonce size in bytes (hex-encoded on the wire)
pub const CHALLENGE_SIZE: usize = 32;

/// A connection attempt older than this is treated as a replay and refused
pub const STALENESS_WINDOW_MS: i64 = 300_000;

/// Default history ring size for user-created channels
pub const DEFAULT_HISTORY_LIMIT: usize = 5;

/// History ring size for the per-identity personal channel
pub const PERSONAL_CHANNEL_HISTORY: usize = 50;

/// Reserved prefix character for room names
pub const ROOM_PREFIX: char = '#';

/// Default WebSocket listen port (server)
pub const DEFAULT_WS_PORT: u16 = 8080;
