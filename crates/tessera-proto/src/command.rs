use serde::{Deserialize, Serialize};

/// All protocol commands with their payloads.
///
/// The `command` tag selects the payload type on the wire; adding a message
/// kind means adding a variant here and registering its verifier in
/// [`crate::verify::VerifierRegistry::standard`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload")]
pub enum Command {
    // Point-to-point notices
    Error(Notice),
    Info(Notice),
    Success(Notice),
    Connected(Notice),

    // Authentication handshake
    ConnectionAttempt(ConnectionAttempt),
    PromptVerification(VerificationChallenge),
    SubmitVerification(SubmitVerification),
    FailedVerification(Empty),
    MyIdentity(MyIdentity),

    // Graceful disconnect handshake
    DisconnectAttempt(DisconnectAttempt),
    DisconnectVerification(VerificationChallenge),
    DisconnectCommit(DisconnectCommit),
    BrowserDisconnect(Empty),

    // Public key directory
    RequestPublicKey(RequestPublicKey),
    GivePublicKey(GivePublicKey),

    // Chat
    ChatMessage(ChatMessage),
    Audio(AudioClip),
    ChannelCreate(ChannelCreate),
    ChannelJoin(ChannelJoin),
    ChannelLeave(ChannelLeave),
    RequestAllChannels(Empty),
    PrintChannel(PrintChannel),

    // Worlds
    JoinWorld(JoinWorld),
    AllWorlds(WorldList),
    AllPrivateWorlds(WorldList),
    WorldSize(WorldSizes),
    WorldSizeUpdate(WorldSizeUpdate),
    AllBotSizes(BotSizes),
    LobbyLogic(LobbyLogic),
    UpdateWorldTiles(UpdateWorldTiles),
    TryPassword(TryPassword),
    SuccessPassword(Empty),
    FailPassword(Empty),
    SetAdmin(SetAdmin),
    UpdateAdmin(UpdateAdmin),

    // Presence
    UpdatePosition(UpdatePosition),
    UpdateSkin(UpdateSkin),
    DeleteClient(DeleteClient),

    // Scores
    UpdateScore(UpdateScore),
    RequestLeaderboard(RequestLeaderboard),
    Leaderboard(Leaderboard),

    // Mini-games; the payloads are defined here, the rules live in the
    // registered managers
    TicTacToe(TicTacToeMove),
    CaptureTheFlag(CtfMessage),
}

impl Command {
    /// The wire tag of this command
    pub fn tag(&self) -> &'static str {
        match self {
            Command::Error(_) => "Error",
            Command::Info(_) => "Info",
            Command::Success(_) => "Success",
            Command::Connected(_) => "Connected",
            Command::ConnectionAttempt(_) => "ConnectionAttempt",
            Command::PromptVerification(_) => "PromptVerification",
            Command::SubmitVerification(_) => "SubmitVerification",
            Command::FailedVerification(_) => "FailedVerification",
            Command::MyIdentity(_) => "MyIdentity",
            Command::DisconnectAttempt(_) => "DisconnectAttempt",
            Command::DisconnectVerification(_) => "DisconnectVerification",
            Command::DisconnectCommit(_) => "DisconnectCommit",
            Command::BrowserDisconnect(_) => "BrowserDisconnect",
            Command::RequestPublicKey(_) => "RequestPublicKey",
            Command::GivePublicKey(_) => "GivePublicKey",
            Command::ChatMessage(_) => "ChatMessage",
            Command::Audio(_) => "Audio",
            Command::ChannelCreate(_) => "ChannelCreate",
            Command::ChannelJoin(_) => "ChannelJoin",
            Command::ChannelLeave(_) => "ChannelLeave",
            Command::RequestAllChannels(_) => "RequestAllChannels",
            Command::PrintChannel(_) => "PrintChannel",
            Command::JoinWorld(_) => "JoinWorld",
            Command::AllWorlds(_) => "AllWorlds",
            Command::AllPrivateWorlds(_) => "AllPrivateWorlds",
            Command::WorldSize(_) => "WorldSize",
            Command::WorldSizeUpdate(_) => "WorldSizeUpdate",
            Command::AllBotSizes(_) => "AllBotSizes",
            Command::LobbyLogic(_) => "LobbyLogic",
            Command::UpdateWorldTiles(_) => "UpdateWorldTiles",
            Command::TryPassword(_) => "TryPassword",
            Command::SuccessPassword(_) => "SuccessPassword",
            Command::FailPassword(_) => "FailPassword",
            Command::SetAdmin(_) => "SetAdmin",
            Command::UpdateAdmin(_) => "UpdateAdmin",
            Command::UpdatePosition(_) => "UpdatePosition",
            Command::UpdateSkin(_) => "UpdateSkin",
            Command::DeleteClient(_) => "DeleteClient",
            Command::UpdateScore(_) => "UpdateScore",
            Command::RequestLeaderboard(_) => "RequestLeaderboard",
            Command::Leaderboard(_) => "Leaderboard",
            Command::TicTacToe(_) => "TicTacToe",
            Command::CaptureTheFlag(_) => "CaptureTheFlag",
        }
    }
}

/// Shared empty payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub msg: String,
}

impl Notice {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

/// Opening move of the handshake: the claimed key, display name and client
/// kind. The declared envelope timestamp is checked against the staleness
/// window before a challenge is issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionAttempt {
    pub public_key: String,
    pub nick: String,
    pub is_browser_client: bool,
}

/// Single-use nonce the claimant must sign (connect and disconnect paths)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationChallenge {
    pub verification_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitVerification {
    /// Base64 signature over the challenge nonce
    pub signature: String,
    pub browser: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyIdentity {
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectAttempt {
    pub identity: String,
    /// When set, the server emits leave events for every listed room
    pub explicit: bool,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectCommit {
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPublicKey {
    pub identity_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GivePublicKey {
    pub identity: String,
    pub public_key: String,
    pub nick: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
}

/// Recorded audio relayed as an opaque base64 blob; exempt from payload
/// hashing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioClip {
    pub blob: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCreate {
    pub channel: String,
    pub password: Option<String>,
    pub history: Option<usize>,
    pub external_messages: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelJoin {
    pub channel: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLeave {
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintChannel {
    pub channel: String,
}

/// A tile grid, row-major
pub type Grid = Vec<Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: i32,
    pub y: i32,
    pub skin: String,
}

/// Enter a world, switch worlds, or (with an empty name) return to the
/// lobby. The server echoes this back with the world grid filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinWorld {
    pub world_name: String,
    pub world_logic: Option<Grid>,
    pub coordinates: Option<Coordinates>,
    pub is_bot: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldList {
    pub worlds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSizes {
    pub worlds: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyAction {
    JoinedClient,
    LeftClient,
    JoinedBot,
    LeftBot,
}

/// Member-count delta for one room, broadcast to the lobby
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSizeUpdate {
    pub world: String,
    pub action: OccupancyAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSizes {
    pub bots: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyLogic {
    pub logic: Grid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileUpdate {
    pub x: usize,
    pub y: usize,
    pub tile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateWorldTiles {
    pub updated_tiles: Vec<TileUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryPassword {
    pub world_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAdmin {
    pub world_name: String,
    pub password: String,
}

/// Announces the current world admin to room members; an empty identity
/// means the admin seat is vacant again
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAdmin {
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePosition {
    pub identity: String,
    pub x: i32,
    pub y: i32,
    pub direction: String,
    pub skin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSkin {
    pub identity: String,
    pub skin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteClient {
    pub identity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    Rps,
    TicTacToe,
    CaptureTheFlag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateScore {
    pub identity: String,
    pub game: GameKind,
    pub win: bool,
}

/// Read-only leaderboard request; exempt from payload hashing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLeaderboard {
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub identity: String,
    /// Scores per game: rock-paper-scissors, tic-tac-toe, capture-the-flag
    pub scores: [u32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicTacToeMove {
    pub action: String,
    pub from: String,
    pub to: Option<String>,
    pub pos: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPos {
    pub row: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtfMessage {
    pub action: String,
    pub world: String,
    pub text: Option<String>,
    pub pos: Option<GridPos>,
}
