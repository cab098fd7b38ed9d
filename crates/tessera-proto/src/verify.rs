//! Payload shape verification and integrity hashing.
//!
//! The registry is the receiving side's first gate: a raw socket frame is
//! only accepted as an [`Envelope`](crate::Envelope) if it carries a known
//! command tag and its payload satisfies the predicate registered for that
//! tag. Verification has no side effects and never panics; malformed input
//! simply fails the predicate.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::command::{
    AudioClip, BotSizes, ChannelCreate, ChannelJoin, ChannelLeave, ChatMessage,
    ConnectionAttempt, CtfMessage, DeleteClient, DisconnectAttempt, DisconnectCommit, Empty,
    GivePublicKey, JoinWorld, Leaderboard, LobbyLogic, MyIdentity, Notice, PrintChannel,
    RequestLeaderboard, RequestPublicKey, SetAdmin, SubmitVerification, TicTacToeMove,
    TryPassword, UpdateAdmin, UpdatePosition, UpdateScore, UpdateSkin, UpdateWorldTiles,
    VerificationChallenge, WorldList, WorldSizeUpdate, WorldSizes,
};

/// Commands whose payload is never hash-verified: `Audio` carries an opaque
/// blob, `RequestLeaderboard` is a non-sensitive read-only request.
pub const EXEMPT_COMMANDS: [&str; 2] = ["Audio", "RequestLeaderboard"];

pub fn is_exempt(tag: &str) -> bool {
    EXEMPT_COMMANDS.contains(&tag)
}

/// A per-command payload predicate
pub type Verifier = fn(&Value) -> bool;

fn decodes_as<T: DeserializeOwned>(value: &Value) -> bool {
    serde_json::from_value::<T>(value.clone()).is_ok()
}

/// Command tag to payload predicate table, built once at startup.
pub struct VerifierRegistry {
    verifiers: HashMap<&'static str, Verifier>,
}

impl VerifierRegistry {
    pub fn empty() -> Self {
        Self {
            verifiers: HashMap::new(),
        }
    }

    /// The full verifier table for the standard command set
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("Error", decodes_as::<Notice>);
        registry.register("Info", decodes_as::<Notice>);
        registry.register("Success", decodes_as::<Notice>);
        registry.register("Connected", decodes_as::<Notice>);
        registry.register("ConnectionAttempt", decodes_as::<ConnectionAttempt>);
        registry.register("PromptVerification", decodes_as::<VerificationChallenge>);
        registry.register("SubmitVerification", decodes_as::<SubmitVerification>);
        registry.register("FailedVerification", decodes_as::<Empty>);
        registry.register("MyIdentity", decodes_as::<MyIdentity>);
        registry.register("DisconnectAttempt", decodes_as::<DisconnectAttempt>);
        registry.register("DisconnectVerification", decodes_as::<VerificationChallenge>);
        registry.register("DisconnectCommit", decodes_as::<DisconnectCommit>);
        registry.register("BrowserDisconnect", decodes_as::<Empty>);
        registry.register("RequestPublicKey", decodes_as::<RequestPublicKey>);
        registry.register("GivePublicKey", decodes_as::<GivePublicKey>);
        registry.register("ChatMessage", decodes_as::<ChatMessage>);
        registry.register("Audio", decodes_as::<AudioClip>);
        registry.register("ChannelCreate", decodes_as::<ChannelCreate>);
        registry.register("ChannelJoin", decodes_as::<ChannelJoin>);
        registry.register("ChannelLeave", decodes_as::<ChannelLeave>);
        registry.register("RequestAllChannels", decodes_as::<Empty>);
        registry.register("PrintChannel", decodes_as::<PrintChannel>);
        registry.register("JoinWorld", decodes_as::<JoinWorld>);
        registry.register("AllWorlds", decodes_as::<WorldList>);
        registry.register("AllPrivateWorlds", decodes_as::<WorldList>);
        registry.register("WorldSize", decodes_as::<WorldSizes>);
        registry.register("WorldSizeUpdate", decodes_as::<WorldSizeUpdate>);
        registry.register("AllBotSizes", decodes_as::<BotSizes>);
        registry.register("LobbyLogic", decodes_as::<LobbyLogic>);
        registry.register("UpdateWorldTiles", decodes_as::<UpdateWorldTiles>);
        registry.register("TryPassword", decodes_as::<TryPassword>);
        registry.register("SuccessPassword", decodes_as::<Empty>);
        registry.register("FailPassword", decodes_as::<Empty>);
        registry.register("SetAdmin", decodes_as::<SetAdmin>);
        registry.register("UpdateAdmin", decodes_as::<UpdateAdmin>);
        registry.register("UpdatePosition", decodes_as::<UpdatePosition>);
        registry.register("UpdateSkin", decodes_as::<UpdateSkin>);
        registry.register("DeleteClient", decodes_as::<DeleteClient>);
        registry.register("UpdateScore", decodes_as::<UpdateScore>);
        registry.register("RequestLeaderboard", decodes_as::<RequestLeaderboard>);
        registry.register("Leaderboard", decodes_as::<Leaderboard>);
        registry.register("TicTacToe", decodes_as::<TicTacToeMove>);
        registry.register("CaptureTheFlag", decodes_as::<CtfMessage>);
        registry
    }

    pub fn register(&mut self, tag: &'static str, verifier: Verifier) {
        self.verifiers.insert(tag, verifier);
    }

    /// Check a payload against the predicate for its command tag.
    /// Unknown tags fail.
    pub fn verify_payload(&self, tag: &str, payload: &Value) -> bool {
        match self.verifiers.get(tag) {
            Some(verifier) => verifier(payload),
            None => false,
        }
    }

    /// Accept a raw value as a well-formed envelope: it must carry a string
    /// command tag and a payload that the registered predicate accepts.
    pub fn verify_shape(&self, value: &Value) -> bool {
        let Some(tag) = value.get("command").and_then(Value::as_str) else {
            return false;
        };
        let Some(payload) = value.get("payload") else {
            return false;
        };
        self.verify_payload(tag, payload)
    }
}

impl Default for VerifierRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// BLAKE3 hex digest over the payload's JSON encoding.
///
/// `serde_json` serializes object keys in sorted order, so the encoding is
/// canonical: sender and receiver hash the same bytes regardless of the
/// field order on the wire.
pub fn payload_hash(payload: &Value) -> String {
    blake3::hash(payload.to_string().as_bytes())
        .to_hex()
        .to_string()
}

/// Recompute and compare the integrity hash of a raw envelope value.
///
/// Exempt commands always pass; everything else needs a present, matching
/// hash.
pub fn verify_hash(value: &Value) -> bool {
    let Some(tag) = value.get("command").and_then(Value::as_str) else {
        return false;
    };
    if is_exempt(tag) {
        return true;
    }
    let Some(payload) = value.get("payload") else {
        return false;
    };
    match value.get("hash").and_then(Value::as_str) {
        Some(hash) => payload_hash(payload) == hash,
        None => {
            debug!(command = tag, "Envelope carries no integrity hash");
            false
        }
    }
}
