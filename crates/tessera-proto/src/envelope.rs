use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Command;
use crate::error::ProtoError;
use crate::verify::{is_exempt, payload_hash};

/// One protocol message.
///
/// Immutable once sealed: the integrity hash covers the payload, so any
/// later mutation must go through a fresh envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Identity string or room name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Sender display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Re-stamped on every hop
    pub timestamp: String,

    #[serde(flatten)]
    pub command: Command,

    /// Sender identity string (`hash:nick`); empty before verification
    pub identity: String,

    /// BLAKE3 hex digest of the payload; absent for exempt commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Envelope {
    pub fn new(command: Command, identity: impl Into<String>) -> Self {
        Self {
            to: None,
            from: None,
            timestamp: now_timestamp(),
            command,
            identity: identity.into(),
            hash: None,
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Compute and attach the integrity hash (skipped for exempt commands)
    pub fn seal(mut self) -> Result<Self, ProtoError> {
        if !is_exempt(self.command.tag()) {
            self.hash = Some(payload_hash(&self.payload_value()?));
        }
        Ok(self)
    }

    /// The payload as a raw JSON value (for hashing)
    fn payload_value(&self) -> Result<Value, ProtoError> {
        let value = serde_json::to_value(&self.command)?;
        value
            .get("payload")
            .cloned()
            .ok_or_else(|| ProtoError::Envelope("command serialized without payload".into()))
    }

    /// Update the timestamp for the current hop
    pub fn restamp(&mut self) {
        self.timestamp = now_timestamp();
    }

    /// Milliseconds elapsed since the declared timestamp, if parseable
    pub fn age_ms(&self) -> Option<i64> {
        let declared = DateTime::parse_from_rfc2822(&self.timestamp).ok()?;
        Some((Utc::now() - declared.with_timezone(&Utc)).num_milliseconds())
    }

    /// Decode a raw value whose shape has already been verified
    pub fn from_value(value: Value) -> Result<Self, ProtoError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_text(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc2822()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{AudioClip, ChatMessage, Notice};
    use crate::verify::{verify_hash, VerifierRegistry};

    fn chat(text: &str) -> Envelope {
        Envelope::new(
            Command::ChatMessage(ChatMessage { text: text.into() }),
            "hash:alice",
        )
    }

    #[test]
    fn test_sealed_envelope_passes_hash_check() {
        let envelope = chat("hello").seal().unwrap();
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(verify_hash(&value));
    }

    #[test]
    fn test_unsealed_envelope_fails_hash_check() {
        let envelope = chat("hello");
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(!verify_hash(&value));
    }

    #[test]
    fn test_tampered_payload_fails_hash_check() {
        let envelope = chat("hello").seal().unwrap();
        let mut value = serde_json::to_value(&envelope).unwrap();
        value["payload"]["text"] = "hellp".into();
        assert!(!verify_hash(&value));
    }

    #[test]
    fn test_audio_sealed_without_hash() {
        let envelope = Envelope::new(
            Command::Audio(AudioClip { blob: "AAAA".into() }),
            "hash:alice",
        )
        .seal()
        .unwrap();
        assert!(envelope.hash.is_none());
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(verify_hash(&value));
    }

    #[test]
    fn test_wire_roundtrip() {
        let envelope = chat("round and round")
            .with_to("#Cave")
            .with_from("alice")
            .seal()
            .unwrap();
        let text = envelope.to_text().unwrap();

        let value: Value = serde_json::from_str(&text).unwrap();
        let registry = VerifierRegistry::standard();
        assert!(registry.verify_shape(&value));
        assert!(verify_hash(&value));

        let restored = Envelope::from_value(value).unwrap();
        assert_eq!(restored.to.as_deref(), Some("#Cave"));
        assert_eq!(restored.identity, "hash:alice");
        match restored.command {
            Command::ChatMessage(ref payload) => assert_eq!(payload.text, "round and round"),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_age_of_fresh_envelope_is_small() {
        let envelope = Envelope::new(Command::Info(Notice::new("x")), "");
        let age = envelope.age_ms().unwrap();
        assert!((0..5_000).contains(&age));
    }

    #[test]
    fn test_age_of_unparseable_timestamp_is_none() {
        let mut envelope = Envelope::new(Command::Info(Notice::new("x")), "");
        envelope.timestamp = "yesterday-ish".into();
        assert!(envelope.age_ms().is_none());
    }
}
