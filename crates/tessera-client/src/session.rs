//! The client half of the handshake state machine.
//!
//! `Anonymous → AwaitingChallenge → Verified` on the way in, and
//! `Verified → AwaitingDisconnectChallenge → Closed` on the way out. The
//! session never touches the socket: it consumes inbound envelopes and
//! returns the envelopes to send, so the transport stays at the edge.

use serde_json::Value;
use tracing::{debug, warn};

use tessera_proto::command::{
    ConnectionAttempt, DisconnectAttempt, DisconnectCommit, SubmitVerification,
};
use tessera_proto::{
    identity_string, verify, ClientKind, Command, Envelope, Keypair, VerifierRegistry,
};

use crate::error::ClientError;
use crate::state::ClientState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Anonymous,
    AwaitingChallenge,
    Verified,
    AwaitingDisconnectChallenge,
    Closed,
}

pub struct Session {
    keypair: Keypair,
    kind: ClientKind,
    nick: String,
    phase: Phase,
    verifiers: VerifierRegistry,
    pub state: ClientState,
}

impl Session {
    pub fn new(keypair: Keypair, kind: ClientKind, nick: impl Into<String>) -> Self {
        Self {
            keypair,
            kind,
            nick: nick.into(),
            phase: Phase::Anonymous,
            verifiers: VerifierRegistry::standard(),
            state: ClientState::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The identity string we will hold once verified.
    pub fn identity(&self) -> Result<String, ClientError> {
        let material = self.keypair.public_key_material(self.kind)?;
        Ok(identity_string(&material, &self.nick))
    }

    /// The send primitive: stamp, identify and hash an outbound command.
    pub fn seal(&self, command: Command) -> Result<Envelope, ClientError> {
        let identity = self.state.my_identity.clone().unwrap_or_default();
        Ok(Envelope::new(command, identity).seal()?)
    }

    /// Opening message of the handshake.
    pub fn connection_attempt(&mut self) -> Result<Envelope, ClientError> {
        let material = self.keypair.public_key_material(self.kind)?;
        self.phase = Phase::AwaitingChallenge;
        self.seal(Command::ConnectionAttempt(ConnectionAttempt {
            public_key: material,
            nick: self.nick.clone(),
            is_browser_client: self.kind == ClientKind::Browser,
        }))
    }

    /// A chat line for a room (leading '#') or a peer identity.
    pub fn chat(&self, to: &str, text: &str) -> Result<Envelope, ClientError> {
        if self.phase != Phase::Verified {
            return Err(ClientError::NotConnected);
        }
        let envelope = Envelope::new(
            Command::ChatMessage(tessera_proto::command::ChatMessage { text: text.into() }),
            self.state.my_identity.clone().unwrap_or_default(),
        )
        .with_to(to)
        .with_from(self.nick.clone());
        Ok(envelope.seal()?)
    }

    /// An unaddressed chat line, delivered to everyone.
    pub fn chat_all(&self, text: &str) -> Result<Envelope, ClientError> {
        if self.phase != Phase::Verified {
            return Err(ClientError::NotConnected);
        }
        let envelope = Envelope::new(
            Command::ChatMessage(tessera_proto::command::ChatMessage { text: text.into() }),
            self.state.my_identity.clone().unwrap_or_default(),
        )
        .with_from(self.nick.clone());
        Ok(envelope.seal()?)
    }

    /// Begin the graceful teardown handshake.
    pub fn disconnect_attempt(
        &mut self,
        explicit: bool,
        channels: Vec<String>,
    ) -> Result<Envelope, ClientError> {
        let Some(identity) = self.state.my_identity.clone() else {
            return Err(ClientError::NotConnected);
        };
        self.phase = Phase::AwaitingDisconnectChallenge;
        self.seal(Command::DisconnectAttempt(DisconnectAttempt {
            identity,
            explicit,
            channels,
        }))
    }

    /// Validate a raw frame through the shape and integrity checks.
    pub fn decode_frame(&self, text: &str) -> Option<Envelope> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Inbound frame is not JSON");
                return None;
            }
        };
        if !self.verifiers.verify_shape(&value) {
            debug!("Malformed inbound envelope, dropping");
            return None;
        }
        if !verify::verify_hash(&value) {
            warn!("Inbound integrity hash mismatch, dropping");
            return None;
        }
        Envelope::from_value(value).ok()
    }

    /// React to an inbound envelope: advance the handshake, update local
    /// knowledge, and return any envelopes to send back.
    pub fn handle_envelope(&mut self, envelope: &Envelope) -> Result<Vec<Envelope>, ClientError> {
        match &envelope.command {
            Command::PromptVerification(challenge) => {
                if self.phase != Phase::AwaitingChallenge {
                    debug!("Unexpected verification prompt, ignoring");
                    return Ok(Vec::new());
                }
                let signature = self.keypair.sign(challenge.verification_data.as_bytes());
                let reply = self.seal(Command::SubmitVerification(SubmitVerification {
                    signature,
                    browser: self.kind == ClientKind::Browser,
                }))?;
                Ok(vec![reply])
            }

            Command::FailedVerification(_) => {
                self.phase = Phase::Closed;
                Err(ClientError::VerificationRejected)
            }

            Command::MyIdentity(payload) => {
                self.state.my_identity = Some(payload.identity.clone());
                self.phase = Phase::Verified;
                Ok(Vec::new())
            }

            Command::DisconnectVerification(challenge) => {
                if self.phase != Phase::AwaitingDisconnectChallenge {
                    debug!("Unexpected disconnect challenge, ignoring");
                    return Ok(Vec::new());
                }
                let signature = self.keypair.sign(challenge.verification_data.as_bytes());
                let reply = self.seal(Command::DisconnectCommit(DisconnectCommit { signature }))?;
                Ok(vec![reply])
            }

            Command::BrowserDisconnect(_) => {
                self.phase = Phase::Closed;
                Ok(Vec::new())
            }

            // bootstrap and incremental knowledge
            Command::AllWorlds(payload) => {
                self.state.worlds = payload.worlds.clone();
                if self.state.occupancy.len() != self.state.worlds.len() {
                    self.state.occupancy = vec![0; self.state.worlds.len()];
                }
                if self.state.bot_counts.len() != self.state.worlds.len() {
                    self.state.bot_counts = vec![0; self.state.worlds.len()];
                }
                Ok(Vec::new())
            }
            Command::AllPrivateWorlds(payload) => {
                self.state.private_worlds = payload.worlds.clone();
                Ok(Vec::new())
            }
            Command::WorldSize(payload) => {
                self.state.occupancy = payload.worlds.clone();
                Ok(Vec::new())
            }
            Command::AllBotSizes(payload) => {
                self.state.bot_counts = payload.bots.clone();
                Ok(Vec::new())
            }
            Command::WorldSizeUpdate(payload) => {
                self.state.apply_occupancy(&payload.world, payload.action);
                Ok(Vec::new())
            }
            Command::LobbyLogic(payload) => {
                self.state.lobby_layout = payload.logic.clone();
                Ok(Vec::new())
            }
            Command::JoinWorld(payload) => {
                self.state
                    .enter_world(&payload.world_name, payload.world_logic.clone());
                Ok(Vec::new())
            }
            Command::UpdatePosition(payload) => {
                self.state.update_position(
                    &payload.identity,
                    tessera_proto::command::Coordinates {
                        x: payload.x,
                        y: payload.y,
                        skin: payload.skin.clone(),
                    },
                );
                Ok(Vec::new())
            }
            Command::UpdateSkin(payload) => {
                if let Some(position) = self.state.positions.get_mut(&payload.identity) {
                    position.skin = payload.skin.clone();
                }
                Ok(Vec::new())
            }
            Command::DeleteClient(payload) => {
                self.state.remove_actor(&payload.identity);
                Ok(Vec::new())
            }
            Command::UpdateWorldTiles(payload) => {
                self.state.apply_tiles(&payload.updated_tiles);
                Ok(Vec::new())
            }

            // notices and chat are the front end's business
            _ => Ok(Vec::new()),
        }
    }
}
