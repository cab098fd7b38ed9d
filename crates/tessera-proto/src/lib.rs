// Wire protocol shared by the Tessera server and clients.

pub mod command;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod verify;

pub use command::Command;
pub use envelope::Envelope;
pub use error::{IdentityError, ProtoError};
pub use identity::{identity_string, split_identity, ClientKind, Keypair};
pub use verify::{payload_hash, VerifierRegistry};
