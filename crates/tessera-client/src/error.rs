use thiserror::Error;

use tessera_proto::{IdentityError, ProtoError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Server rejected verification")]
    VerificationRejected,

    #[error("Not connected")]
    NotConnected,
}
