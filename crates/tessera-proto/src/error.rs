use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Envelope error: {0}")]
    Envelope(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid key encoding: {0}")]
    BadEncoding(String),

    #[error("Key file error: {0}")]
    KeyFile(String),
}
