use thiserror::Error;

/// Failures surfaced to the requesting socket as explicit `Error` notices.
/// None of these mutate shared state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("There is already a channel named {0}! You can join this channel yourself.")]
    NameTaken(String),

    #[error("The name {0} is not allowed for a channel")]
    InvalidName(String),

    #[error("The channel {0} does not exist! You can make this channel yourself.")]
    NoSuchRoom(String),

    #[error("You are already joined to the channel {0}")]
    AlreadyMember(String),

    #[error("No access to the channel {0}: wrong password")]
    WrongPassword(String),

    #[error("No access to the channel {0}: wrong password, or no password given! Use --password= next time!")]
    PasswordRequired(String),

    #[error("You are not joined to the channel {0}")]
    NotAMember(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Admission refused: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Protocol error: {0}")]
    Proto(#[from] tessera_proto::ProtoError),

    #[error("Transport error: {0}")]
    Transport(String),
}
