// Tessera server: authentication, rooms and broadcast over one WebSocket
// endpoint. All mutable state lives on a single coordinator task; socket
// tasks and background loops talk to it through typed events.

pub mod auth;
pub mod channels;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod games;
pub mod presence;
pub mod registry;
pub mod room;
pub mod rooms;
pub mod scheduler;
pub mod scores;
pub mod state;
#[cfg(test)]
pub(crate) mod testutil;
pub mod worlds;
pub mod ws;

pub use config::ServerConfig;
pub use coordinator::{ChatServer, ServerEvent, TickEvent};
pub use dispatch::Dispatcher;
pub use error::{AdmissionError, ServerError};
pub use registry::{IdentityRegistry, SocketId};
pub use state::ServerState;
