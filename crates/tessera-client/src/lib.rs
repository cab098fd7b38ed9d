// Headless Tessera client: the mirrored handshake state machine plus the
// local knowledge a front end renders from.

pub mod config;
pub mod error;
pub mod session;
pub mod state;

pub use config::ClientConfig;
pub use error::ClientError;
pub use session::{Phase, Session};
pub use state::ClientState;
