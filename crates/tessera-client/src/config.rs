//! Client configuration from the command line.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "tessera-client", about = "Headless Tessera client")]
pub struct ClientConfig {
    /// WebSocket URL of the server
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    pub server_url: String,

    /// Display name to claim
    #[arg(long)]
    pub nick: String,

    /// Path to a hex-encoded Ed25519 secret key; generated (and saved
    /// there) when the file does not exist yet
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Present the public key the way a browser client would (SPKI DER)
    #[arg(long)]
    pub browser: bool,
}
