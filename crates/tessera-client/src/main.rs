//! Headless client binary.
//!
//! Connects, runs the challenge handshake, then bridges stdin lines into
//! chat: `#room text` goes to that room, anything else to everyone.
//! Ctrl+C (or EOF) starts the graceful disconnect handshake.

use anyhow::Context;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tessera_client::{ClientConfig, ClientError, Phase, Session};
use tessera_proto::{ClientKind, Command, Envelope, Keypair};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::parse();

    let keypair = match &config.key_file {
        Some(path) if path.exists() => Keypair::load(path).context("loading key file")?,
        Some(path) => {
            let keypair = Keypair::generate();
            keypair.save(path).context("saving key file")?;
            info!(path = %path.display(), "Generated new identity key");
            keypair
        }
        None => Keypair::generate(),
    };
    let kind = if config.browser {
        ClientKind::Browser
    } else {
        ClientKind::Headless
    };
    let mut session = Session::new(keypair, kind, config.nick.clone());

    info!(url = %config.server_url, nick = %config.nick, "Connecting");
    let (ws_stream, _response) = connect_async(config.server_url.as_str())
        .await
        .map_err(|e| ClientError::Connection(e.to_string()))?;
    let (mut sink, mut stream) = ws_stream.split();

    let attempt = session.connection_attempt()?;
    sink.send(Message::Text(attempt.to_text()?)).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(frame) = frame else { break };
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        warn!(error = %e, "Socket error");
                        break;
                    }
                    Ok(_) => continue,
                };
                let Some(envelope) = session.decode_frame(&text) else {
                    continue;
                };
                render(&envelope);
                match session.handle_envelope(&envelope) {
                    Ok(replies) => {
                        for reply in replies {
                            sink.send(Message::Text(reply.to_text()?)).await?;
                        }
                    }
                    Err(ClientError::VerificationRejected) => {
                        anyhow::bail!("server rejected verification");
                    }
                    Err(e) => warn!(error = %e, "Failed to handle envelope"),
                }
                if session.phase() == Phase::Closed {
                    break;
                }
            }

            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let envelope = match line.split_once(' ') {
                            Some((to, text)) if to.starts_with('#') => session.chat(to, text),
                            _ => session.chat_all(line),
                        };
                        match envelope {
                            Ok(envelope) => sink.send(Message::Text(envelope.to_text()?)).await?,
                            Err(e) => warn!(error = %e, "Cannot send yet"),
                        }
                    }
                    None => {
                        stdin_open = false;
                        if let Ok(attempt) = session.disconnect_attempt(false, Vec::new()) {
                            sink.send(Message::Text(attempt.to_text()?)).await?;
                        } else {
                            break;
                        }
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Disconnecting");
                match session.disconnect_attempt(false, Vec::new()) {
                    Ok(attempt) => sink.send(Message::Text(attempt.to_text()?)).await?,
                    Err(_) => break,
                }
            }
        }
    }

    Ok(())
}

fn render(envelope: &Envelope) {
    match &envelope.command {
        Command::ChatMessage(payload) => {
            println!("[{}] {}", envelope.from.as_deref().unwrap_or("?"), payload.text);
        }
        Command::Error(notice) => eprintln!("error: {}", notice.msg),
        Command::Info(notice) => println!("info: {}", notice.msg),
        Command::Success(notice) => println!("ok: {}", notice.msg),
        Command::Connected(notice) => println!("connected: {}", notice.msg),
        _ => {}
    }
}
