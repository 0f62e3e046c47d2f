use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::protocol::{ClientMessage, ServerMessage};

#[derive(Parser, Debug)]
#[command(name = "portal-hub")]
#[command(about = "Portal Hub signaling server and probe client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running hub as a client and watch a space
    Probe {
        /// Hub URL (e.g., ws://localhost:5080)
        #[arg(short, long, default_value = "ws://localhost:5080")]
        url: String,

        /// Space to join
        #[arg(short, long)]
        space: String,

        /// Identify as this robot instead of joining as a human
        #[arg(long)]
        robot_id: Option<String>,

        /// File holding the robot secret (requires --robot-id)
        #[arg(long)]
        secret_file: Option<PathBuf>,

        /// Fire a control_request once joined
        #[arg(long)]
        request_control: bool,

        /// How long to keep watching before closing, in seconds
        #[arg(long, default_value_t = 30)]
        watch_secs: u64,
    },
}

/// Join a space on a live hub and print every envelope that arrives.
/// Answers the heartbeat so the probe is not reaped mid-watch.
pub async fn run_probe(
    url: String,
    space: String,
    robot_id: Option<String>,
    secret_file: Option<PathBuf>,
    request_control: bool,
    watch_secs: u64,
) -> Result<()> {
    let ws_url = format!("{}/ws", url.trim_end_matches('/'));
    debug!("connecting to {}", ws_url);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => return Err(anyhow::anyhow!("connection failed: {}", e)),
        Err(_) => {
            return Err(anyhow::anyhow!(
                "connection timeout - is the hub running at {}?",
                url
            ))
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let join_msg = match (&robot_id, &secret_file) {
        (Some(robot_id), Some(path)) => {
            let secret = std::fs::read_to_string(path)?.trim().to_string();
            ClientMessage::RobotIdentify {
                robot_id: robot_id.clone(),
                space_id: space.clone(),
                secret,
            }
        }
        (Some(_), None) => return Err(anyhow::anyhow!("--robot-id requires --secret-file")),
        _ => ClientMessage::JoinSpace {
            space_id: space.clone(),
        },
    };
    write
        .send(Message::Text(serde_json::to_string(&join_msg)?.into()))
        .await?;

    let mut heartbeat = interval(Duration::from_secs(10));
    let deadline = tokio::time::sleep(Duration::from_secs(watch_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = heartbeat.tick() => {
                write
                    .send(Message::Text(serde_json::to_string(&ClientMessage::Ping {})?.into()))
                    .await?;
            }
            frame = read.next() => {
                let Some(frame) = frame else { break };
                match frame? {
                    Message::Text(text) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(ServerMessage::Pong {}) => debug!("pong"),
                        Ok(ServerMessage::Error { ref message }) => {
                            eprintln!("error: {}", message);
                        }
                        Ok(msg) => {
                            println!("{}", serde_json::to_string(&msg)?);
                            if request_control
                                && matches!(msg, ServerMessage::JoinedSpace { .. })
                            {
                                write
                                    .send(Message::Text(
                                        serde_json::to_string(&ClientMessage::ControlRequest {})?.into(),
                                    ))
                                    .await?;
                            }
                        }
                        Err(e) => debug!("unparseable frame: {}", e),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    write.send(Message::Close(None)).await?;
    Ok(())
}
