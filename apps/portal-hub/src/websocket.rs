use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::authenticate;
use crate::catalog::SpaceCatalog;
use crate::control::ControlCoordinator;
use crate::error::HubError;
use crate::protocol::{ClientMessage, ServerMessage, SpaceRole};
use crate::registry::ConnectionRegistry;
use crate::relay::{SignalKind, SignalingRelay};
use crate::secrets::CredentialStore;
use crate::spaces::SessionManager;

/// Shared state handed to every transport and HTTP handler.
#[derive(Clone)]
pub struct HubState {
    pub registry: Arc<ConnectionRegistry>,
    pub catalog: Arc<SpaceCatalog>,
    pub credentials: Arc<CredentialStore>,
    pub sessions: Arc<SessionManager>,
    pub control: Arc<ControlCoordinator>,
    pub relay: SignalingRelay,
    pub metrics: PrometheusHandle,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<HubState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task per connection: register, greet, decode envelopes, dispatch,
/// and run the disconnect cascade when the socket goes away.
async fn handle_socket(socket: WebSocket, state: HubState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let session_id = state.registry.register(tx);

    // Forward queued envelopes onto the socket.
    let forward_id = session_id.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
        debug!("message sender task ended for session {}", forward_id);
    });

    state.registry.send(
        &session_id,
        ServerMessage::Connected {
            session_id: session_id.clone(),
        },
    );
    info!("client connected: {}", session_id);

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                error!("websocket error from session {}: {}", session_id, e);
                break;
            }
        };

        match frame {
            Message::Text(text) => handle_frame(&state, &session_id, &text).await,
            Message::Binary(data) => {
                // JSON arriving on binary frames, for clients that cannot
                // send text.
                match String::from_utf8(data) {
                    Ok(text) => handle_frame(&state, &session_id, &text).await,
                    Err(_) => debug!("ignoring non-UTF8 binary frame from {}", session_id),
                }
            }
            Message::Close(_) => {
                debug!("received close frame from session {}", session_id);
                break;
            }
            _ => {
                // Transport-level ping/pong; liveness uses envelope pings.
            }
        }
    }

    state.sessions.disconnect(&session_id).await;
    info!("client disconnected: {}", session_id);
}

async fn handle_frame(state: &HubState, session_id: &str, text: &str) {
    // Any inbound frame proves the connection is alive.
    state.registry.touch(session_id);
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => dispatch(state, session_id, message).await,
        Err(e) => {
            warn!("unparseable frame from session {}: {}", session_id, e);
            state.registry.send(
                session_id,
                ServerMessage::Error {
                    message: format!("invalid message format: {}", e),
                },
            );
        }
    }
}

/// Route one decoded envelope. Failures terminate only this request: the
/// sender gets an `error` envelope and the connection stays up.
async fn dispatch(state: &HubState, session_id: &str, message: ClientMessage) {
    let result = match message {
        ClientMessage::JoinSpace { space_id } => handle_join(state, session_id, space_id).await,
        ClientMessage::RobotIdentify {
            robot_id,
            space_id,
            secret,
        } => handle_robot_identify(state, session_id, robot_id, space_id, secret).await,
        ClientMessage::Offer { payload, target } => {
            state
                .relay
                .relay_signal(session_id, SignalKind::Offer, payload, target)
                .await
        }
        ClientMessage::Answer { payload, target } => {
            state
                .relay
                .relay_signal(session_id, SignalKind::Answer, payload, target)
                .await
        }
        ClientMessage::IceCandidate { payload, target } => {
            state
                .relay
                .relay_signal(session_id, SignalKind::IceCandidate, payload, target)
                .await
        }
        ClientMessage::ControlRequest {} => state.control.request_control(session_id).await,
        ClientMessage::ControlRelease {} => state.control.release_control(session_id).await,
        ClientMessage::RemoteCommand { payload } => {
            state.control.relay_command(session_id, payload).await
        }
        ClientMessage::Ping {} => {
            state.registry.touch(session_id);
            state.registry.send(session_id, ServerMessage::Pong {});
            Ok(())
        }
    };

    if let Err(err) = result {
        state.registry.send(
            session_id,
            ServerMessage::Error {
                message: err.to_string(),
            },
        );
    }
}

async fn handle_join(
    state: &HubState,
    session_id: &str,
    space_id: String,
) -> Result<(), HubError> {
    let participants = state
        .sessions
        .join(session_id, &space_id, SpaceRole::Human, None)
        .await?;
    state.registry.send(
        session_id,
        ServerMessage::JoinedSpace {
            space_id,
            participants,
        },
    );
    Ok(())
}

async fn handle_robot_identify(
    state: &HubState,
    session_id: &str,
    robot_id: String,
    space_id: String,
    secret: String,
) -> Result<(), HubError> {
    authenticate(
        &state.catalog,
        &state.credentials,
        &space_id,
        &robot_id,
        &secret,
    )?;

    let participants = state
        .sessions
        .join(session_id, &space_id, SpaceRole::Robot, Some(robot_id.clone()))
        .await?;
    info!("robot '{}' authenticated and joined space {}", robot_id, space_id);
    state.registry.send(
        session_id,
        ServerMessage::JoinedSpace {
            space_id,
            participants,
        },
    );
    Ok(())
}
