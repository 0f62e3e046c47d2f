use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Role a member holds inside a space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpaceRole {
    Human,
    Robot,
}

/// Messages sent from client to the hub. Every frame on the wire is a
/// `{"type": ..., "data": {...}}` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a space as a human participant
    JoinSpace { space_id: String },
    /// Authenticate as a robot and join the space it is bound to
    RobotIdentify {
        robot_id: String,
        space_id: String,
        secret: String,
    },
    /// Session negotiation, relayed to a single resolved peer
    Offer {
        payload: Value,
        #[serde(default)]
        target: Option<String>,
    },
    Answer {
        payload: Value,
        #[serde(default)]
        target: Option<String>,
    },
    IceCandidate {
        payload: Value,
        #[serde(default)]
        target: Option<String>,
    },
    /// Ask for the controller lock of the space's robot
    ControlRequest {},
    /// Give the controller lock back (holder or robot)
    ControlRelease {},
    /// Operator command, relayed to the robot while control is held
    RemoteCommand { payload: Value },
    /// Heartbeat to keep the connection alive
    Ping {},
}

/// Messages sent from the hub to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection
    Connected { session_id: String },
    /// Acknowledge a successful join
    JoinedSpace {
        space_id: String,
        participants: Vec<ParticipantInfo>,
    },
    /// Membership change, broadcast to remaining occupants
    ParticipantJoined { session_id: String },
    ParticipantLeft { session_id: String },
    /// Relayed negotiation payloads, sender attached
    Offer { payload: Value, from: String },
    Answer { payload: Value, from: String },
    IceCandidate { payload: Value, from: String },
    /// Control-state change, broadcast to the whole space
    ControlGranted { holder_session_id: String },
    ControlReleased { holder_session_id: String },
    /// Relayed operator command
    RemoteCommand { payload: Value, from: String },
    /// Heartbeat response
    Pong {},
    /// Request-scoped failure
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub session_id: String,
    pub role: SpaceRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_id: Option<String>,
    pub joined_at: i64,
}

/// Generate a unique session ID
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_type_and_data_keys() {
        let msg = ClientMessage::JoinSpace {
            space_id: "lobby".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "join_space");
        assert_eq!(value["data"]["space_id"], "lobby");
    }

    #[test]
    fn negotiation_payloads_stay_opaque() {
        let text = r#"{"type":"offer","data":{"payload":{"sdp":"v=0...","type":"offer"}}}"#;
        let msg: ClientMessage = serde_json::from_str(text).unwrap();
        match msg {
            ClientMessage::Offer { payload, target } => {
                assert_eq!(payload["type"], "offer");
                assert!(target.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn session_id_generation_is_unique() {
        let id1 = generate_session_id();
        let id2 = generate_session_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36); // UUID v4 format
    }
}
