use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tracing::debug;

use crate::control::ControlState;
use crate::error::HubError;
use crate::protocol::{ServerMessage, SpaceRole};
use crate::registry::ConnectionRegistry;
use crate::spaces::{SessionManager, SpaceState};

/// Kinds of negotiation traffic the relay forwards. Payload contents are
/// opaque to the hub; only routing is decided here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    fn into_message(self, payload: Value, from: String) -> ServerMessage {
        match self {
            SignalKind::Offer => ServerMessage::Offer { payload, from },
            SignalKind::Answer => ServerMessage::Answer { payload, from },
            SignalKind::IceCandidate => ServerMessage::IceCandidate { payload, from },
        }
    }
}

/// Resolve the single session a sender's negotiation message is for. A
/// human talks to the space's robot; a robot talks to the granted
/// controller, or to the sole human occupant when nothing is granted.
/// Multiple humans with no grant is ambiguous and resolves to nobody:
/// delivery is per-session, never space-wide.
pub fn resolve_target(state: &SpaceState, sender: &str) -> Option<String> {
    let member = state.member(sender)?;
    match member.role {
        SpaceRole::Human => state.robot().map(|m| m.session_id.clone()),
        SpaceRole::Robot => match &state.control {
            ControlState::Granted { holder } => Some(holder.clone()),
            _ => {
                let mut humans = state.humans();
                match (humans.next(), humans.next()) {
                    (Some(only), None) => Some(only.session_id.clone()),
                    _ => None,
                }
            }
        },
    }
}

/// Stateless forwarding of negotiation envelopes between space members.
#[derive(Clone)]
pub struct SignalingRelay {
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionManager>,
}

impl SignalingRelay {
    pub fn new(registry: Arc<ConnectionRegistry>, sessions: Arc<SessionManager>) -> Self {
        Self { registry, sessions }
    }

    /// Forward a negotiation envelope to exactly one peer, attaching the
    /// sender's session id. An explicit target (echoed from the `from` of
    /// an earlier inbound leg) must be a member of the sender's space;
    /// otherwise the target is resolved by role. No eligible target is an
    /// error back to the sender, never a silent drop.
    pub async fn relay_signal(
        &self,
        sender: &str,
        kind: SignalKind,
        payload: Value,
        target: Option<String>,
    ) -> Result<(), HubError> {
        let space_id = self.registry.space_of(sender).ok_or(HubError::NotInSpace)?;
        let state_arc = self
            .sessions
            .space_state(&space_id)
            .ok_or(HubError::NotInSpace)?;
        let state = state_arc.lock().await;

        if state.member(sender).is_none() {
            return Err(HubError::NotInSpace);
        }

        let target_id = match target {
            Some(explicit) => {
                if state.member(&explicit).is_none() {
                    return Err(HubError::UnknownTarget);
                }
                explicit
            }
            None => resolve_target(&state, sender).ok_or(HubError::UnknownTarget)?,
        };

        debug!(
            "relaying {:?} in space {}: {} -> {}",
            kind, space_id, sender, target_id
        );
        self.registry
            .send(&target_id, kind.into_message(payload, sender.to_string()));
        counter!("portal_hub_signals_relayed_total", 1);
        Ok(())
    }
}
