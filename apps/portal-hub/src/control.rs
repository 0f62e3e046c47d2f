use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::HubError;
use crate::protocol::{now_timestamp, ServerMessage, SpaceRole};
use crate::registry::ConnectionRegistry;
use crate::spaces::{broadcast, SessionManager, SpaceState};

/// Per-space control session. At most one session holds `Granted` at any
/// instant; every transition happens under the owning space's mutex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ControlState {
    #[default]
    Idle,
    RequestPending {
        requester: String,
        requested_at: i64,
    },
    Granted {
        holder: String,
    },
}

/// External approval step consulted before a grant: audio-presence plus
/// face-presence on the robot side. Black box; may deny or never resolve,
/// so callers put a ceiling on the wait.
#[async_trait]
pub trait ControlGate: Send + Sync {
    async fn approve(&self, space_id: &str, requester: &str) -> bool;
}

/// The presence validator currently always approves. The boundary stays a
/// genuine async one regardless: denial and timeout are first-class paths.
pub struct PresenceGate;

#[async_trait]
impl ControlGate for PresenceGate {
    async fn approve(&self, _space_id: &str, _requester: &str) -> bool {
        true
    }
}

/// What a departing session did to the control state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepartureOutcome {
    None,
    ReleasedGrant { holder: String },
    CancelledPending { requester: String },
}

/// Reset control when the holder, the pending requester, or the robot
/// leaves the space. Called under the space lock by leave-processing; this
/// is the only reclamation path when an operator vanishes without an
/// explicit release.
pub fn release_on_departure(state: &mut SpaceState, leaver: &str) -> DepartureOutcome {
    let leaver_is_robot = state
        .member(leaver)
        .map(|m| m.role == SpaceRole::Robot)
        .unwrap_or(false);

    match &state.control {
        ControlState::Granted { holder } if holder == leaver || leaver_is_robot => {
            let holder = holder.clone();
            state.control = ControlState::Idle;
            DepartureOutcome::ReleasedGrant { holder }
        }
        ControlState::RequestPending { requester, .. }
            if requester == leaver || leaver_is_robot =>
        {
            let requester = requester.clone();
            state.control = ControlState::Idle;
            DepartureOutcome::CancelledPending { requester }
        }
        _ => DepartureOutcome::None,
    }
}

/// Owns the request/grant/release workflow on top of the session manager's
/// per-space locks.
pub struct ControlCoordinator {
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionManager>,
    gate: Arc<dyn ControlGate>,
    gate_timeout: Duration,
}

impl ControlCoordinator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sessions: Arc<SessionManager>,
        gate: Arc<dyn ControlGate>,
        gate_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sessions,
            gate,
            gate_timeout,
        }
    }

    /// Idle -> RequestPending -> Granted (or back to Idle on denial,
    /// timeout, or mid-flight cancellation). The gate-check await happens
    /// with the space lock released; on resolution the request must still
    /// be pending for the same requester, so a stale approval can never
    /// grant control to a departed session.
    pub async fn request_control(&self, requester: &str) -> Result<(), HubError> {
        let space_id = self
            .registry
            .space_of(requester)
            .ok_or(HubError::NotInSpace)?;
        let state_arc = self
            .sessions
            .space_state(&space_id)
            .ok_or(HubError::NotInSpace)?;

        {
            let mut state = state_arc.lock().await;
            let member = state.member(requester).ok_or(HubError::NotInSpace)?;
            if member.role != SpaceRole::Human {
                return Err(HubError::NotController);
            }
            if state.control != ControlState::Idle {
                return Err(HubError::AlreadyControlled);
            }
            if state.robot().is_none() {
                return Err(HubError::NoRobotPresent);
            }
            state.control = ControlState::RequestPending {
                requester: requester.to_string(),
                requested_at: now_timestamp(),
            };
        }

        info!("session {} requested control of space {}", requester, space_id);
        let verdict = timeout(
            self.gate_timeout,
            self.gate.approve(&space_id, requester),
        )
        .await;

        let mut state = state_arc.lock().await;
        let still_pending = matches!(
            &state.control,
            ControlState::RequestPending { requester: r, .. } if r == requester
        );
        if !still_pending {
            // Cancelled while the gate was deciding (requester or robot
            // left); nothing to grant, nothing to report.
            return Ok(());
        }

        match verdict {
            Ok(true) => {
                state.control = ControlState::Granted {
                    holder: requester.to_string(),
                };
                broadcast(
                    &self.registry,
                    &state,
                    None,
                    &ServerMessage::ControlGranted {
                        holder_session_id: requester.to_string(),
                    },
                );
                counter!("portal_hub_control_grants_total", 1);
                info!("control of space {} granted to {}", space_id, requester);
                Ok(())
            }
            Ok(false) => {
                state.control = ControlState::Idle;
                info!("control of space {} denied to {}", space_id, requester);
                Err(HubError::ControlDenied)
            }
            Err(_) => {
                state.control = ControlState::Idle;
                warn!(
                    "gate check for space {} timed out after {:?}",
                    space_id, self.gate_timeout
                );
                Err(HubError::Timeout)
            }
        }
    }

    /// Release a grant (holder or robot) or cancel one's own pending
    /// request. A cancelled pending request is not broadcast: nothing was
    /// ever granted.
    pub async fn release_control(&self, sender: &str) -> Result<(), HubError> {
        let space_id = self.registry.space_of(sender).ok_or(HubError::NotInSpace)?;
        let state_arc = self
            .sessions
            .space_state(&space_id)
            .ok_or(HubError::NotInSpace)?;
        let mut state = state_arc.lock().await;

        let sender_is_robot = state
            .member(sender)
            .map(|m| m.role == SpaceRole::Robot)
            .unwrap_or(false);

        match &state.control {
            ControlState::Granted { holder } if holder == sender || sender_is_robot => {
                let holder = holder.clone();
                state.control = ControlState::Idle;
                broadcast(
                    &self.registry,
                    &state,
                    None,
                    &ServerMessage::ControlReleased {
                        holder_session_id: holder.clone(),
                    },
                );
                info!("control of space {} released from {}", space_id, holder);
                Ok(())
            }
            ControlState::RequestPending { requester, .. } if requester == sender => {
                state.control = ControlState::Idle;
                Ok(())
            }
            _ => Err(HubError::NotController),
        }
    }

    /// Operator commands pass through only while control is granted and the
    /// sender is the holder; anything else is rejected, not silently eaten.
    pub async fn relay_command(&self, sender: &str, payload: Value) -> Result<(), HubError> {
        let space_id = self.registry.space_of(sender).ok_or(HubError::NotInSpace)?;
        let state_arc = self
            .sessions
            .space_state(&space_id)
            .ok_or(HubError::NotInSpace)?;
        let state = state_arc.lock().await;

        match &state.control {
            ControlState::Granted { holder } if holder == sender => {
                let robot = state.robot().ok_or(HubError::NoRobotPresent)?;
                self.registry.send(
                    &robot.session_id,
                    ServerMessage::RemoteCommand {
                        payload,
                        from: sender.to_string(),
                    },
                );
                Ok(())
            }
            _ => Err(HubError::NotController),
        }
    }
}
