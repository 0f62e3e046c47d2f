use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::catalog::SpaceCatalog;
use crate::control::{release_on_departure, ControlState, DepartureOutcome};
use crate::error::HubError;
use crate::protocol::{now_timestamp, ParticipantInfo, ServerMessage, SpaceRole};
use crate::registry::{ClientRole, ConnectionRegistry};

/// Membership of one connection in one space.
#[derive(Debug, Clone)]
pub struct Member {
    pub session_id: String,
    pub role: SpaceRole,
    pub robot_id: Option<String>,
    pub joined_at: i64,
}

/// Runtime state of a space: membership plus the control session. Guarded
/// by one mutex per space so capacity checks, composition checks, and
/// control transitions never interleave.
#[derive(Debug, Default)]
pub struct SpaceState {
    pub members: Vec<Member>,
    pub control: ControlState,
}

impl SpaceState {
    pub fn member(&self, session_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.session_id == session_id)
    }

    pub fn robot(&self) -> Option<&Member> {
        self.members.iter().find(|m| m.role == SpaceRole::Robot)
    }

    pub fn humans(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.role == SpaceRole::Human)
    }

    pub fn participant_infos(&self) -> Vec<ParticipantInfo> {
        self.members
            .iter()
            .map(|m| ParticipantInfo {
                session_id: m.session_id.clone(),
                role: m.role,
                robot_id: m.robot_id.clone(),
                joined_at: m.joined_at,
            })
            .collect()
    }
}

/// Send to every member, optionally excluding one session. Delivery goes
/// through unbounded channels, so broadcasting while the space lock is held
/// is non-blocking and preserves transition order.
pub fn broadcast(
    registry: &ConnectionRegistry,
    state: &SpaceState,
    exclude: Option<&str>,
    message: &ServerMessage,
) {
    for member in &state.members {
        if Some(member.session_id.as_str()) != exclude {
            registry.send(&member.session_id, message.clone());
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SpaceStats {
    pub active_spaces: usize,
    pub total_participants: usize,
}

/// Join/leave and membership tracking. Holds the per-space serialization
/// point shared with the control coordinator. The map is keyed by catalog
/// id, so it never grows past the configured space count; empty spaces
/// just keep an idle state entry.
pub struct SessionManager {
    registry: Arc<ConnectionRegistry>,
    catalog: Arc<SpaceCatalog>,
    spaces: DashMap<String, Arc<Mutex<SpaceState>>>,
}

impl SessionManager {
    pub fn new(registry: Arc<ConnectionRegistry>, catalog: Arc<SpaceCatalog>) -> Self {
        Self {
            registry,
            catalog,
            spaces: DashMap::new(),
        }
    }

    /// The live state handle for a space, if any activity has touched it.
    pub fn space_state(&self, space_id: &str) -> Option<Arc<Mutex<SpaceState>>> {
        self.spaces.get(space_id).map(|entry| Arc::clone(&entry))
    }

    fn space_entry(&self, space_id: &str) -> Arc<Mutex<SpaceState>> {
        Arc::clone(
            &self
                .spaces
                .entry(space_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SpaceState::default()))),
        )
    }

    /// Add a connection to a space. Capacity, enablement, single-membership
    /// and one-robot composition are all checked under the space lock, so
    /// two racing joins cannot both squeeze into the last slot.
    pub async fn join(
        &self,
        session_id: &str,
        space_id: &str,
        role: SpaceRole,
        robot_id: Option<String>,
    ) -> Result<Vec<ParticipantInfo>, HubError> {
        let def = self
            .catalog
            .get(space_id)
            .ok_or_else(|| HubError::UnknownSpace(space_id.to_string()))?;
        if !def.enabled {
            return Err(HubError::SpaceDisabled(space_id.to_string()));
        }
        if self.registry.space_of(session_id).is_some() {
            return Err(HubError::AlreadyInSpace);
        }

        let state_arc = self.space_entry(space_id);
        let mut state = state_arc.lock().await;

        if state.members.len() >= def.capacity {
            return Err(HubError::SpaceFull(def.capacity));
        }
        if role == SpaceRole::Robot && state.robot().is_some() {
            return Err(HubError::RobotAlreadyPresent);
        }

        state.members.push(Member {
            session_id: session_id.to_string(),
            role,
            robot_id,
            joined_at: now_timestamp(),
        });
        self.registry.set_space(session_id, Some(space_id.to_string()));
        self.registry.set_role(
            session_id,
            match role {
                SpaceRole::Human => ClientRole::Human,
                SpaceRole::Robot => ClientRole::Robot,
            },
        );

        broadcast(
            &self.registry,
            &state,
            Some(session_id),
            &ServerMessage::ParticipantJoined {
                session_id: session_id.to_string(),
            },
        );

        counter!("portal_hub_joins_total", 1);
        info!("session {} joined space {} as {:?}", session_id, space_id, role);

        Ok(state.participant_infos())
    }

    /// Remove a connection from whatever space it is in. Idempotent: a
    /// session with no membership is a no-op. A leaving controller, pending
    /// requester, or robot forces the control transition first, under the
    /// same lock acquisition as the membership change.
    pub async fn leave(&self, session_id: &str) {
        let Some(space_id) = self.registry.space_of(session_id) else {
            return;
        };
        let Some(state_arc) = self.space_state(&space_id) else {
            self.registry.set_space(session_id, None);
            return;
        };

        let mut state = state_arc.lock().await;
        match release_on_departure(&mut state, session_id) {
            DepartureOutcome::ReleasedGrant { holder } => {
                broadcast(
                    &self.registry,
                    &state,
                    Some(session_id),
                    &ServerMessage::ControlReleased {
                        holder_session_id: holder,
                    },
                );
            }
            DepartureOutcome::CancelledPending { requester } => {
                // The robot vanished underneath someone else's pending
                // request: tell them, nothing was ever granted.
                if requester != session_id {
                    self.registry.send(
                        &requester,
                        ServerMessage::Error {
                            message: HubError::NoRobotPresent.to_string(),
                        },
                    );
                }
            }
            DepartureOutcome::None => {}
        }

        state.members.retain(|m| m.session_id != session_id);
        broadcast(
            &self.registry,
            &state,
            None,
            &ServerMessage::ParticipantLeft {
                session_id: session_id.to_string(),
            },
        );
        drop(state);

        self.registry.set_space(session_id, None);
        self.registry.set_role(session_id, ClientRole::Unauthenticated);
        debug!("session {} left space {}", session_id, space_id);
    }

    /// Leave-processing plus registry removal, used by the transport
    /// disconnect path and the liveness monitor.
    pub async fn disconnect(&self, session_id: &str) {
        self.leave(session_id).await;
        self.registry.unregister(session_id);
    }

    pub async fn members_of(&self, space_id: &str) -> Vec<ParticipantInfo> {
        match self.space_state(space_id) {
            Some(state_arc) => state_arc.lock().await.participant_infos(),
            None => Vec::new(),
        }
    }

    pub async fn stats(&self) -> SpaceStats {
        // Clone the state handles first: locking while iterating would hold
        // a map guard across an await.
        let handles: Vec<Arc<Mutex<SpaceState>>> = self
            .spaces
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stats = SpaceStats {
            active_spaces: 0,
            total_participants: 0,
        };
        for handle in handles {
            let state = handle.lock().await;
            if !state.members.is_empty() {
                stats.active_spaces += 1;
                stats.total_participants += state.members.len();
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{connect, test_hub};

    #[tokio::test]
    async fn join_returns_occupants_and_notifies_existing_members() {
        let hub = test_hub();
        let (r1, mut r1_rx) = connect(&hub.registry);
        let (h1, _h1_rx) = connect(&hub.registry);

        let participants = hub
            .sessions
            .join(&r1, "lobby", SpaceRole::Robot, Some("r1".into()))
            .await
            .unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].session_id, r1);

        let participants = hub
            .sessions
            .join(&h1, "lobby", SpaceRole::Human, None)
            .await
            .unwrap();
        assert_eq!(participants.len(), 2);

        match r1_rx.try_recv() {
            Ok(ServerMessage::ParticipantJoined { session_id }) => assert_eq!(session_id, h1),
            other => panic!("expected participant_joined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn capacity_is_never_exceeded_under_concurrent_joins() {
        let hub = test_hub();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let (sid, _rx) = connect(&hub.registry);
            let sessions = Arc::clone(&hub.sessions);
            tasks.push(tokio::spawn(async move {
                sessions.join(&sid, "lobby", SpaceRole::Human, None).await
            }));
        }

        let mut wins = 0;
        let mut full = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => wins += 1,
                Err(HubError::SpaceFull(2)) => full += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(wins, 2);
        assert_eq!(full, 6);
        assert_eq!(hub.sessions.members_of("lobby").await.len(), 2);
    }

    #[tokio::test]
    async fn a_connection_holds_at_most_one_membership() {
        let hub = test_hub();
        let (h1, _rx) = connect(&hub.registry);

        hub.sessions
            .join(&h1, "lobby", SpaceRole::Human, None)
            .await
            .unwrap();
        assert_eq!(
            hub.sessions.join(&h1, "annex", SpaceRole::Human, None).await,
            Err(HubError::AlreadyInSpace)
        );
    }

    #[tokio::test]
    async fn second_robot_is_rejected() {
        let hub = test_hub();
        let (r1, _rx1) = connect(&hub.registry);
        let (r2, _rx2) = connect(&hub.registry);

        hub.sessions
            .join(&r1, "lobby", SpaceRole::Robot, Some("r1".into()))
            .await
            .unwrap();
        assert_eq!(
            hub.sessions
                .join(&r2, "lobby", SpaceRole::Robot, Some("r2".into()))
                .await,
            Err(HubError::RobotAlreadyPresent)
        );
    }

    #[tokio::test]
    async fn disabled_and_unknown_spaces_reject_joins() {
        let hub = test_hub();
        let (h1, _rx) = connect(&hub.registry);

        assert!(matches!(
            hub.sessions.join(&h1, "workshop", SpaceRole::Human, None).await,
            Err(HubError::SpaceDisabled(_))
        ));
        assert!(matches!(
            hub.sessions.join(&h1, "cellar", SpaceRole::Human, None).await,
            Err(HubError::UnknownSpace(_))
        ));
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_frees_a_slot() {
        let hub = test_hub();
        let (h1, _rx1) = connect(&hub.registry);
        let (h2, mut h2_rx) = connect(&hub.registry);
        let (h3, _rx3) = connect(&hub.registry);

        hub.sessions.join(&h1, "lobby", SpaceRole::Human, None).await.unwrap();
        hub.sessions.join(&h2, "lobby", SpaceRole::Human, None).await.unwrap();
        assert!(matches!(
            hub.sessions.join(&h3, "lobby", SpaceRole::Human, None).await,
            Err(HubError::SpaceFull(2))
        ));

        hub.sessions.leave(&h1).await;
        hub.sessions.leave(&h1).await; // no-op

        // h2 saw h1 arrive and depart.
        let mut saw_left = false;
        while let Ok(msg) = h2_rx.try_recv() {
            if let ServerMessage::ParticipantLeft { session_id } = msg {
                assert_eq!(session_id, h1);
                saw_left = true;
            }
        }
        assert!(saw_left);

        // Occupancy is back to 1, so the slot is reusable.
        hub.sessions.join(&h3, "lobby", SpaceRole::Human, None).await.unwrap();
        assert_eq!(hub.sessions.members_of("lobby").await.len(), 2);
    }
}
