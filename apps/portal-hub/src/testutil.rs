use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::mpsc;

use crate::catalog::{SpaceCatalog, SpaceDef};
use crate::control::{ControlCoordinator, ControlGate, PresenceGate};
use crate::protocol::ServerMessage;
use crate::registry::ConnectionRegistry;
use crate::relay::SignalingRelay;
use crate::secrets::CredentialStore;
use crate::spaces::SessionManager;
use crate::websocket::HubState;

pub struct TestHub {
    pub registry: Arc<ConnectionRegistry>,
    pub catalog: Arc<SpaceCatalog>,
    pub sessions: Arc<SessionManager>,
    pub control: Arc<ControlCoordinator>,
    pub relay: SignalingRelay,
}

fn space(id: &str, capacity: usize, enabled: bool, robot_ids: &[&str]) -> SpaceDef {
    SpaceDef {
        id: id.into(),
        display_name: id.into(),
        description: String::new(),
        image_url: None,
        capacity,
        enabled,
        robot_ids: robot_ids.iter().map(|s| s.to_string()).collect(),
    }
}

/// A hub wired up against a small fixed catalog: "lobby" (capacity 2, robot
/// r1), "annex" (capacity 3, robot r1), "workshop" (disabled).
pub fn test_hub() -> TestHub {
    test_hub_with_gate(Arc::new(PresenceGate), Duration::from_secs(5))
}

pub fn test_hub_with_gate(gate: Arc<dyn ControlGate>, gate_timeout: Duration) -> TestHub {
    let catalog = Arc::new(
        SpaceCatalog::from_defs(vec![
            space("lobby", 2, true, &["r1"]),
            space("annex", 3, true, &["r1"]),
            space("workshop", 2, false, &["r1"]),
        ])
        .unwrap(),
    );
    let registry = Arc::new(ConnectionRegistry::new());
    let sessions = Arc::new(SessionManager::new(Arc::clone(&registry), Arc::clone(&catalog)));
    let control = Arc::new(ControlCoordinator::new(
        Arc::clone(&registry),
        Arc::clone(&sessions),
        gate,
        gate_timeout,
    ));
    let relay = SignalingRelay::new(Arc::clone(&registry), Arc::clone(&sessions));
    TestHub {
        registry,
        catalog,
        sessions,
        control,
        relay,
    }
}

/// A full transport-facing state, with credentials for robot "r1".
pub fn test_state() -> HubState {
    let hub = test_hub();
    HubState {
        registry: hub.registry,
        catalog: hub.catalog,
        credentials: Arc::new(CredentialStore::from_pairs([("r1", "s3cret")])),
        sessions: hub.sessions,
        control: hub.control,
        relay: hub.relay,
        metrics: PrometheusBuilder::new().build_recorder().handle(),
    }
}

/// Register a fresh connection and hand back its outbound channel.
pub fn connect(registry: &ConnectionRegistry) -> (String, mpsc::UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (registry.register(tx), rx)
}

/// Everything queued on a connection's outbound channel right now.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}
