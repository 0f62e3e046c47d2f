use axum::{extract::State, response::Json};
use serde::Serialize;

use crate::websocket::HubState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    connections: usize,
    active_spaces: usize,
    total_participants: usize,
}

/// GET /health - health check with occupancy counters
pub async fn health_check(State(state): State<HubState>) -> Json<HealthStatus> {
    let stats = state.sessions.stats().await;
    Json(HealthStatus {
        status: "ok",
        connections: state.registry.len(),
        active_spaces: stats.active_spaces,
        total_participants: stats.total_participants,
    })
}

/// What the join-selection UI gets to see. The robot allow-list stays
/// server-side.
#[derive(Debug, Serialize)]
pub struct SpaceSummary {
    pub id: String,
    pub display_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub capacity: usize,
    pub enabled: bool,
}

/// GET /spaces - enabled spaces for the join-selection UI
pub async fn list_spaces(State(state): State<HubState>) -> Json<Vec<SpaceSummary>> {
    Json(
        state
            .catalog
            .list_enabled()
            .into_iter()
            .map(|s| SpaceSummary {
                id: s.id.clone(),
                display_name: s.display_name.clone(),
                description: s.description.clone(),
                image_url: s.image_url.clone(),
                capacity: s.capacity,
                enabled: s.enabled,
            })
            .collect(),
    )
}

/// GET /metrics - Prometheus render of the metrics recorder
pub async fn metrics_handler(State(state): State<HubState>) -> String {
    state.metrics.render()
}
