//! The operator HTTP surface and the live event websocket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::broadcast;

use guardian_classify::Dispatcher;
use guardian_proto::messages::NodeMessage;

use crate::events::EventType;
use crate::store::Store;
use crate::{now_ms, now_secs};

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/nodes", get(nodes))
        .route("/api/alerts", get(alerts))
        .route("/api/alerts/:id/respond", post(respond_alert))
        .route("/api/spectrograms", get(spectrograms))
        .route("/api/ai/status", get(ai_status))
        .route("/api/simulate/alert", post(simulate_alert))
        .route("/api/simulate/heartbeat", post(simulate_heartbeat))
        .route("/api/events", get(events_ws))
        .with_state(state)
}

async fn status() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "time": now_secs()}))
}

async fn nodes(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_nodes().await {
        Ok(nodes) => Json(nodes).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn alerts(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_alerts(100).await {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn spectrograms(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_spectrograms(50).await {
        Ok(specs) => Json(specs).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(serde::Deserialize, Default)]
struct RespondBody {
    #[serde(default)]
    responded_by: Option<String>,
}

async fn respond_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<RespondBody>>,
) -> impl IntoResponse {
    let responded_by = body
        .and_then(|Json(b)| b.responded_by)
        .unwrap_or_else(|| "operator".to_string());
    match state.store.respond_alert(id, &responded_by).await {
        Ok(()) => Json(serde_json::json!({"success": true})).into_response(),
        Err(crate::HubError::Db(guardian_db::DbError::NotFound(_))) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"success": false, "error": "alert not found"})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn ai_status(State(state): State<AppState>) -> impl IntoResponse {
    let now = now_ms();
    Json(serde_json::json!({
        "mode": state.dispatcher.mode().as_str(),
        "services": state.dispatcher.services(),
        "quota_remaining": state.dispatcher.quota_remaining(now),
        "quota_reset_at": state.dispatcher.quota_reset_at(now),
    }))
}

#[derive(serde::Deserialize, Default)]
struct SimulateBody {
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    confidence: Option<u8>,
    #[serde(default)]
    battery: Option<u8>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

async fn simulate_alert(
    State(state): State<AppState>,
    body: Option<Json<SimulateBody>>,
) -> impl IntoResponse {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let msg = NodeMessage::alert(
        body.node_id.as_deref().unwrap_or("SIM_001"),
        body.confidence.unwrap_or(85),
        body.lat.unwrap_or(43.65),
        body.lon.unwrap_or(-79.38),
        body.battery.unwrap_or(80),
    );
    match state.store.ingest_telemetry(&msg, 0).await {
        Ok(()) => Json(serde_json::json!({"success": true})).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn simulate_heartbeat(
    State(state): State<AppState>,
    body: Option<Json<SimulateBody>>,
) -> impl IntoResponse {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let msg = NodeMessage::heartbeat(
        body.node_id.as_deref().unwrap_or("SIM_001"),
        body.battery.unwrap_or(80),
        body.lat.unwrap_or(43.65),
        body.lon.unwrap_or(-79.38),
        now_secs(),
    );
    match state.store.ingest_telemetry(&msg, 0).await {
        Ok(()) => Json(serde_json::json!({"success": true})).into_response(),
        Err(e) => internal_error(e),
    }
}

/// Live event channel: every store event as a JSON websocket frame, in
/// commit order. A lagging client gets a `subscriber_lag` notice instead
/// of ever backpressuring the pipeline.
async fn events_ws(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    let rx = state.store.bus().subscribe();
    upgrade.on_upgrade(move |socket| stream_events(socket, rx))
}

async fn stream_events(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<crate::events::HubEvent>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "websocket subscriber lagged");
                crate::events::HubEvent::new(
                    EventType::SubscriberLag,
                    serde_json::json!({"missed": missed}),
                )
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Ok(text) = serde_json::to_string(&event) else {
            continue;
        };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

fn internal_error(e: crate::HubError) -> axum::response::Response {
    tracing::error!(error = %e, "api error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"success": false, "error": e.to_string()})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use guardian_classify::local::LocalClassifier;
    use guardian_classify::Mode;

    fn test_state() -> AppState {
        let conn = guardian_db::open_memory().expect("open");
        let store = Store::new(conn, EventBus::new(64));
        let dispatcher = Arc::new(Dispatcher::new(
            Mode::Local,
            Box::new(LocalClassifier::new()),
            None,
            None,
            5,
            900_000,
        ));
        AppState { store, dispatcher }
    }

    #[tokio::test]
    async fn test_simulate_heartbeat_creates_node() {
        let state = test_state();
        let body = Json(SimulateBody {
            node_id: Some("SIM_007".to_string()),
            battery: Some(64),
            ..SimulateBody::default()
        });
        simulate_heartbeat(State(state.clone()), Some(body)).await;

        let nodes = state.store.list_nodes().await.expect("list");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, "SIM_007");
        assert_eq!(nodes[0].battery_percent, 64);
    }

    #[tokio::test]
    async fn test_simulate_alert_creates_alert() {
        let state = test_state();
        simulate_alert(State(state.clone()), None).await;

        let alerts = state.store.list_alerts(10).await.expect("list");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].node_id, "SIM_001");
        assert_eq!(alerts[0].confidence, 85);
    }

    #[tokio::test]
    async fn test_router_builds() {
        let _router = router(test_state());
    }
}
