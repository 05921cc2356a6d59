//! HTTP side of the dashboard.
//!
//! Routes:
//!   • `/`        everything as one JSON document
//!   • `/metrics` counters only
//!   • `/ws`      live feed of [`Push`] frames

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;

use super::{DashboardState, MapStats, MetricsSnapshot};

const METRICS_PERIOD: Duration = Duration::from_millis(200);

/// One frame on the WebSocket feed: `{"type": "...", "data": {...}}`.
#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum Push {
    Metrics(MetricsSnapshot),
    Map(MapStats),
}

pub fn router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/", get(snapshot))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Binds `0.0.0.0:port` and serves until the listener fails.
pub async fn start(state: Arc<DashboardState>, port: u16) {
    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Dashboard failed to bind to {}: {}", addr, e);
            return;
        }
    };
    tracing::info!("Dashboard listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!("Dashboard server error: {}", e);
    }
}

async fn snapshot(State(state): State<Arc<DashboardState>>) -> Json<serde_json::Value> {
    Json(state.snapshot_json())
}

async fn metrics(State(state): State<Arc<DashboardState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<DashboardState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| feed(socket, state))
}

async fn feed(mut socket: WebSocket, state: Arc<DashboardState>) {
    let mut stats_rx = state.subscribe_stats();
    let mut ticker = tokio::time::interval(METRICS_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // A new viewer gets the current map shape straight away.
    let first = Push::Map(stats_rx.borrow_and_update().clone());
    if push(&mut socket, &first).await.is_err() {
        return;
    }

    loop {
        let frame = tokio::select! {
            _ = ticker.tick() => Push::Metrics(state.metrics.snapshot()),
            changed = stats_rx.changed() => match changed {
                Ok(()) => Push::Map(stats_rx.borrow_and_update().clone()),
                Err(_) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Ping(payload))) => {
                    if socket.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                    continue;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };
        if push(&mut socket, &frame).await.is_err() {
            break;
        }
    }
    tracing::debug!("Dashboard viewer disconnected");
}

async fn push(socket: &mut WebSocket, frame: &Push) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    socket.send(Message::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_tagged() {
        let frame = Push::Map(MapStats {
            blocks: 3,
            ..MapStats::default()
        });
        let v: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], "map");
        assert_eq!(v["data"]["blocks"], 3);
    }
}
