//! HTTP webhook server for session events from the agent runtime.
//!
//! The runtime delivers lifecycle notifications by POSTing JSON to a local
//! callback endpoint. The server binds to a dynamic localhost port, decodes
//! known event kinds, and fans them out on a broadcast channel that the
//! orchestrator consumes as its global event stream. Payloads it does not
//! recognize are acknowledged and dropped, so the runtime may grow new
//! event kinds without breaking us.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error};

/// Broadcast buffer size. Slow consumers see `Lagged` rather than blocking
/// the webhook handler.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A session lifecycle event from the agent runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session finished processing its current turn.
    SessionIdle { session_id: String },
    /// The session started processing a message.
    SessionBusy { session_id: String },
    /// The session was removed on the runtime side.
    SessionRemoved { session_id: String },
    #[serde(other)]
    Unknown,
}

#[derive(Clone)]
struct EventState {
    tx: broadcast::Sender<SessionEvent>,
}

/// Webhook server receiving runtime event callbacks.
pub struct EventServer {
    tx: broadcast::Sender<SessionEvent>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    addr: Option<SocketAddr>,
}

impl Default for EventServer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventServer {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            shutdown_tx: None,
            addr: None,
        }
    }

    /// Bind to a dynamic localhost port and start serving. Returns the URL
    /// the runtime should be told to deliver events to.
    pub async fn start(&mut self) -> Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind event webhook server")?;
        let addr = listener
            .local_addr()
            .context("Failed to get event server address")?;
        self.addr = Some(addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = build_router(EventState {
            tx: self.tx.clone(),
        });

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!("Event webhook server error: {}", e);
            }
        });

        Ok(format!("http://{}/events", addr))
    }

    /// Stop the server gracefully. Safe to call if never started.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.addr = None;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Sender side of the event feed, for tests and in-process publishers.
    pub fn sender(&self) -> broadcast::Sender<SessionEvent> {
        self.tx.clone()
    }
}

impl Drop for EventServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_router(state: EventState) -> Router {
    Router::new()
        .route("/events", post(receive_event))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

async fn receive_event(
    State(state): State<EventState>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    let event = serde_json::from_value::<SessionEvent>(payload.clone())
        .unwrap_or(SessionEvent::Unknown);
    if event == SessionEvent::Unknown {
        debug!("Ignoring unrecognized runtime event: {}", payload);
        return StatusCode::OK;
    }
    // A send error only means no subscriber yet; the event is droppable.
    let _ = state.tx.send(event);
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/events")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn idle_event_reaches_subscribers() {
        let server = EventServer::new();
        let mut rx = server.subscribe();
        let app = build_router(EventState {
            tx: server.sender(),
        });

        let response = app
            .oneshot(post_json(
                r#"{"kind":"session_idle","session_id":"sess-1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SessionEvent::SessionIdle {
                session_id: "sess-1".into()
            }
        );
    }

    #[tokio::test]
    async fn unknown_event_kind_is_acknowledged_and_dropped() {
        let server = EventServer::new();
        let mut rx = server.subscribe();
        let app = build_router(EventState {
            tx: server.sender(),
        });

        let response = app
            .oneshot(post_json(r#"{"kind":"token_usage","tokens":9000}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn payload_without_kind_is_acknowledged_and_dropped() {
        let server = EventServer::new();
        let mut rx = server.subscribe();
        let app = build_router(EventState {
            tx: server.sender(),
        });

        let response = app.oneshot(post_json(r#"{"hello":"world"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn healthz_responds() {
        let app = build_router(EventState {
            tx: EventServer::new().sender(),
        });
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn server_binds_and_stops() {
        let mut server = EventServer::new();
        let url = server.start().await.unwrap();
        assert!(url.starts_with("http://127.0.0.1:"));
        assert!(url.ends_with("/events"));
        server.stop();
    }
}
