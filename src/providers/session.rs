//! Agent session provider.
//!
//! A session is a durable conversational context with the external coding
//! agent runtime, bound to a working directory. The orchestrator creates one
//! per role, sends the role's initial prompt through it, and is notified via
//! the event feed when the session goes idle.
//!
//! `HttpSessionProvider` is the production implementation: a JSON/HTTP
//! client against the local runtime daemon, with an embedded webhook server
//! (see `events`) registered as the runtime's event sink.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::events::{EventServer, SessionEvent};

/// Durable conversational sessions with the agent runtime.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Create a session rooted at `working_dir` with the given system prompt.
    /// Returns the runtime-assigned session id.
    async fn create_session(&self, working_dir: &Path, system_prompt: &str) -> Result<String>;

    /// Deliver a user message to the session.
    async fn send_message(&self, session_id: &str, text: &str) -> Result<()>;

    /// Remove the session. Removing an already-gone session is not an error.
    async fn remove_session(&self, session_id: &str) -> Result<()>;

    /// Session ids the runtime still considers active.
    async fn active_sessions(&self) -> Result<Vec<String>>;

    /// The global event feed. Every subscriber sees every event.
    fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent>;
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    working_dir: &'a str,
    system_prompt: &'a str,
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    session_id: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct SessionListResponse {
    sessions: Vec<String>,
}

#[derive(Serialize)]
struct SubscribeRequest<'a> {
    url: &'a str,
}

/// HTTP client for a local agent-runtime daemon.
pub struct HttpSessionProvider {
    client: reqwest::Client,
    base_url: String,
    events: EventServer,
}

impl HttpSessionProvider {
    /// Connect to the runtime at `runtime_url`: start the event webhook
    /// server and register it with the runtime.
    pub async fn connect(runtime_url: &str) -> Result<Self> {
        let base_url = runtime_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::new();

        let mut events = EventServer::new();
        let callback_url = events.start().await?;

        let response = client
            .post(format!("{}/v1/subscriptions", base_url))
            .json(&SubscribeRequest { url: &callback_url })
            .send()
            .await
            .with_context(|| format!("Failed to reach agent runtime at {}", base_url))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Runtime rejected event subscription: HTTP {}",
                response.status()
            ));
        }
        info!("Subscribed to runtime events at {}", callback_url);

        Ok(Self {
            client,
            base_url,
            events,
        })
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    async fn create_session(&self, working_dir: &Path, system_prompt: &str) -> Result<String> {
        let working_dir = working_dir
            .to_str()
            .context("Working directory path contains invalid UTF-8")?;
        let response = self
            .client
            .post(format!("{}/v1/sessions", self.base_url))
            .json(&CreateSessionRequest {
                working_dir,
                system_prompt,
            })
            .send()
            .await
            .context("Failed to send session create request")?;
        if !response.status().is_success() {
            return Err(anyhow!("Session create failed: HTTP {}", response.status()));
        }
        let body: CreateSessionResponse = response
            .json()
            .await
            .context("Invalid session create response")?;
        debug!("Created session {} in {}", body.session_id, working_dir);
        Ok(body.session_id)
    }

    async fn send_message(&self, session_id: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v1/sessions/{}/messages", self.base_url, session_id))
            .json(&SendMessageRequest { text })
            .send()
            .await
            .with_context(|| format!("Failed to send message to session {}", session_id))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Message delivery to session {} failed: HTTP {}",
                session_id,
                response.status()
            ));
        }
        Ok(())
    }

    async fn remove_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/v1/sessions/{}", self.base_url, session_id))
            .send()
            .await
            .with_context(|| format!("Failed to send session remove for {}", session_id))?;
        // 404 means the runtime already forgot it, which is what we wanted.
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(anyhow!(
                "Session remove for {} failed: HTTP {}",
                session_id,
                response.status()
            ));
        }
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/v1/sessions", self.base_url))
            .send()
            .await
            .context("Failed to list runtime sessions")?;
        if !response.status().is_success() {
            return Err(anyhow!("Session list failed: HTTP {}", response.status()));
        }
        let body: SessionListResponse = response
            .json()
            .await
            .context("Invalid session list response")?;
        Ok(body.sessions)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_bodies_serialize_as_the_runtime_expects() {
        let create = CreateSessionRequest {
            working_dir: "/tmp/wt",
            system_prompt: "You are the implementor.",
        };
        let json = serde_json::to_value(&create).unwrap();
        assert_eq!(json["working_dir"], "/tmp/wt");
        assert_eq!(json["system_prompt"], "You are the implementor.");

        let msg = SendMessageRequest { text: "go" };
        assert_eq!(serde_json::to_value(&msg).unwrap()["text"], "go");
    }

    #[test]
    fn response_bodies_deserialize() {
        let created: CreateSessionResponse =
            serde_json::from_str(r#"{"session_id":"sess-9"}"#).unwrap();
        assert_eq!(created.session_id, "sess-9");

        let list: SessionListResponse =
            serde_json::from_str(r#"{"sessions":["a","b"]}"#).unwrap();
        assert_eq!(list.sessions, vec!["a", "b"]);
    }
}
