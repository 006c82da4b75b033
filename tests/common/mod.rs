//! Common Test Utilities
//!
//! In-memory engine harness, gateway test clients and token helpers.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use chat_engine::application::dto::ClientEvent;
use chat_engine::application::services::EventContext;
use chat_engine::config::Settings;
use chat_engine::domain::{GroupId, UserId};
use chat_engine::infrastructure::identity::Claims;
use chat_engine::infrastructure::memory::MemoryDirectory;
use chat_engine::presentation::websocket::{open_session, GatewaySend};
use chat_engine::startup::{create_app, memory_backend, AppState};

pub const SECRET: &str = "integration-test-secret-0123456789abcdef";

pub const ALICE: &str = "alice@example.com";
pub const BOB: &str = "bob@example.com";
pub const CAROL: &str = "carol@example.com";
pub const DAVE: &str = "dave@example.com";

/// Group 1 holds alice, bob and carol; dave belongs to no group.
pub const TEAM: GroupId = GroupId(1);

pub fn user(email: &str) -> UserId {
    UserId::parse(email).unwrap()
}

pub fn settings() -> Settings {
    Settings::defaults("test")
        .and_then(|b| b.set_override("jwt.secret", SECRET))
        .and_then(|b| b.build())
        .and_then(|c| c.try_deserialize::<Settings>())
        .unwrap()
}

/// Signed bearer token for `email`, valid for an hour.
pub fn token(email: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: email.to_string(),
        exp: now + 3600,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// A gateway session driven directly, without a socket.
pub struct Client {
    pub user: UserId,
    pub session_id: String,
    rx: mpsc::UnboundedReceiver<GatewaySend>,
}

impl Client {
    /// Every frame queued so far.
    pub fn drain(&mut self) -> Vec<GatewaySend> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Payloads of queued `t` events, discarding everything else.
    pub fn take(&mut self, t: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|f| f.t.as_deref() == Some(t))
            .filter_map(|f| f.d)
            .collect()
    }

    /// `(t, payload)` of queued events named in `names`, in arrival order.
    pub fn take_all(&mut self, names: &[&str]) -> Vec<(String, Value)> {
        self.drain()
            .into_iter()
            .filter_map(|f| match (f.t, f.d) {
                (Some(t), Some(d)) if names.contains(&t.as_str()) => Some((t, d)),
                _ => None,
            })
            .collect()
    }

    pub fn ctx(&self) -> EventContext {
        EventContext::new(self.user.clone(), self.session_id.clone())
    }
}

/// Engine over the in-memory backend with a seeded directory.
pub struct Harness {
    pub state: AppState,
    pub directory: Arc<MemoryDirectory>,
}

impl Harness {
    pub fn new() -> Self {
        let directory = Arc::new(MemoryDirectory::new());
        directory.upsert_group(TEAM, vec![user(ALICE), user(BOB), user(CAROL)]);
        directory.set_display_name(user(ALICE), "Alice");
        directory.set_display_name(user(BOB), "Bob");

        let state = AppState::new(settings(), memory_backend(directory.clone()), None);
        Self { state, directory }
    }

    pub fn router(&self) -> Router {
        create_app(self.state.clone())
    }

    /// Open a session through the gateway's connect sequence, waiting for any
    /// catch-up pass it starts.
    pub async fn connect(&self, email: &str) -> Client {
        let user = user(email);
        let session_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let groups = self.state.groups.groups_of(&user).await.unwrap();
        let opened = open_session(&self.state, &session_id, &user, groups, tx).unwrap();
        if let Some(catch_up) = opened.connected.catch_up {
            catch_up.await.unwrap();
        }

        Client {
            user,
            session_id,
            rx,
        }
    }

    pub fn disconnect(&self, client: Client) {
        self.state.gateway.unregister_session(&client.session_id);
        self.state.engine.presence().disconnect(&client.user);
    }

    /// Send a dispatch frame on behalf of `client`.
    pub async fn send(&self, client: &Client, t: &str, d: Value) {
        let event = ClientEvent::from_frame(t, Some(d)).unwrap();
        self.state.engine.router().dispatch(&client.ctx(), event).await;
    }

    pub async fn get_text(&self, uri: &str, token: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let response = self
            .router()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    /// GET `uri`, parsing the body as JSON (`Null` when it is not).
    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let (status, text) = self.get_text(uri, token).await;
        (status, serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}
