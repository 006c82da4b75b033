//! Inbound payloads.
//!
//! Realtime events arrive as `{"t": "<kind>", "d": {...}}`. Fields are kept
//! raw here and validated by the router, so a malformed event is reported
//! as `InvalidArgument` instead of failing deserialization of the frame.

use serde::Deserialize;
use validator::Validate;

use crate::domain::GroupId;
use crate::shared::error::AppError;

/// Group id as sent by clients, either a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawGroupId {
    Number(i64),
    Text(String),
}

impl RawGroupId {
    pub fn parse(&self) -> Result<GroupId, AppError> {
        match self {
            RawGroupId::Number(n) => Ok(GroupId(*n)),
            RawGroupId::Text(s) => GroupId::parse(s),
        }
    }
}

/// Parse a required group id field.
pub fn required_group(raw: &Option<RawGroupId>) -> Result<GroupId, AppError> {
    raw.as_ref()
        .ok_or_else(|| AppError::InvalidArgument("groupId is required".into()))?
        .parse()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    /// Absent for a public broadcast.
    pub to: Option<String>,
    pub content: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypingPayload {
    pub to: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredPayload {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadPayload {
    /// Counterparty whose messages the reader has caught up on.
    pub from: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSendPayload {
    pub group_id: Option<RawGroupId>,
    pub content: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTypingPayload {
    pub group_id: Option<RawGroupId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDeliveredPayload {
    pub group_id: Option<RawGroupId>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReadPayload {
    pub group_id: Option<RawGroupId>,
    #[serde(default)]
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribePayload {
    pub topic: String,
}

/// Closed set of inbound realtime events, one handler per variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t", content = "d")]
pub enum ClientEvent {
    #[serde(rename = "chat.send")]
    Send(SendPayload),
    #[serde(rename = "chat.join")]
    Join,
    #[serde(rename = "chat.typing")]
    Typing(TypingPayload),
    #[serde(rename = "chat.delivered")]
    Delivered(DeliveredPayload),
    #[serde(rename = "chat.read")]
    Read(ReadPayload),
    #[serde(rename = "group.send")]
    GroupSend(GroupSendPayload),
    #[serde(rename = "group.typing")]
    GroupTyping(GroupTypingPayload),
    #[serde(rename = "group.delivered")]
    GroupDelivered(GroupDeliveredPayload),
    #[serde(rename = "group.read")]
    GroupRead(GroupReadPayload),
    #[serde(rename = "subscribe")]
    Subscribe(SubscribePayload),
    #[serde(rename = "unsubscribe")]
    Unsubscribe(SubscribePayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Send(_) => "chat.send",
            ClientEvent::Join => "chat.join",
            ClientEvent::Typing(_) => "chat.typing",
            ClientEvent::Delivered(_) => "chat.delivered",
            ClientEvent::Read(_) => "chat.read",
            ClientEvent::GroupSend(_) => "group.send",
            ClientEvent::GroupTyping(_) => "group.typing",
            ClientEvent::GroupDelivered(_) => "group.delivered",
            ClientEvent::GroupRead(_) => "group.read",
            ClientEvent::Subscribe(_) => "subscribe",
            ClientEvent::Unsubscribe(_) => "unsubscribe",
        }
    }
}

impl ClientEvent {
    /// Build an event from a gateway dispatch frame's `t` and `d`.
    ///
    /// A missing `d` is treated as an empty payload, so required fields are
    /// reported as `InvalidArgument` by the handler rather than here.
    pub fn from_frame(t: &str, d: Option<serde_json::Value>) -> Result<Self, AppError> {
        if t == "chat.join" {
            return Ok(ClientEvent::Join);
        }
        let d = match d {
            Some(serde_json::Value::Null) | None => serde_json::json!({}),
            Some(d) => d,
        };
        serde_json::from_value(serde_json::json!({ "t": t, "d": d }))
            .map_err(|e| AppError::InvalidArgument(format!("malformed {} event: {}", t, e)))
    }
}

/// `GET /messages/sync` query.
#[derive(Debug, Deserialize, Validate)]
pub struct SyncQuery {
    /// Epoch milliseconds; only strictly newer messages are returned.
    #[validate(range(min = 0, message = "must not be negative"))]
    pub since: i64,
}
