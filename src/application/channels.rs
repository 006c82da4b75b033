//! Outbound channels.
//!
//! Every event leaves the engine through a [`Dispatcher`], addressed either to
//! a user's private queue (all of that user's sessions) or to a topic (every
//! session subscribed to it).

use std::fmt;
use std::str::FromStr;

use crate::application::dto::ServerEvent;
use crate::domain::{GroupId, UserId};
use crate::shared::error::AppError;

/// Private per-user queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserQueue {
    Messages,
    Typing,
    GroupMessages,
}

impl UserQueue {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserQueue::Messages => "messages",
            UserQueue::Typing => "typing",
            UserQueue::GroupMessages => "group.messages",
        }
    }
}

/// Shared topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Public,
    Presence,
    Group(GroupId),
    GroupTyping(GroupId),
    GroupDelivery(GroupId),
    GroupRead(GroupId),
}

impl Topic {
    /// Group the topic belongs to, if any. Group topics require membership.
    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            Topic::Public | Topic::Presence => None,
            Topic::Group(id)
            | Topic::GroupTyping(id)
            | Topic::GroupDelivery(id)
            | Topic::GroupRead(id) => Some(*id),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Public => f.write_str("public"),
            Topic::Presence => f.write_str("presence"),
            Topic::Group(id) => write!(f, "group.{}", id),
            Topic::GroupTyping(id) => write!(f, "group.{}.typing", id),
            Topic::GroupDelivery(id) => write!(f, "group.{}.delivery", id),
            Topic::GroupRead(id) => write!(f, "group.{}.read", id),
        }
    }
}

impl FromStr for Topic {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::InvalidArgument(format!("unknown topic: {}", s));
        match s {
            "public" => return Ok(Topic::Public),
            "presence" => return Ok(Topic::Presence),
            _ => {}
        }

        let rest = s.strip_prefix("group.").ok_or_else(invalid)?;
        let (id, suffix) = match rest.split_once('.') {
            Some((id, suffix)) => (id, Some(suffix)),
            None => (rest, None),
        };
        let id = GroupId::parse(id).map_err(|_| invalid())?;

        match suffix {
            None => Ok(Topic::Group(id)),
            Some("typing") => Ok(Topic::GroupTyping(id)),
            Some("delivery") => Ok(Topic::GroupDelivery(id)),
            Some("read") => Ok(Topic::GroupRead(id)),
            Some(_) => Err(invalid()),
        }
    }
}

/// Where an outbound event was routed from, reported to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Queue(UserQueue),
    Topic(Topic),
    Session,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Queue(q) => write!(f, "/user/queue/{}", q.as_str()),
            Destination::Topic(t) => write!(f, "/topic/{}", t),
            Destination::Session => f.write_str("/session"),
        }
    }
}

/// Outbound fan-out seam.
///
/// Sends never block: offline users and unsubscribed topics silently drop
/// the event, which is what the catch-up pass exists for.
pub trait Dispatcher: Send + Sync {
    /// Deliver to every live session of `user`.
    fn send_to_user(&self, user: &UserId, queue: UserQueue, event: ServerEvent);

    /// Deliver to every session subscribed to `topic`.
    fn publish(&self, topic: Topic, event: ServerEvent);

    /// Deliver to one session only. Returns `false` if the session is gone.
    fn send_to_session(&self, session_id: &str, event: ServerEvent) -> bool;

    /// Add `topic` to a session's subscriptions. Returns `false` if the session is gone.
    fn subscribe(&self, session_id: &str, topic: Topic) -> bool;

    fn unsubscribe(&self, session_id: &str, topic: Topic);
}
