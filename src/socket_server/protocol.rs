//! Socket server protocol message types
//!
//! Defines the JSON message format for client-server communication. Requests
//! carry an `id` the response echoes; broadcasts are one-way `event` frames.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PollError;
use crate::schema::{AccessLevel, EventId, GroupId, Member, PollId};
use crate::tally::ResultsSummary;

/// Request and broadcast message names
pub mod names {
    pub const EVENT_GET: &str = "event:get";
    pub const EVENT_CREATE: &str = "event:create";
    pub const EVENT_UPDATE: &str = "event:update";
    pub const EVENT_DELETE: &str = "event:delete";
    pub const EVENT_PUBLISH: &str = "event:publish";
    pub const EVENT_UNPUBLISH: &str = "event:unpublish";

    pub const POLL_GET: &str = "poll:get";
    pub const POLL_CREATE: &str = "poll:create";
    pub const POLL_UPDATE: &str = "poll:update";
    pub const POLL_DELETE: &str = "poll:delete";
    pub const POLL_SHOW: &str = "poll:show";
    pub const POLL_HIDE: &str = "poll:hide";
    pub const POLL_OPEN: &str = "poll:open";
    pub const POLL_CLOSE: &str = "poll:close";

    pub const VOTE_SUBMIT: &str = "vote:submit";
    pub const VOTE_GET: &str = "vote:get";

    // Broadcasts
    pub const EVENT_ADDED: &str = "event:added";
    pub const EVENT_UPDATED: &str = "event:updated";
    pub const EVENT_DELETED: &str = "event:deleted";
    pub const EVENT_PUBLISHED: &str = "event:published";
    pub const EVENT_UNPUBLISHED: &str = "event:unpublished";
    pub const POLL_ADDED: &str = "poll:added";
    pub const POLL_UPDATED: &str = "poll:updated";
    pub const POLL_DELETED: &str = "poll:deleted";
    /// A shown poll went back to unshown; members drop it
    pub const POLL_HIDDEN: &str = "poll:hidden";
    /// Live tally (admins) and on-demand results query
    pub const POLL_RESULTS: &str = "poll:results";
}

/// Client-to-server message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate and join a group. Must be the first frame.
    Connect {
        #[serde(rename = "groupId")]
        group_id: GroupId,
        token: String,
    },
    /// Callback-style request
    Request {
        id: u64,
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Ping to check connection
    Ping,
}

/// Server-to-client message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection established
    Connected(ConnectionInfo),
    /// Request outcome
    Response(Reply),
    /// Broadcast notification
    Event {
        name: String,
        payload: serde_json::Value,
    },
    /// Pong response
    Pong,
}

impl ServerMessage {
    /// Pre-encode a broadcast frame once for all recipients
    pub fn encode_event<P: Serialize>(name: &str, payload: &P) -> Result<Arc<str>, serde_json::Error> {
        let frame = ServerMessage::Event {
            name: name.to_string(),
            payload: serde_json::to_value(payload)?,
        };
        Ok(Arc::from(serde_json::to_string(&frame)?))
    }
}

/// Connection info returned after a successful connect
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub client_id: String,
    pub group_id: GroupId,
    pub member: Member,
    pub access: AccessLevel,
    pub published_event_id: Option<EventId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    #[serde(rename = "OK")]
    Ok,
    Error,
}

/// Wire error body: name + message, never a raw cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub name: String,
    pub message: String,
}

/// The two canonical response shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Request id; null when the frame could not be parsed
    pub id: Option<u64>,
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Self {
            id: None,
            status: ReplyStatus::Ok,
            data,
            error: None,
        }
    }

    pub fn error(err: &PollError) -> Self {
        Self {
            id: None,
            status: ReplyStatus::Error,
            data: None,
            error: Some(ErrorBody {
                name: err.name().to_string(),
                message: err.public_message(),
            }),
        }
    }

    pub fn with_id(mut self, id: Option<u64>) -> Self {
        self.id = id;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// Error name, if this is an error reply
    pub fn error_name(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.name.as_str())
    }
}

// ============================================================================
// Request and broadcast payloads
// ============================================================================

/// `{id, changes}` payload of `event:update` and `poll:update`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRequest<C> {
    pub id: Uuid,
    pub changes: C,
}

/// Payload of `vote:submit`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub poll_id: PollId,
    pub selection: Vec<u32>,
}

/// Payload of `event:unpublished`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRef {
    pub event_id: EventId,
}

/// Payload of `poll:deleted`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRef {
    pub id: PollId,
    pub event_id: EventId,
}

/// Tally of one poll, as returned by `poll:results` and pushed to admins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    pub poll_id: PollId,
    pub results: ResultsSummary,
    pub approval_rate: Option<f64>,
}

impl PollResults {
    pub fn new(poll_id: PollId, results: ResultsSummary) -> Self {
        let approval_rate = results.approval_rate();
        Self {
            poll_id,
            results,
            approval_rate,
        }
    }
}
