//! Request routing
//!
//! Maps `(name, payload)` to a [`Command`], checks the session's access level
//! and dispatches into the [`Coordinator`]. Whatever happens, the caller gets
//! exactly one [`Reply`]: ok with optional data, or error with name and
//! message.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::access::Session;
use crate::error::{PollError, Result, StoreError};
use crate::lifecycle::PollAction;
use crate::schema::{AccessLevel, EventChanges, EventId, EventQuery, NewEvent, NewPoll, PollChanges, PollId};
use crate::socket_server::coordinator::Coordinator;
use crate::socket_server::group_registry::GroupContext;
use crate::socket_server::protocol::{names, Reply, UpdateRequest, VoteRequest};

/// A parsed request
#[derive(Debug)]
pub enum Command {
    GetEvents(EventQuery),
    CreateEvent(NewEvent),
    UpdateEvent(UpdateRequest<EventChanges>),
    DeleteEvent(EventId),
    PublishEvent(EventId),
    UnpublishEvent(EventId),
    GetPolls(EventId),
    CreatePoll(NewPoll),
    UpdatePoll(UpdateRequest<PollChanges>),
    DeletePoll(PollId),
    Transition(PollId, PollAction),
    PollResults(PollId),
    SubmitVote(VoteRequest),
    GetVote(PollId),
}

impl Command {
    /// Decode a request. Unknown names and malformed payloads are Validation.
    pub fn parse(name: &str, payload: Value) -> Result<Self> {
        let command = match name {
            names::EVENT_GET => {
                if payload.is_null() {
                    Self::GetEvents(EventQuery::default())
                } else {
                    Self::GetEvents(decode(name, payload)?)
                }
            }
            names::EVENT_CREATE => Self::CreateEvent(decode(name, payload)?),
            names::EVENT_UPDATE => Self::UpdateEvent(decode(name, payload)?),
            names::EVENT_DELETE => Self::DeleteEvent(decode(name, payload)?),
            names::EVENT_PUBLISH => Self::PublishEvent(decode(name, payload)?),
            names::EVENT_UNPUBLISH => Self::UnpublishEvent(decode(name, payload)?),
            names::POLL_GET => Self::GetPolls(decode(name, payload)?),
            names::POLL_CREATE => Self::CreatePoll(decode(name, payload)?),
            names::POLL_UPDATE => Self::UpdatePoll(decode(name, payload)?),
            names::POLL_DELETE => Self::DeletePoll(decode(name, payload)?),
            names::POLL_SHOW => Self::Transition(decode(name, payload)?, PollAction::Show),
            names::POLL_HIDE => Self::Transition(decode(name, payload)?, PollAction::Hide),
            names::POLL_OPEN => Self::Transition(decode(name, payload)?, PollAction::Open),
            names::POLL_CLOSE => Self::Transition(decode(name, payload)?, PollAction::Close),
            names::POLL_RESULTS => Self::PollResults(decode(name, payload)?),
            names::VOTE_SUBMIT => Self::SubmitVote(decode(name, payload)?),
            names::VOTE_GET => Self::GetVote(decode(name, payload)?),
            _ => return Err(PollError::validation(format!("unknown message {name}"))),
        };
        Ok(command)
    }

    /// Minimum access level to dispatch this command
    pub fn required_access(&self) -> AccessLevel {
        match self {
            Self::GetEvents(_)
            | Self::GetPolls(_)
            | Self::PollResults(_)
            | Self::SubmitVote(_)
            | Self::GetVote(_) => AccessLevel::ReadOnly,
            _ => AccessLevel::ReadWrite,
        }
    }
}

fn decode<T: DeserializeOwned>(name: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| PollError::validation(format!("invalid {name} payload: {e}")))
}

fn data<T: Serialize>(value: T) -> Result<Option<Value>> {
    let value = serde_json::to_value(value).map_err(StoreError::from)?;
    Ok(Some(value))
}

/// Dispatches requests of authorized sessions
#[derive(Clone)]
pub struct Router {
    coordinator: Arc<Coordinator>,
}

impl Router {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Handle one request. The reply's id is left for the caller to set.
    pub async fn handle(&self, session: &Session, ctx: &GroupContext, name: &str, payload: Value) -> Reply {
        match self.dispatch(session, ctx, name, payload).await {
            Ok(value) => Reply::ok(value),
            Err(err) => {
                match &err {
                    PollError::Store(cause) => {
                        tracing::error!("{} from member {} failed: {}", name, session.member.id, cause);
                    }
                    other => {
                        tracing::debug!("{} from member {} rejected: {}", name, session.member.id, other);
                    }
                }
                Reply::error(&err)
            }
        }
    }

    async fn dispatch(&self, session: &Session, ctx: &GroupContext, name: &str, payload: Value) -> Result<Option<Value>> {
        let command = Command::parse(name, payload)?;
        session.require(command.required_access())?;

        let coord = &self.coordinator;
        match command {
            Command::GetEvents(query) => data(coord.get_events(session, ctx, query).await?),
            Command::CreateEvent(fields) => data(coord.create_event(ctx, fields).await?),
            Command::UpdateEvent(UpdateRequest { id, changes }) => data(coord.update_event(ctx, id, changes).await?),
            Command::DeleteEvent(id) => {
                coord.delete_event(ctx, id).await?;
                Ok(None)
            }
            Command::PublishEvent(id) => {
                coord.publish_event(ctx, id).await?;
                Ok(None)
            }
            Command::UnpublishEvent(id) => {
                coord.unpublish_event(ctx, id).await?;
                Ok(None)
            }
            Command::GetPolls(event_id) => data(coord.get_polls(session, ctx, event_id).await?),
            Command::CreatePoll(fields) => data(coord.create_poll(ctx, fields).await?),
            Command::UpdatePoll(UpdateRequest { id, changes }) => data(coord.update_poll(ctx, id, changes).await?),
            Command::DeletePoll(id) => {
                coord.delete_poll(ctx, id).await?;
                Ok(None)
            }
            Command::Transition(id, action) => data(coord.transition_poll(ctx, id, action).await?.poll),
            Command::PollResults(id) => data(coord.poll_results(session, ctx, id).await?),
            Command::SubmitVote(request) => {
                coord.submit_vote(session, ctx, request).await?;
                Ok(None)
            }
            Command::GetVote(poll_id) => data(coord.get_vote(session, ctx, poll_id).await?),
        }
    }
}
