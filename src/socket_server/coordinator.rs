//! Event/poll domain operations
//!
//! [`Coordinator`] owns no state of its own: durable state lives behind
//! [`EventStore`], live state in the [`GroupContext`] passed to every call.
//! Operations are split by entity:
//!
//! - `events.rs`: query, CRUD, publish/unpublish
//! - `polls.rs`: query, CRUD, lifecycle transitions, results
//! - `votes.rs`: ballot submission and lookup
//!
//! Every mutation of the published event or of a poll state runs under
//! [`GroupContext::exclusive`]; vote submission runs under
//! [`GroupContext::shared`]. Broadcasts are emitted only after the store
//! call has succeeded.

use std::sync::Arc;

use crate::error::{PollError, Result};
use crate::schema::{Event, EventId, Poll, PollId, PollState, PollView, PublishedSnapshot};
use crate::socket_server::group_registry::{Audience, GroupContext};
use crate::store::EventStore;
use crate::tally::{tally, ResultsSummary};

/// Domain entry point shared by all connections
pub struct Coordinator {
    store: Arc<dyn EventStore>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Load an event of the context's group. Events of other groups are
    /// reported as absent.
    pub(super) async fn load_event(&self, ctx: &GroupContext, id: EventId) -> Result<Event> {
        match self.store.get_event(id).await? {
            Some(event) if event.group_id == ctx.group_id => Ok(event),
            _ => Err(PollError::not_found("Event", id)),
        }
    }

    /// Load a poll together with its (same-group) event
    pub(super) async fn load_poll(&self, ctx: &GroupContext, id: PollId) -> Result<(Poll, Event)> {
        let poll = self
            .store
            .get_poll(id)
            .await?
            .ok_or_else(|| PollError::not_found("Poll", id))?;
        let event = match self.store.get_event(poll.event_id).await? {
            Some(event) if event.group_id == ctx.group_id => event,
            _ => return Err(PollError::not_found("Poll", id)),
        };
        Ok((poll, event))
    }

    pub(super) async fn results(&self, poll: &Poll) -> Result<ResultsSummary> {
        let votes = self.store.votes_for_poll(poll.id).await?;
        Ok(tally(poll, &votes))
    }

    /// A poll with its results attached once it is closed
    pub(super) async fn view(&self, poll: Poll) -> Result<PollView> {
        let results = if poll.state == PollState::Closed {
            Some(self.results(&poll).await?)
        } else {
            None
        };
        Ok(PollView { poll, results })
    }

    /// Full state of `event`, unshown polls included. The general set gets
    /// [`PublishedSnapshot::for_members`].
    pub async fn snapshot(&self, event: &Event) -> Result<PublishedSnapshot> {
        let polls = self.store.polls_for_event(event.id).await?;
        let mut views = Vec::with_capacity(polls.len());
        for poll in polls {
            views.push(self.view(poll).await?);
        }
        Ok(PublishedSnapshot {
            event: event.summary(),
            polls: views,
        })
    }

    /// Snapshot of the group's published event, if there is one
    pub async fn published_snapshot(&self, ctx: &GroupContext) -> Result<Option<PublishedSnapshot>> {
        let Some(event_id) = ctx.published_event_id() else {
            return Ok(None);
        };
        let event = self.load_event(ctx, event_id).await?;
        Ok(Some(self.snapshot(&event).await?))
    }

    /// Poll broadcasts reach members only while their event is live and
    /// the poll has been shown
    pub(super) fn poll_audience(ctx: &GroupContext, poll: &Poll) -> Audience {
        if ctx.is_published(poll.event_id) && poll.state != PollState::Unshown {
            Audience::Members
        } else {
            Audience::Admins
        }
    }
}
