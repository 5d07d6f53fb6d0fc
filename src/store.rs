//! Persistence interface for events, polls and votes
//!
//! The coordinator only talks to [`EventStore`]; every call is an await
//! point. [`MemoryStore`] is the in-process backend used by the daemon and
//! the tests.
//!
//! # Locking
//!
//! `MemoryStore` keeps one `parking_lot::RwLock` over all tables. Guards are
//! never held across an await.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::schema::{Event, EventId, EventQuery, GroupId, MemberId, Poll, PollId, Vote};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// CRUD surface of the persistence service
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn query_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>>;
    async fn get_event(&self, id: EventId) -> StoreResult<Option<Event>>;
    async fn insert_event(&self, event: Event) -> StoreResult<Event>;
    /// Replace an existing event. `Missing` if it is gone.
    async fn update_event(&self, event: Event) -> StoreResult<Event>;
    /// Delete an event with its polls and their votes. Returns false if absent.
    async fn delete_event(&self, id: EventId) -> StoreResult<bool>;
    /// The event of `group_id` whose published flag is set, if any
    async fn published_event(&self, group_id: &str) -> StoreResult<Option<Event>>;

    /// Polls of an event ordered by `index`
    async fn polls_for_event(&self, event_id: EventId) -> StoreResult<Vec<Poll>>;
    async fn get_poll(&self, id: PollId) -> StoreResult<Option<Poll>>;
    async fn insert_poll(&self, poll: Poll) -> StoreResult<Poll>;
    async fn update_poll(&self, poll: Poll) -> StoreResult<Poll>;
    /// Delete a poll and its votes. Returns false if absent.
    async fn delete_poll(&self, id: PollId) -> StoreResult<bool>;

    /// Insert or replace the vote keyed by (poll_id, member_id)
    async fn upsert_vote(&self, vote: Vote) -> StoreResult<()>;
    /// Votes of a poll ordered by member id
    async fn votes_for_poll(&self, poll_id: PollId) -> StoreResult<Vec<Vote>>;
    async fn get_vote(&self, poll_id: PollId, member_id: MemberId) -> StoreResult<Option<Vote>>;
}

#[derive(Default)]
struct Tables {
    events: HashMap<EventId, Event>,
    polls: HashMap<PollId, Poll>,
    /// Per poll, keyed by member so iteration order is deterministic
    votes: HashMap<PollId, BTreeMap<MemberId, Vote>>,
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events per group (diagnostics)
    pub fn event_counts(&self) -> HashMap<GroupId, usize> {
        let tables = self.tables.read();
        let mut counts = HashMap::new();
        for event in tables.events.values() {
            *counts.entry(event.group_id.clone()).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn query_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        let tables = self.tables.read();
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.datetime.cmp(&b.datetime).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn get_event(&self, id: EventId) -> StoreResult<Option<Event>> {
        Ok(self.tables.read().events.get(&id).cloned())
    }

    async fn insert_event(&self, event: Event) -> StoreResult<Event> {
        self.tables.write().events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn update_event(&self, event: Event) -> StoreResult<Event> {
        let mut tables = self.tables.write();
        match tables.events.get_mut(&event.id) {
            Some(slot) => {
                *slot = event.clone();
                Ok(event)
            }
            None => Err(StoreError::Missing {
                id: event.id.to_string(),
            }),
        }
    }

    async fn delete_event(&self, id: EventId) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        if tables.events.remove(&id).is_none() {
            return Ok(false);
        }
        let poll_ids: Vec<PollId> = tables
            .polls
            .values()
            .filter(|p| p.event_id == id)
            .map(|p| p.id)
            .collect();
        for poll_id in poll_ids {
            tables.polls.remove(&poll_id);
            tables.votes.remove(&poll_id);
        }
        Ok(true)
    }

    async fn published_event(&self, group_id: &str) -> StoreResult<Option<Event>> {
        let tables = self.tables.read();
        Ok(tables
            .events
            .values()
            .find(|e| e.group_id == group_id && e.is_published)
            .cloned())
    }

    async fn polls_for_event(&self, event_id: EventId) -> StoreResult<Vec<Poll>> {
        let tables = self.tables.read();
        let mut polls: Vec<Poll> = tables
            .polls
            .values()
            .filter(|p| p.event_id == event_id)
            .cloned()
            .collect();
        polls.sort_by(|a, b| a.index.cmp(&b.index).then(a.created.cmp(&b.created)));
        Ok(polls)
    }

    async fn get_poll(&self, id: PollId) -> StoreResult<Option<Poll>> {
        Ok(self.tables.read().polls.get(&id).cloned())
    }

    async fn insert_poll(&self, poll: Poll) -> StoreResult<Poll> {
        self.tables.write().polls.insert(poll.id, poll.clone());
        Ok(poll)
    }

    async fn update_poll(&self, poll: Poll) -> StoreResult<Poll> {
        let mut tables = self.tables.write();
        match tables.polls.get_mut(&poll.id) {
            Some(slot) => {
                *slot = poll.clone();
                Ok(poll)
            }
            None => Err(StoreError::Missing {
                id: poll.id.to_string(),
            }),
        }
    }

    async fn delete_poll(&self, id: PollId) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        tables.votes.remove(&id);
        Ok(tables.polls.remove(&id).is_some())
    }

    async fn upsert_vote(&self, vote: Vote) -> StoreResult<()> {
        let mut tables = self.tables.write();
        if !tables.polls.contains_key(&vote.poll_id) {
            return Err(StoreError::Missing {
                id: vote.poll_id.to_string(),
            });
        }
        tables
            .votes
            .entry(vote.poll_id)
            .or_default()
            .insert(vote.member_id, vote);
        Ok(())
    }

    async fn votes_for_poll(&self, poll_id: PollId) -> StoreResult<Vec<Vote>> {
        let tables = self.tables.read();
        Ok(tables
            .votes
            .get(&poll_id)
            .map(|by_member| by_member.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_vote(&self, poll_id: PollId, member_id: MemberId) -> StoreResult<Option<Vote>> {
        let tables = self.tables.read();
        Ok(tables
            .votes
            .get(&poll_id)
            .and_then(|by_member| by_member.get(&member_id))
            .cloned())
    }
}
