//! Event operations: query, CRUD and the publish/unpublish transition

use crate::access::Session;
use crate::error::{PollError, Result};
use crate::schema::{Event, EventChanges, EventId, EventQuery, NewEvent};
use crate::socket_server::coordinator::Coordinator;
use crate::socket_server::group_registry::{Audience, GroupContext};
use crate::socket_server::protocol::{names, EventRef};

impl Coordinator {
    /// Events of the caller's group. Non-admins get summaries only.
    pub async fn get_events(&self, session: &Session, ctx: &GroupContext, mut query: EventQuery) -> Result<Vec<Event>> {
        query.group_id = Some(ctx.group_id.clone());
        let events = self.store().query_events(&query).await?;
        if session.is_admin() {
            Ok(events)
        } else {
            Ok(events.iter().map(Event::summary).collect())
        }
    }

    pub async fn create_event(&self, ctx: &GroupContext, fields: NewEvent) -> Result<Event> {
        if fields.name.trim().is_empty() {
            return Err(PollError::validation("event name is required"));
        }

        let _gate = ctx.exclusive().await;
        let event = self.store().insert_event(Event::new(ctx.group_id.clone(), fields)).await?;
        tracing::info!("Created event {} ({}) in group {}", event.id, event.name, ctx.group_id);
        ctx.emit(Audience::Admins, names::EVENT_ADDED, &event);
        Ok(event)
    }

    /// Update plain fields. A change of `isPublished` is routed through
    /// publish/unpublish; a conflicting publish fails before anything is
    /// written.
    pub async fn update_event(&self, ctx: &GroupContext, id: EventId, changes: EventChanges) -> Result<Event> {
        let _gate = ctx.exclusive().await;
        let mut event = self.load_event(ctx, id).await?;

        if changes.is_published == Some(true) {
            self.check_publishable(ctx, id).await?;
        }

        changes.apply_fields(&mut event);
        if event.name.trim().is_empty() {
            return Err(PollError::validation("event name is required"));
        }
        let mut event = self.store().update_event(event).await?;

        match changes.is_published {
            Some(true) if !ctx.is_published(id) => {
                event = self.publish_locked(ctx, event).await?;
            }
            Some(false) if ctx.is_published(id) => {
                self.unpublish_locked(ctx, id).await?;
                event = self.load_event(ctx, id).await?;
            }
            _ => {}
        }

        tracing::debug!("Updated event {} in group {}", id, ctx.group_id);
        ctx.emit(Audience::Admins, names::EVENT_UPDATED, &event);
        Ok(event)
    }

    /// Delete an event, unpublishing it first if it is live
    pub async fn delete_event(&self, ctx: &GroupContext, id: EventId) -> Result<()> {
        let _gate = ctx.exclusive().await;
        self.load_event(ctx, id).await?;

        if ctx.is_published(id) {
            self.unpublish_locked(ctx, id).await?;
        }

        if !self.store().delete_event(id).await? {
            return Err(PollError::not_found("Event", id));
        }

        tracing::info!("Deleted event {} from group {}", id, ctx.group_id);
        ctx.emit(Audience::Admins, names::EVENT_DELETED, &id);
        Ok(())
    }

    /// Make `id` the group's live event and push the snapshot to everyone
    pub async fn publish_event(&self, ctx: &GroupContext, id: EventId) -> Result<Event> {
        let _gate = ctx.exclusive().await;
        let event = self.load_event(ctx, id).await?;
        self.publish_locked(ctx, event).await
    }

    /// Take `id` off the air. Returns false (with a warning) if it was not
    /// the published event.
    pub async fn unpublish_event(&self, ctx: &GroupContext, id: EventId) -> Result<bool> {
        let _gate = ctx.exclusive().await;
        self.load_event(ctx, id).await?;
        self.unpublish_locked(ctx, id).await
    }

    /// Conflict if another event of the group is published, checked against
    /// both the live context and the store
    async fn check_publishable(&self, ctx: &GroupContext, id: EventId) -> Result<()> {
        if let Some(current) = ctx.published_event_id() {
            if current != id {
                return Err(PollError::conflict(format!(
                    "event {current} is already published in group {}",
                    ctx.group_id
                )));
            }
        }
        if let Some(other) = self.store().published_event(&ctx.group_id).await? {
            if other.id != id {
                return Err(PollError::conflict(format!(
                    "event {} is already published in group {}",
                    other.id, ctx.group_id
                )));
            }
        }
        Ok(())
    }

    /// Caller holds the exclusive gate
    async fn publish_locked(&self, ctx: &GroupContext, mut event: Event) -> Result<Event> {
        self.check_publishable(ctx, event.id).await?;

        if !event.is_published {
            event.is_published = true;
            event = self.store().update_event(event).await?;
        }
        ctx.set_published(Some(event.id));

        let snapshot = self.snapshot(&event).await?;
        tracing::info!(
            "Published event {} in group {} ({} polls)",
            event.id,
            ctx.group_id,
            snapshot.polls.len()
        );
        ctx.emit_split(
            (names::EVENT_PUBLISHED, &snapshot),
            (names::EVENT_PUBLISHED, &snapshot.for_members()),
        );
        Ok(event)
    }

    /// Caller holds the exclusive gate
    async fn unpublish_locked(&self, ctx: &GroupContext, id: EventId) -> Result<bool> {
        if !ctx.is_published(id) {
            tracing::warn!(
                "Ignoring unpublish of event {} in group {}: published is {:?}",
                id,
                ctx.group_id,
                ctx.published_event_id()
            );
            return Ok(false);
        }

        if let Some(mut event) = self.store().get_event(id).await? {
            if event.is_published {
                event.is_published = false;
                self.store().update_event(event).await?;
            }
        }
        ctx.set_published(None);

        tracing::info!("Unpublished event {} in group {}", id, ctx.group_id);
        ctx.emit(Audience::Members, names::EVENT_UNPUBLISHED, &EventRef { event_id: id });
        Ok(true)
    }
}
