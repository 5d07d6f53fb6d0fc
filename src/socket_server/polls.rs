//! Poll operations: query, CRUD, lifecycle transitions and results

use crate::access::Session;
use crate::error::{PollError, Result};
use crate::lifecycle::{self, PollAction};
use crate::schema::{EventId, NewPoll, Poll, PollChanges, PollId, PollState, PollView};
use crate::socket_server::coordinator::Coordinator;
use crate::socket_server::group_registry::{Audience, GroupContext};
use crate::socket_server::protocol::{names, PollRef, PollResults};

impl Coordinator {
    /// Polls of an event in display order. Non-admins do not see polls that
    /// are still unshown.
    pub async fn get_polls(&self, session: &Session, ctx: &GroupContext, event_id: EventId) -> Result<Vec<PollView>> {
        self.load_event(ctx, event_id).await?;
        let polls = self.store().polls_for_event(event_id).await?;

        let mut views = Vec::with_capacity(polls.len());
        for poll in polls {
            if !session.is_admin() && poll.state == PollState::Unshown {
                continue;
            }
            views.push(self.view(poll).await?);
        }
        Ok(views)
    }

    /// Create a poll at the end of its event
    pub async fn create_poll(&self, ctx: &GroupContext, fields: NewPoll) -> Result<Poll> {
        if fields.title.trim().is_empty() {
            return Err(PollError::validation("poll title is required"));
        }

        let _gate = ctx.exclusive().await;
        self.load_event(ctx, fields.event_id).await?;
        let index = self
            .store()
            .polls_for_event(fields.event_id)
            .await?
            .iter()
            .map(|poll| poll.index + 1)
            .max()
            .unwrap_or(0);
        let poll = self.store().insert_poll(Poll::new(fields, index)).await?;

        tracing::info!("Created poll {} (#{}) in event {}", poll.id, poll.index, poll.event_id);
        ctx.emit(Self::poll_audience(ctx, &poll), names::POLL_ADDED, &poll);
        Ok(poll)
    }

    pub async fn update_poll(&self, ctx: &GroupContext, id: PollId, changes: PollChanges) -> Result<Poll> {
        let _gate = ctx.exclusive().await;
        let (mut poll, _) = self.load_poll(ctx, id).await?;
        changes.apply(&mut poll)?;
        if poll.title.trim().is_empty() {
            return Err(PollError::validation("poll title is required"));
        }

        let poll = self.store().update_poll(poll).await?;
        let view = self.view(poll.clone()).await?;
        tracing::debug!("Updated poll {} in event {}", poll.id, poll.event_id);
        ctx.emit(Self::poll_audience(ctx, &poll), names::POLL_UPDATED, &view);
        Ok(poll)
    }

    /// Delete a poll and its votes
    pub async fn delete_poll(&self, ctx: &GroupContext, id: PollId) -> Result<()> {
        let _gate = ctx.exclusive().await;
        let (poll, _) = self.load_poll(ctx, id).await?;
        if !self.store().delete_poll(id).await? {
            return Err(PollError::not_found("Poll", id));
        }

        tracing::info!("Deleted poll {} from event {}", id, poll.event_id);
        ctx.emit(
            Self::poll_audience(ctx, &poll),
            names::POLL_DELETED,
            &PollRef {
                id,
                event_id: poll.event_id,
            },
        );
        Ok(())
    }

    /// Drive a poll through its lifecycle. Members hear about it only when
    /// the poll's event is published; a closing poll carries its results.
    /// `show` is the first time members see a poll, and `hide` tells them
    /// to drop it.
    pub async fn transition_poll(&self, ctx: &GroupContext, id: PollId, action: PollAction) -> Result<PollView> {
        let _gate = ctx.exclusive().await;
        let (mut poll, _) = self.load_poll(ctx, id).await?;
        let from = lifecycle::transition(&mut poll, action)?;

        let poll = self.store().update_poll(poll).await?;
        let view = self.view(poll).await?;
        tracing::info!(
            "Poll {} {} -> {} (event {})",
            id,
            from.as_str(),
            view.poll.state.as_str(),
            view.poll.event_id
        );

        if !ctx.is_published(view.poll.event_id) {
            return Ok(view);
        }
        if view.poll.state == PollState::Unshown {
            let hidden = PollRef {
                id,
                event_id: view.poll.event_id,
            };
            ctx.emit_split((names::POLL_UPDATED, &view), (names::POLL_HIDDEN, &hidden));
        } else {
            ctx.emit(Audience::Members, names::POLL_UPDATED, &view);
        }
        Ok(view)
    }

    /// Current tally. Non-admins may only see results of a closed poll.
    pub async fn poll_results(&self, session: &Session, ctx: &GroupContext, id: PollId) -> Result<PollResults> {
        let (poll, _) = self.load_poll(ctx, id).await?;
        if !session.is_admin() && poll.state != PollState::Closed {
            return Err(PollError::forbidden("results are disclosed once the poll is closed"));
        }
        let results = self.results(&poll).await?;
        Ok(PollResults::new(poll.id, results))
    }
}

#[cfg(test)]
mod tests {
    use crate::lifecycle::PollAction;
    use crate::schema::{AccessLevel, PollChanges, PollState};
    use crate::socket_server::coordinator::fixtures::*;
    use crate::socket_server::group_registry::GroupContext;

    #[tokio::test]
    async fn test_create_assigns_index_and_motion_shape() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();

        let first = coord.create_poll(&ctx, motion(event.id)).await.unwrap();
        let mut fields = motion(event.id);
        fields.options = vec!["Maybe".into()];
        let second = coord.create_poll(&ctx, fields).await.unwrap();

        assert_eq!(first.index, 0);
        assert_eq!(second.index, 1);
        assert_eq!(second.options, vec!["Yes", "No", "Abstain"]);
    }

    #[tokio::test]
    async fn test_index_not_reused_after_delete() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();
        let mut polls = Vec::new();
        for _ in 0..3 {
            polls.push(coord.create_poll(&ctx, motion(event.id)).await.unwrap());
        }

        coord.delete_poll(&ctx, polls[0].id).await.unwrap();
        let next = coord.create_poll(&ctx, motion(event.id)).await.unwrap();
        assert_eq!(next.index, 3);
    }

    #[tokio::test]
    async fn test_unshown_poll_reaches_admins_only() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let mut member_rx = listen(&ctx, AccessLevel::ReadOnly);
        let mut admin_rx = listen(&ctx, AccessLevel::Admin);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();
        coord.publish_event(&ctx, event.id).await.unwrap();
        drain(&mut member_rx);
        drain(&mut admin_rx);

        let poll = coord.create_poll(&ctx, motion(event.id)).await.unwrap();
        let changes = PollChanges {
            title: Some("Approve amended agenda".into()),
            ..Default::default()
        };
        coord.update_poll(&ctx, poll.id, changes).await.unwrap();

        assert!(drain(&mut member_rx).is_empty());
        assert_eq!(frame_names(&drain(&mut admin_rx)), vec!["poll:added", "poll:updated"]);

        // Members first learn about the poll when it is shown
        coord.transition_poll(&ctx, poll.id, PollAction::Show).await.unwrap();
        let frames = drain(&mut member_rx);
        assert_eq!(frame_names(&frames), vec!["poll:updated"]);
        assert_eq!(frames[0].1["title"], "Approve amended agenda");
    }

    #[tokio::test]
    async fn test_hide_sends_members_a_reference_only() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let mut member_rx = listen(&ctx, AccessLevel::ReadOnly);
        let mut admin_rx = listen(&ctx, AccessLevel::Admin);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();
        let poll = coord.create_poll(&ctx, motion(event.id)).await.unwrap();
        coord.publish_event(&ctx, event.id).await.unwrap();
        coord.transition_poll(&ctx, poll.id, PollAction::Show).await.unwrap();
        drain(&mut member_rx);
        drain(&mut admin_rx);

        coord.transition_poll(&ctx, poll.id, PollAction::Hide).await.unwrap();

        let member_frames = drain(&mut member_rx);
        assert_eq!(frame_names(&member_frames), vec!["poll:hidden"]);
        assert_eq!(member_frames[0].1["id"], poll.id.to_string());
        assert!(member_frames[0].1.get("title").is_none());
        let admin_frames = drain(&mut admin_rx);
        assert_eq!(frame_names(&admin_frames), vec!["poll:updated"]);
        assert_eq!(admin_frames[0].1["state"], "unshown");

        // Deleting it now stays among admins
        coord.delete_poll(&ctx, poll.id).await.unwrap();
        assert!(drain(&mut member_rx).is_empty());
    }

    #[tokio::test]
    async fn test_transition_silent_when_unpublished() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let mut member_rx = listen(&ctx, AccessLevel::ReadOnly);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();
        let poll = coord.create_poll(&ctx, motion(event.id)).await.unwrap();

        let view = coord.transition_poll(&ctx, poll.id, PollAction::Show).await.unwrap();
        assert_eq!(view.poll.state, PollState::Shown);
        assert!(drain(&mut member_rx).is_empty());
    }

    #[tokio::test]
    async fn test_transition_broadcasts_when_published() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let mut member_rx = listen(&ctx, AccessLevel::ReadOnly);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();
        let poll = coord.create_poll(&ctx, motion(event.id)).await.unwrap();
        coord.publish_event(&ctx, event.id).await.unwrap();
        drain(&mut member_rx);

        coord.transition_poll(&ctx, poll.id, PollAction::Show).await.unwrap();
        coord.transition_poll(&ctx, poll.id, PollAction::Open).await.unwrap();
        coord.transition_poll(&ctx, poll.id, PollAction::Close).await.unwrap();

        let frames = drain(&mut member_rx);
        assert_eq!(frame_names(&frames), vec!["poll:updated"; 3]);
        assert_eq!(frames[1].1["state"], "opened");
        assert!(frames[1].1.get("results").is_none());
        assert_eq!(frames[2].1["state"], "closed");
        assert_eq!(frames[2].1["results"]["kind"], "motion");
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_state() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();
        let poll = coord.create_poll(&ctx, motion(event.id)).await.unwrap();

        let err = coord.transition_poll(&ctx, poll.id, PollAction::Open).await.unwrap_err();
        assert_eq!(err.name(), "Validation");
        let stored = coord.store().get_poll(poll.id).await.unwrap().unwrap();
        assert_eq!(stored.state, PollState::Unshown);
    }

    #[tokio::test]
    async fn test_strawpoll_with_one_option_cannot_open() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();
        let poll = coord.create_poll(&ctx, strawpoll(event.id, &["Only"])).await.unwrap();
        coord.transition_poll(&ctx, poll.id, PollAction::Show).await.unwrap();
        let err = coord.transition_poll(&ctx, poll.id, PollAction::Open).await.unwrap_err();
        assert_eq!(err.name(), "Validation");
    }

    #[tokio::test]
    async fn test_non_admin_poll_listing_hides_unshown() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();
        let shown = coord.create_poll(&ctx, motion(event.id)).await.unwrap();
        coord.create_poll(&ctx, motion(event.id)).await.unwrap();
        coord.transition_poll(&ctx, shown.id, PollAction::Show).await.unwrap();

        assert_eq!(coord.get_polls(&admin(), &ctx, event.id).await.unwrap().len(), 2);
        let visible = coord.get_polls(&attendee(9), &ctx, event.id).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].poll.id, shown.id);
    }

    #[tokio::test]
    async fn test_results_forbidden_to_members_until_closed() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();
        let poll = coord.create_poll(&ctx, motion(event.id)).await.unwrap();

        let err = coord.poll_results(&attendee(9), &ctx, poll.id).await.unwrap_err();
        assert_eq!(err.name(), "Forbidden");
        let results = coord.poll_results(&admin(), &ctx, poll.id).await.unwrap();
        assert_eq!(results.results.total(), 0);
        assert!(results.approval_rate.is_none());
    }

    #[tokio::test]
    async fn test_update_structural_rejected_while_opened() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();
        let poll = coord.create_poll(&ctx, strawpoll(event.id, &["A", "B"])).await.unwrap();
        coord.transition_poll(&ctx, poll.id, PollAction::Show).await.unwrap();
        coord.transition_poll(&ctx, poll.id, PollAction::Open).await.unwrap();

        let changes = PollChanges {
            options: Some(vec!["C".into(), "D".into()]),
            ..Default::default()
        };
        let err = coord.update_poll(&ctx, poll.id, changes).await.unwrap_err();
        assert_eq!(err.name(), "Validation");
    }

    #[tokio::test]
    async fn test_delete_poll_broadcast_audience() {
        let coord = coordinator();
        let ctx = GroupContext::new(GROUP, None);
        let mut member_rx = listen(&ctx, AccessLevel::ReadOnly);
        let mut admin_rx = listen(&ctx, AccessLevel::Admin);
        let event = coord.create_event(&ctx, new_event("Plenary")).await.unwrap();
        let poll = coord.create_poll(&ctx, motion(event.id)).await.unwrap();
        drain(&mut admin_rx);

        coord.delete_poll(&ctx, poll.id).await.unwrap();
        let frames = drain(&mut admin_rx);
        assert_eq!(frame_names(&frames), vec!["poll:deleted"]);
        assert_eq!(frames[0].1["eventId"], event.id.to_string());
        assert!(drain(&mut member_rx).is_empty());
        assert!(coord.store().get_poll(poll.id).await.unwrap().is_none());
    }
}
