//! Vote ledger operations

use chrono::Utc;

use crate::access::Session;
use crate::error::{PollError, Result};
use crate::schema::{PollId, PollState, Vote};
use crate::socket_server::coordinator::Coordinator;
use crate::socket_server::group_registry::{Audience, GroupContext};
use crate::socket_server::protocol::{names, PollResults, VoteRequest};
use crate::tally::{check_eligibility, tally, validate_selection};

impl Coordinator {
    /// Record the caller's ballot, replacing any earlier one, then push the
    /// fresh tally to admins. The ballot itself is never broadcast.
    pub async fn submit_vote(&self, session: &Session, ctx: &GroupContext, request: VoteRequest) -> Result<()> {
        // Transitions take the gate exclusively, so the poll cannot close
        // between the checks below and the upsert.
        let _gate = ctx.shared().await;
        let (poll, _) = self.load_poll(ctx, request.poll_id).await?;

        if poll.state != PollState::Opened {
            return Err(PollError::validation(format!(
                "poll {} is {}, not opened",
                poll.id,
                poll.state.as_str()
            )));
        }
        if !ctx.is_published(poll.event_id) {
            return Err(PollError::validation(format!(
                "event {} is not the published event",
                poll.event_id
            )));
        }

        check_eligibility(&poll, &session.member)?;
        let selection = validate_selection(&poll, &request.selection)?;

        self.store()
            .upsert_vote(Vote {
                poll_id: poll.id,
                member_id: session.member.id,
                selection,
                submitted: Utc::now(),
            })
            .await?;
        tracing::debug!("Recorded vote of member {} on poll {}", session.member.id, poll.id);

        let votes = self.store().votes_for_poll(poll.id).await?;
        let results = PollResults::new(poll.id, tally(&poll, &votes));
        ctx.emit(Audience::Admins, names::POLL_RESULTS, &results);
        Ok(())
    }

    /// The caller's own ballot on a poll, if any
    pub async fn get_vote(&self, session: &Session, ctx: &GroupContext, poll_id: PollId) -> Result<Option<Vote>> {
        self.load_poll(ctx, poll_id).await?;
        Ok(self.store().get_vote(poll_id, session.member.id).await?)
    }
}
