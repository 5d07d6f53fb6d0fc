//! Vote validation and the tally engine
//!
//! A tally is a pure fold over the votes of one poll: no clocks, no hash
//! iteration order, so the same vote set always produces the same summary.

use serde::{Deserialize, Serialize};

use crate::error::{PollError, Result};
use crate::schema::{Member, Poll, PollChoice, PollType, Vote};

/// Derived results of a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultsSummary {
    Motion {
        yes: u32,
        no: u32,
        abstain: u32,
        total: u32,
    },
    Strawpoll {
        /// Count per option index
        counts: Vec<u32>,
        total: u32,
    },
}

impl ResultsSummary {
    /// Number of ballots counted
    pub fn total(&self) -> u32 {
        match self {
            Self::Motion { total, .. } | Self::Strawpoll { total, .. } => *total,
        }
    }

    /// Yes / (Yes + No) for motions. Abstentions do not count.
    pub fn approval_rate(&self) -> Option<f64> {
        match self {
            Self::Motion { yes, no, .. } if yes + no > 0 => {
                Some(f64::from(*yes) / f64::from(yes + no))
            }
            _ => None,
        }
    }
}

/// Count `votes` for `poll`. Indices outside the option list are ignored.
pub fn tally(poll: &Poll, votes: &[Vote]) -> ResultsSummary {
    let mut counts = vec![0u32; poll.options.len()];
    let mut total = 0u32;

    for vote in votes.iter().filter(|v| v.poll_id == poll.id) {
        total += 1;
        for &index in &vote.selection {
            if let Some(slot) = counts.get_mut(index as usize) {
                *slot += 1;
            }
        }
    }

    match poll.poll_type {
        PollType::Motion => ResultsSummary::Motion {
            yes: counts.first().copied().unwrap_or(0),
            no: counts.get(1).copied().unwrap_or(0),
            abstain: counts.get(2).copied().unwrap_or(0),
            total,
        },
        PollType::Strawpoll => ResultsSummary::Strawpoll { counts, total },
    }
}

/// Check `selection` against the poll's choice cardinality and option count.
/// Returns the normalised (sorted) selection.
pub fn validate_selection(poll: &Poll, selection: &[u32]) -> Result<Vec<u32>> {
    if selection.is_empty() {
        return Err(PollError::validation("selection is empty"));
    }

    let option_count = poll.options.len() as u32;
    if let Some(bad) = selection.iter().find(|&&i| i >= option_count) {
        return Err(PollError::validation(format!(
            "option {bad} out of range (poll has {option_count} options)"
        )));
    }

    let mut normalized = selection.to_vec();
    normalized.sort_unstable();

    match poll.choice {
        PollChoice::Single if normalized.len() != 1 => Err(PollError::validation(
            "single-choice poll takes exactly one option",
        )),
        PollChoice::Multiple if normalized.windows(2).any(|w| w[0] == w[1]) => {
            Err(PollError::validation("duplicate option in selection"))
        }
        _ => Ok(normalized),
    }
}

/// Voter-eligibility gate. Failing it is Forbidden, not Validation.
pub fn check_eligibility(poll: &Poll, member: &Member) -> Result<()> {
    if poll.voters.admits(member.status) {
        Ok(())
    } else {
        Err(PollError::forbidden(format!(
            "member {} ({:?}) may not vote on this poll",
            member.id, member.status
        )))
    }
}
