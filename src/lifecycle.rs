//! Poll lifecycle state machine
//!
//! ```text
//!            show            open            close
//! unshown ─────────► shown ────────► opened ────────► closed
//!    ▲                 │               ▲                 │
//!    └──────hide───────┘               └────reopen───────┘
//! ```
//!
//! Transitions are admin commands. Nothing leads back to `unshown` or
//! `shown` from `closed`; a closed poll can only be reopened.

use serde::{Deserialize, Serialize};

use crate::error::{PollError, Result};
use crate::schema::{Poll, PollState, PollType};

/// Admin command driving a poll through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollAction {
    Show,
    Hide,
    Open,
    Close,
}

impl PollAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Hide => "hide",
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

/// Target state of `action` applied to `from`, or Validation if illegal.
pub fn next_state(from: PollState, action: PollAction) -> Result<PollState> {
    use PollAction::*;
    use PollState::*;

    match (from, action) {
        (Unshown, Show) => Ok(Shown),
        (Shown, Hide) => Ok(Unshown),
        (Shown, Open) | (Closed, Open) => Ok(Opened),
        (Opened, Close) => Ok(Closed),
        _ => Err(PollError::validation(format!(
            "cannot {} a poll that is {}",
            action.as_str(),
            from.as_str()
        ))),
    }
}

/// Apply `action` to `poll` in place, checking per-type preconditions.
/// Returns the previous state.
pub fn transition(poll: &mut Poll, action: PollAction) -> Result<PollState> {
    let to = next_state(poll.state, action)?;

    if to == PollState::Opened && poll.poll_type == PollType::Strawpoll && poll.options.len() < 2 {
        return Err(PollError::validation(
            "a strawpoll needs at least two options before it can be opened",
        ));
    }

    let from = poll.state;
    poll.state = to;
    Ok(from)
}
