//! Data model for live meeting polls
//!
//! Events group polls for one live session; polls collect votes. All payload
//! structs serialize with camelCase field names, which is what the wire
//! protocol speaks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{PollError, Result};
use crate::tally::ResultsSummary;

/// Identifier of a working group (owner of events and of access grants)
pub type GroupId = String;

/// Opaque numeric member identifier issued by the membership service
pub type MemberId = u64;

pub type EventId = Uuid;
pub type PollId = Uuid;

/// Fixed option set of every motion
pub const MOTION_OPTIONS: [&str; 3] = ["Yes", "No", "Abstain"];

// ============================================================================
// Members & access
// ============================================================================

/// Ordered permission tier of a member within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    None,
    #[serde(alias = "ro")]
    ReadOnly,
    #[serde(alias = "rw")]
    ReadWrite,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ReadOnly => "read_only",
            Self::ReadWrite => "read_write",
            Self::Admin => "admin",
        }
    }

    /// Connections at or above this level join the admin channel
    pub fn is_admin_channel(&self) -> bool {
        *self >= Self::ReadWrite
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-group membership status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Voter,
    PotentialVoter,
    Aspirant,
    #[default]
    NonVoter,
    ExOfficio,
}

/// Member identity as resolved for one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub status: MemberStatus,
}

// ============================================================================
// Events
// ============================================================================

/// One live meeting session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub group_id: GroupId,
    pub name: String,
    /// IANA time zone name the session is scheduled in
    pub timezone: String,
    pub datetime: DateTime<Utc>,
    pub is_published: bool,
    /// Internal moderation notes, only visible to admins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Event {
    pub fn new(group_id: impl Into<GroupId>, fields: NewEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id: group_id.into(),
            name: fields.name,
            timezone: fields.timezone,
            datetime: fields.datetime,
            is_published: false,
            notes: fields.notes,
        }
    }

    /// Copy without admin-only fields
    pub fn summary(&self) -> Self {
        Self {
            notes: None,
            ..self.clone()
        }
    }
}

/// Fields accepted by `event:create`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Partial update accepted by `event:update`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventChanges {
    pub name: Option<String>,
    pub timezone: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
    /// Routed through publish/unpublish, never written as a plain field
    pub is_published: Option<bool>,
}

impl EventChanges {
    /// Apply the plain (non-lifecycle) fields
    pub fn apply_fields(&self, event: &mut Event) {
        if let Some(name) = &self.name {
            event.name = name.clone();
        }
        if let Some(tz) = &self.timezone {
            event.timezone = tz.clone();
        }
        if let Some(dt) = self.datetime {
            event.datetime = dt;
        }
        if let Some(notes) = &self.notes {
            event.notes = notes.clone();
        }
    }
}

/// Filters accepted by `event:get`. Always scoped to the caller's group.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    #[serde(default)]
    pub id: Option<EventId>,
    #[serde(default)]
    pub is_published: Option<bool>,
    #[serde(skip)]
    pub group_id: Option<GroupId>,
}

impl EventQuery {
    pub fn matches(&self, event: &Event) -> bool {
        self.id.map_or(true, |id| event.id == id)
            && self.is_published.map_or(true, |p| event.is_published == p)
            && self.group_id.as_ref().map_or(true, |g| &event.group_id == g)
    }
}

// ============================================================================
// Polls
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PollType {
    #[default]
    Motion,
    Strawpoll,
}

/// How many options a single vote may select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PollChoice {
    #[default]
    Single,
    Multiple,
}

/// Lifecycle state, see [`crate::lifecycle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    #[default]
    Unshown,
    Shown,
    Opened,
    Closed,
}

impl PollState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unshown => "unshown",
            Self::Shown => "shown",
            Self::Opened => "opened",
            Self::Closed => "closed",
        }
    }
}

/// Which member statuses may vote on a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VotersType {
    Anyone,
    #[default]
    Voters,
    VotersAndPotential,
}

impl VotersType {
    pub fn admits(&self, status: MemberStatus) -> bool {
        match self {
            Self::Anyone => true,
            Self::Voters => matches!(status, MemberStatus::Voter | MemberStatus::ExOfficio),
            Self::VotersAndPotential => matches!(
                status,
                MemberStatus::Voter | MemberStatus::ExOfficio | MemberStatus::PotentialVoter
            ),
        }
    }
}

/// A motion or straw poll inside an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub event_id: EventId,
    /// Display order within the event
    pub index: u32,
    pub title: String,
    /// Rich-text body (HTML as produced by the editor)
    #[serde(default)]
    pub body: String,
    #[serde(rename = "type")]
    pub poll_type: PollType,
    pub choice: PollChoice,
    pub options: Vec<String>,
    pub state: PollState,
    pub voters: VotersType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_by: Option<MemberId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconded_by: Option<MemberId>,
    pub created: DateTime<Utc>,
}

impl Poll {
    pub fn new(fields: NewPoll, index: u32) -> Self {
        let mut poll = Self {
            id: Uuid::new_v4(),
            event_id: fields.event_id,
            index,
            title: fields.title,
            body: fields.body,
            poll_type: fields.poll_type,
            choice: fields.choice,
            options: fields.options,
            state: PollState::Unshown,
            voters: fields.voters,
            moved_by: fields.moved_by,
            seconded_by: fields.seconded_by,
            created: Utc::now(),
        };
        poll.normalize();
        poll
    }

    /// Enforce the motion shape: single choice over Yes/No/Abstain.
    /// Mover and seconder only exist on motions.
    pub fn normalize(&mut self) {
        match self.poll_type {
            PollType::Motion => {
                self.choice = PollChoice::Single;
                self.options = MOTION_OPTIONS.iter().map(|s| s.to_string()).collect();
            }
            PollType::Strawpoll => {
                self.moved_by = None;
                self.seconded_by = None;
            }
        }
    }

    pub fn is_motion(&self) -> bool {
        self.poll_type == PollType::Motion
    }
}

/// Fields accepted by `poll:create`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPoll {
    pub event_id: EventId,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "type", default)]
    pub poll_type: PollType,
    #[serde(default)]
    pub choice: PollChoice,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub voters: VotersType,
    #[serde(default)]
    pub moved_by: Option<MemberId>,
    #[serde(default)]
    pub seconded_by: Option<MemberId>,
}

/// Partial update accepted by `poll:update`. State is not editable here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PollChanges {
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(rename = "type")]
    pub poll_type: Option<PollType>,
    pub choice: Option<PollChoice>,
    pub options: Option<Vec<String>>,
    pub voters: Option<VotersType>,
    pub index: Option<u32>,
    #[serde(default, deserialize_with = "double_option")]
    pub moved_by: Option<Option<MemberId>>,
    #[serde(default, deserialize_with = "double_option")]
    pub seconded_by: Option<Option<MemberId>>,
}

impl PollChanges {
    fn is_structural(&self) -> bool {
        self.poll_type.is_some() || self.choice.is_some() || self.options.is_some()
    }

    /// Apply to `poll`. Type, choice and options are frozen once a poll has
    /// been opened, since votes refer to option indices.
    pub fn apply(&self, poll: &mut Poll) -> Result<()> {
        if self.is_structural() && matches!(poll.state, PollState::Opened | PollState::Closed) {
            return Err(PollError::validation(format!(
                "cannot change type, choice or options of a {} poll",
                poll.state.as_str()
            )));
        }

        if let Some(title) = &self.title {
            poll.title = title.clone();
        }
        if let Some(body) = &self.body {
            poll.body = body.clone();
        }
        if let Some(t) = self.poll_type {
            poll.poll_type = t;
        }
        if let Some(c) = self.choice {
            poll.choice = c;
        }
        if let Some(options) = &self.options {
            poll.options = options.clone();
        }
        if let Some(v) = self.voters {
            poll.voters = v;
        }
        if let Some(i) = self.index {
            poll.index = i;
        }
        if let Some(m) = self.moved_by {
            poll.moved_by = m;
        }
        if let Some(s) = self.seconded_by {
            poll.seconded_by = s;
        }
        poll.normalize();
        Ok(())
    }
}

/// A poll together with its results, when those may be disclosed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    #[serde(flatten)]
    pub poll: Poll,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<ResultsSummary>,
}

/// Full state of a published event, sent with `event:published`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedSnapshot {
    pub event: Event,
    pub polls: Vec<PollView>,
}

impl PublishedSnapshot {
    /// The snapshot as the general set sees it: unshown polls left out
    pub fn for_members(&self) -> Self {
        Self {
            event: self.event.clone(),
            polls: self
                .polls
                .iter()
                .filter(|view| view.poll.state != PollState::Unshown)
                .cloned()
                .collect(),
        }
    }
}

// ============================================================================
// Votes
// ============================================================================

/// One member's ballot on one poll. Keyed by (poll_id, member_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub poll_id: PollId,
    pub member_id: MemberId,
    /// Selected option indices, sorted ascending
    pub selection: Vec<u32>,
    pub submitted: DateTime<Utc>,
}

/// Distinguishes "field absent" from "field explicitly null"
fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
