//! Identity & access resolution
//!
//! Token verification and membership lookup are external services consumed
//! through [`IdentityService`] and [`AccessService`]. [`AccessResolver`]
//! combines them into a [`Session`] for one connection and one group.
//!
//! A missing access grant is `AccessLevel::None`, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::MemberEntry;
use crate::error::{PollError, Result};
use crate::schema::{AccessLevel, GroupId, Member, MemberId, MemberStatus};

/// Credential verification and member lookup
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Verify a bearer token. Unauthorized on any failure.
    async fn verify_token(&self, token: &str) -> Result<MemberId>;

    /// The member as seen from `group_id` (status is per group)
    async fn get_member(&self, member_id: MemberId, group_id: &str) -> Result<Option<Member>>;
}

/// Per-group authorization
#[async_trait]
pub trait AccessService: Send + Sync {
    async fn access_level(&self, member_id: MemberId, group_id: &str) -> Result<AccessLevel>;
}

/// Verified member attached to one group, cached for the connection lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub group_id: GroupId,
    pub member: Member,
    pub access: AccessLevel,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.access.is_admin_channel()
    }

    /// Forbidden unless the session holds at least `required`
    pub fn require(&self, required: AccessLevel) -> Result<()> {
        if self.access >= required {
            Ok(())
        } else {
            Err(PollError::forbidden(format!(
                "{} access required, member {} has {}",
                required, self.member.id, self.access
            )))
        }
    }
}

/// Resolves a connect-time credential into a [`Session`]
#[derive(Clone)]
pub struct AccessResolver {
    identity: Arc<dyn IdentityService>,
    access: Arc<dyn AccessService>,
}

impl AccessResolver {
    pub fn new(identity: Arc<dyn IdentityService>, access: Arc<dyn AccessService>) -> Self {
        Self { identity, access }
    }

    /// Authenticate `token` for `group_id`. No grant in the group is refused
    /// here, so the caller never attaches such a connection.
    pub async fn resolve(&self, token: &str, group_id: &str) -> Result<Session> {
        if group_id.is_empty() {
            return Err(PollError::unauthorized("group id is required"));
        }

        let member_id = self.identity.verify_token(token).await?;
        let access = self.access.access_level(member_id, group_id).await?;
        if access == AccessLevel::None {
            return Err(PollError::unauthorized(format!(
                "member {member_id} has no access to group {group_id}"
            )));
        }

        let member = self
            .identity
            .get_member(member_id, group_id)
            .await?
            .ok_or_else(|| PollError::unauthorized(format!("unknown member {member_id}")))?;

        tracing::info!(
            "Authorized member {} ({}) for group {} with {} access",
            member.id,
            member.name,
            group_id,
            access
        );

        Ok(Session {
            group_id: group_id.to_string(),
            member,
            access,
        })
    }
}

/// Static member directory, loaded from the daemon configuration.
/// Implements both services.
#[derive(Debug, Default)]
pub struct Directory {
    tokens: HashMap<String, MemberId>,
    names: HashMap<MemberId, String>,
    grants: HashMap<(MemberId, GroupId), (AccessLevel, MemberStatus)>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[MemberEntry]) -> Self {
        let mut directory = Self::new();
        for entry in entries {
            directory.add_member(entry.id, &entry.name, &entry.token);
            for grant in &entry.groups {
                directory.grant(entry.id, &grant.group_id, grant.access, grant.status);
            }
        }
        directory
    }

    pub fn add_member(&mut self, id: MemberId, name: &str, token: &str) {
        self.tokens.insert(token.to_string(), id);
        self.names.insert(id, name.to_string());
    }

    pub fn grant(&mut self, id: MemberId, group_id: &str, access: AccessLevel, status: MemberStatus) {
        self.grants.insert((id, group_id.to_string()), (access, status));
    }

    pub fn member_count(&self) -> usize {
        self.names.len()
    }
}

#[async_trait]
impl IdentityService for Directory {
    async fn verify_token(&self, token: &str) -> Result<MemberId> {
        self.tokens
            .get(token)
            .copied()
            .ok_or_else(|| PollError::unauthorized("invalid or expired token"))
    }

    async fn get_member(&self, member_id: MemberId, group_id: &str) -> Result<Option<Member>> {
        let Some(name) = self.names.get(&member_id) else {
            return Ok(None);
        };
        let status = self
            .grants
            .get(&(member_id, group_id.to_string()))
            .map(|(_, status)| *status)
            .unwrap_or_default();
        Ok(Some(Member {
            id: member_id,
            name: name.clone(),
            status,
        }))
    }
}

#[async_trait]
impl AccessService for Directory {
    async fn access_level(&self, member_id: MemberId, group_id: &str) -> Result<AccessLevel> {
        Ok(self
            .grants
            .get(&(member_id, group_id.to_string()))
            .map(|(access, _)| *access)
            .unwrap_or(AccessLevel::None))
    }
}
