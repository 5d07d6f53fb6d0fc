//! Group registry and context management
//!
//! One [`GroupContext`] per group with at least one attached connection. It
//! owns the published-event pointer and the two recipient sets:
//!
//! ```text
//! GroupContext
//!   published_event_id ── written only by the coordinator, under `exclusive()`
//!   admins  { conn → Recipient }   ◄── admin_emit
//!   general { conn → Recipient }   ◄── member_emit (also reaches admins)
//!   gate    tokio RwLock<()>       exclusive: publish/transition/CRUD
//!                                  shared:    vote submission
//! ```
//!
//! Every recipient has a single bounded outbound queue, so frames addressed
//! to one connection arrive in emission order regardless of audience.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::error::Result;
use crate::schema::{AccessLevel, EventId, GroupId, MemberId};
use crate::socket_server::protocol::ServerMessage;
use crate::store::EventStore;

/// Identifier of one socket connection
pub type ConnectionId = Uuid;

/// Pre-encoded frame shared by all recipients
pub type Frame = Arc<str>;

/// Which recipient set a connection sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Admin,
    General,
}

impl Channel {
    pub fn for_access(access: AccessLevel) -> Self {
        if access.is_admin_channel() {
            Self::Admin
        } else {
            Self::General
        }
    }
}

/// Who hears a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Admin set only
    Admins,
    /// Admin set and general set
    Members,
}

/// Outbound handle of an attached connection
#[derive(Debug, Clone)]
pub struct Recipient {
    pub id: ConnectionId,
    pub member_id: MemberId,
    tx: mpsc::Sender<Frame>,
}

impl Recipient {
    pub fn new(id: ConnectionId, member_id: MemberId, tx: mpsc::Sender<Frame>) -> Self {
        Self { id, member_id, tx }
    }

    /// Queue a frame without waiting. A full queue drops the frame; the
    /// client catches up from the snapshot on reconnect.
    pub fn deliver(&self, frame: &Frame) -> bool {
        match self.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue full for connection {}, dropping frame", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Emission counters (lock-free)
#[derive(Debug, Default)]
struct EmitCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of a context's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupStats {
    pub admins: usize,
    pub general: usize,
    pub delivered: u64,
    pub dropped: u64,
}

/// Runtime coordinator of one group
#[derive(Debug)]
pub struct GroupContext {
    pub group_id: GroupId,
    published_event_id: RwLock<Option<EventId>>,
    admins: RwLock<HashMap<ConnectionId, Recipient>>,
    general: RwLock<HashMap<ConnectionId, Recipient>>,
    gate: tokio::sync::RwLock<()>,
    counters: EmitCounters,
}

impl GroupContext {
    pub fn new(group_id: impl Into<GroupId>, published_event_id: Option<EventId>) -> Self {
        Self {
            group_id: group_id.into(),
            published_event_id: RwLock::new(published_event_id),
            admins: RwLock::new(HashMap::new()),
            general: RwLock::new(HashMap::new()),
            gate: tokio::sync::RwLock::new(()),
            counters: EmitCounters::default(),
        }
    }

    /// Current published event of the group
    pub fn published_event_id(&self) -> Option<EventId> {
        *self.published_event_id.read()
    }

    /// Only the coordinator's publish/unpublish path calls this
    pub(super) fn set_published(&self, event_id: Option<EventId>) {
        *self.published_event_id.write() = event_id;
    }

    pub fn is_published(&self, event_id: EventId) -> bool {
        self.published_event_id() == Some(event_id)
    }

    /// Serialize operations touching the published-event/poll-state invariant
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    /// Operations that may interleave with each other but not with
    /// `exclusive` ones
    pub async fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Register a connection. A connection is in at most one set.
    pub fn attach(&self, recipient: Recipient, access: AccessLevel) -> Channel {
        let channel = Channel::for_access(access);
        let id = recipient.id;
        match channel {
            Channel::Admin => {
                self.general.write().remove(&id);
                self.admins.write().insert(id, recipient);
            }
            Channel::General => {
                self.admins.write().remove(&id);
                self.general.write().insert(id, recipient);
            }
        }
        tracing::debug!("Attached connection {} to {:?} set of group {}", id, channel, self.group_id);
        channel
    }

    /// Remove a connection from whichever set holds it. Idempotent.
    pub fn detach(&self, id: &ConnectionId) -> bool {
        let from_admins = self.admins.write().remove(id).is_some();
        let from_general = self.general.write().remove(id).is_some();
        from_admins || from_general
    }

    /// Deliver to the admin set only
    pub fn admin_emit(&self, frame: Frame) -> usize {
        self.deliver_to(&self.admins, &frame)
    }

    /// Deliver to the admin set and the general set
    pub fn member_emit(&self, frame: Frame) -> usize {
        self.deliver_to(&self.admins, &frame) + self.deliver_to(&self.general, &frame)
    }

    /// Encode `payload` as an event frame and emit it to `audience`
    pub fn emit<P: Serialize>(&self, audience: Audience, name: &str, payload: &P) -> usize {
        let Some(frame) = Self::encode(name, payload) else {
            return 0;
        };
        tracing::debug!("Emitting {} to {:?} of group {}", name, audience, self.group_id);
        match audience {
            Audience::Admins => self.admin_emit(frame),
            Audience::Members => self.member_emit(frame),
        }
    }

    /// Emit a different frame to each set: `admin` to the admin set and
    /// `general` to the general set. Used where members get a reduced view.
    pub fn emit_split<A: Serialize, G: Serialize>(
        &self,
        admin: (&str, &A),
        general: (&str, &G),
    ) -> usize {
        let (Some(admin_frame), Some(general_frame)) = (Self::encode(admin.0, admin.1), Self::encode(general.0, general.1))
        else {
            return 0;
        };
        tracing::debug!("Emitting {}/{} to split audience of group {}", admin.0, general.0, self.group_id);
        self.deliver_to(&self.admins, &admin_frame) + self.deliver_to(&self.general, &general_frame)
    }

    fn encode<P: Serialize>(name: &str, payload: &P) -> Option<Frame> {
        match ServerMessage::encode_event(name, payload) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::error!("Failed to encode {} broadcast: {}", name, e);
                None
            }
        }
    }

    fn deliver_to(&self, set: &RwLock<HashMap<ConnectionId, Recipient>>, frame: &Frame) -> usize {
        let set = set.read();
        let mut delivered = 0;
        for recipient in set.values() {
            if recipient.deliver(frame) {
                delivered += 1;
            } else {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    pub fn channel_of(&self, id: &ConnectionId) -> Option<Channel> {
        if self.admins.read().contains_key(id) {
            Some(Channel::Admin)
        } else if self.general.read().contains_key(id) {
            Some(Channel::General)
        } else {
            None
        }
    }

    pub fn connection_count(&self) -> usize {
        self.admins.read().len() + self.general.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connection_count() == 0
    }

    pub fn stats(&self) -> GroupStats {
        GroupStats {
            admins: self.admins.read().len(),
            general: self.general.read().len(),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide registry of live group contexts
pub struct GroupRegistry {
    groups: RwLock<HashMap<GroupId, Arc<GroupContext>>>,
    store: Arc<dyn EventStore>,
}

impl GroupRegistry {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub fn get(&self, group_id: &str) -> Option<Arc<GroupContext>> {
        self.groups.read().get(group_id).cloned()
    }

    /// Get or create the context of a group. A new context reloads the
    /// published event from the store.
    pub async fn get_or_create(&self, group_id: &str) -> Result<Arc<GroupContext>> {
        if let Some(ctx) = self.get(group_id) {
            return Ok(ctx);
        }

        let published = self.store.published_event(group_id).await?.map(|e| e.id);

        let mut groups = self.groups.write();
        // Another connection may have created it while we were loading
        if let Some(ctx) = groups.get(group_id) {
            return Ok(ctx.clone());
        }

        tracing::info!(
            "Creating GroupContext for {} (published event: {:?})",
            group_id,
            published
        );
        let ctx = Arc::new(GroupContext::new(group_id, published));
        groups.insert(group_id.to_string(), ctx.clone());
        Ok(ctx)
    }

    /// Attach to `ctx` if it is still the registered context of its group.
    /// Returns None when it was evicted in between; the caller starts over.
    pub fn attach(&self, ctx: &Arc<GroupContext>, recipient: Recipient, access: AccessLevel) -> Option<Channel> {
        let groups = self.groups.read();
        match groups.get(&ctx.group_id) {
            Some(current) if Arc::ptr_eq(current, ctx) => Some(ctx.attach(recipient, access)),
            _ => None,
        }
    }

    /// Detach a connection and dispose of the context if it became idle
    pub fn detach(&self, ctx: &GroupContext, id: &ConnectionId) {
        if ctx.detach(id) {
            tracing::debug!("Detached connection {} from group {}", id, ctx.group_id);
        }
        self.maybe_evict(&ctx.group_id);
    }

    /// Remove a group context if it has no connections
    pub fn maybe_evict(&self, group_id: &str) -> bool {
        let mut groups = self.groups.write();
        if let Some(ctx) = groups.get(group_id) {
            if ctx.is_empty() {
                tracing::info!("Evicting GroupContext for {} (no connections)", group_id);
                groups.remove(group_id);
                return true;
            }
        }
        false
    }

    /// Get all active group ids
    pub fn active_groups(&self) -> Vec<GroupId> {
        self.groups.read().keys().cloned().collect()
    }

    /// Get stats about the registry
    pub fn stats(&self) -> RegistryStats {
        let groups = self.groups.read();
        let total_connections: usize = groups.values().map(|g| g.connection_count()).sum();
        RegistryStats {
            group_count: groups.len(),
            total_connections,
        }
    }
}

/// Statistics about the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub group_count: usize,
    pub total_connections: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NewEvent;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn recipient(capacity: usize) -> (Recipient, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Recipient::new(Uuid::new_v4(), 1, tx), rx)
    }

    #[tokio::test]
    async fn test_attach_splits_sets() {
        let ctx = GroupContext::new("g", None);
        let (admin, _a) = recipient(4);
        let (member, _m) = recipient(4);
        assert_eq!(ctx.attach(admin.clone(), AccessLevel::ReadWrite), Channel::Admin);
        assert_eq!(ctx.attach(member.clone(), AccessLevel::ReadOnly), Channel::General);
        assert_eq!(ctx.stats().admins, 1);
        assert_eq!(ctx.stats().general, 1);
    }

    #[tokio::test]
    async fn test_reattach_moves_between_sets() {
        let ctx = GroupContext::new("g", None);
        let (conn, _rx) = recipient(4);
        ctx.attach(conn.clone(), AccessLevel::ReadOnly);
        ctx.attach(conn.clone(), AccessLevel::Admin);
        assert_eq!(ctx.channel_of(&conn.id), Some(Channel::Admin));
        assert_eq!(ctx.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_detach_idempotent() {
        let ctx = GroupContext::new("g", None);
        let (conn, _rx) = recipient(4);
        ctx.attach(conn.clone(), AccessLevel::ReadOnly);
        assert!(ctx.detach(&conn.id));
        assert!(!ctx.detach(&conn.id));
        assert!(!ctx.detach(&Uuid::new_v4()));
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn test_admins_hear_member_emit() {
        let ctx = GroupContext::new("g", None);
        let (admin, mut admin_rx) = recipient(4);
        let (member, mut member_rx) = recipient(4);
        ctx.attach(admin, AccessLevel::Admin);
        ctx.attach(member, AccessLevel::ReadOnly);

        assert_eq!(ctx.member_emit(Arc::from("both")), 2);
        assert_eq!(ctx.admin_emit(Arc::from("admins")), 1);

        assert_eq!(&*admin_rx.recv().await.unwrap(), "both");
        assert_eq!(&*admin_rx.recv().await.unwrap(), "admins");
        assert_eq!(&*member_rx.recv().await.unwrap(), "both");
        assert!(member_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_split_emit_per_set() {
        let ctx = GroupContext::new("g", None);
        let (admin, mut admin_rx) = recipient(4);
        let (member, mut member_rx) = recipient(4);
        ctx.attach(admin, AccessLevel::Admin);
        ctx.attach(member, AccessLevel::ReadOnly);

        assert_eq!(ctx.emit_split(("poll:updated", &"full"), ("poll:hidden", &"ref")), 2);

        let admin_frame: serde_json::Value = serde_json::from_str(&admin_rx.recv().await.unwrap()).unwrap();
        let member_frame: serde_json::Value = serde_json::from_str(&member_rx.recv().await.unwrap()).unwrap();
        assert_eq!(admin_frame["name"], "poll:updated");
        assert_eq!(admin_frame["payload"], "full");
        assert_eq!(member_frame["name"], "poll:hidden");
        assert!(admin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let ctx = GroupContext::new("g", None);
        let (conn, _rx) = recipient(1);
        ctx.attach(conn, AccessLevel::ReadOnly);
        assert_eq!(ctx.member_emit(Arc::from("one")), 1);
        assert_eq!(ctx.member_emit(Arc::from("two")), 0);
        assert_eq!(ctx.stats().dropped, 1);
        assert_eq!(ctx.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_registry_reloads_published_after_eviction() {
        let store = Arc::new(MemoryStore::new());
        let mut event = crate::schema::Event::new(
            "g",
            NewEvent {
                name: "Plenary".into(),
                timezone: "UTC".into(),
                datetime: Utc::now(),
                notes: None,
            },
        );
        event.is_published = true;
        store.insert_event(event.clone()).await.unwrap();

        let registry = GroupRegistry::new(store);
        let ctx = registry.get_or_create("g").await.unwrap();
        assert_eq!(ctx.published_event_id(), Some(event.id));

        let (conn, _rx) = recipient(4);
        assert!(registry.attach(&ctx, conn.clone(), AccessLevel::ReadOnly).is_some());
        assert_eq!(registry.stats().total_connections, 1);

        registry.detach(&ctx, &conn.id);
        assert_eq!(registry.stats().group_count, 0);

        // A stale context can no longer take connections
        assert!(registry.attach(&ctx, conn, AccessLevel::ReadOnly).is_none());

        let fresh = registry.get_or_create("g").await.unwrap();
        assert!(!Arc::ptr_eq(&ctx, &fresh));
        assert_eq!(fresh.published_event_id(), Some(event.id));
    }

    #[tokio::test]
    async fn test_get_or_create_reuses() {
        let registry = GroupRegistry::new(Arc::new(MemoryStore::new()));
        let a = registry.get_or_create("g").await.unwrap();
        let b = registry.get_or_create("g").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.active_groups(), vec!["g".to_string()]);
    }

    #[tokio::test]
    async fn test_evict_keeps_busy_group() {
        let registry = GroupRegistry::new(Arc::new(MemoryStore::new()));
        let ctx = registry.get_or_create("g").await.unwrap();
        let (conn, _rx) = recipient(4);
        registry.attach(&ctx, conn, AccessLevel::Admin);
        assert!(!registry.maybe_evict("g"));
        assert_eq!(registry.stats().group_count, 1);
    }
}
