//! Live-Poll: real-time meeting polls for working groups
//!
//! An administrator creates events (one per live session) holding an ordered
//! list of polls, publishes one event per group at a time and drives each
//! poll through `unshown → shown → opened → closed`. Connected members vote
//! while a poll is open; admins watch the tally live and everybody sees the
//! result once the poll closes.
//!
//! # Modules
//!
//! - [`schema`]: events, polls, votes, members and access levels
//! - [`lifecycle`]: the poll state machine
//! - [`tally`]: selection validation, voter eligibility and result folding
//! - [`access`]: token and access-level resolution
//! - [`store`]: persistence interface and the in-memory backend
//! - [`socket_server`]: group contexts, request routing and the WebSocket daemon
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use live_poll::{access::Directory, config::SocketConfig, socket_server::Services, store::MemoryStore};
//!
//! let directory = Arc::new(Directory::new());
//! let services = Services::new(Arc::new(MemoryStore::new()), directory.clone(), directory, SocketConfig::default());
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9850").await?;
//! live_poll::socket_server::serve(listener, Arc::new(services)).await?;
//! ```

pub mod access;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod schema;
pub mod socket_server;
pub mod store;
pub mod tally;

// Re-export commonly used types
pub use access::{AccessResolver, AccessService, Directory, IdentityService, Session};
pub use config::DaemonConfig;
pub use error::{ConfigError, PollError, Result, StoreError};
pub use lifecycle::{next_state, transition, PollAction};
pub use schema::{
    AccessLevel, Event, EventId, GroupId, Member, MemberId, MemberStatus, Poll, PollChoice, PollId, PollState,
    PollType, PollView, PublishedSnapshot, Vote, VotersType,
};
pub use store::{EventStore, MemoryStore};
pub use tally::{tally, ResultsSummary};
