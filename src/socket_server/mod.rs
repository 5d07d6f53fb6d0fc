//! Live poll socket server
//!
//! A standalone daemon that keeps one coordinator per working group and
//! fans poll activity out to every connected member of that group.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    LIVE POLL SOCKET SERVER (livepoll-daemon)            │
//! │                  Single daemon, multi-group, multi-client               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   GroupRegistry (RwLock<HashMap>)                │   │
//! │  │                                                                  │   │
//! │  │  "802.11" ──► GroupContext {                                     │   │
//! │  │                 published_event_id, admins, general, gate       │   │
//! │  │               }                                                  │   │
//! │  │  "802.3"  ──► GroupContext { ... }                               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  WebSocket Server ──► ConnectionState per client                        │
//! │    - connect handshake (AccessResolver)                                 │
//! │    - Router ──► Coordinator ──► EventStore                              │
//! │    - outbound queue drained into the socket                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! All messages are JSON over WebSocket:
//!
//! ```json
//! // Client -> Server
//! {"type": "connect", "groupId": "802.11", "token": "..."}
//! {"type": "request", "id": 1, "name": "poll:open", "payload": "<poll id>"}
//!
//! // Server -> Client
//! {"type": "connected", "clientId": "...", "groupId": "802.11", ...}
//! {"type": "response", "id": 1, "status": "OK", "data": {...}}
//! {"type": "response", "id": 2, "status": "Error", "error": {"name": "Conflict", "message": "..."}}
//! {"type": "event", "name": "poll:updated", "payload": {...}}
//! ```

pub mod connection;
pub mod coordinator;
mod events;
pub mod group_registry;
mod polls;
pub mod protocol;
pub mod router;
pub mod server;
mod votes;

pub use connection::handle_connection;
pub use coordinator::Coordinator;
pub use group_registry::{Audience, Channel, GroupContext, GroupRegistry, Recipient, RegistryStats};
pub use protocol::{ClientMessage, ConnectionInfo, Reply, ServerMessage};
pub use router::{Command, Router};
pub use server::{serve, Services};
