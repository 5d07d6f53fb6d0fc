//! Common test utilities and fixtures for live-poll integration tests
//!
//! This module provides:
//! - `TestServer`, a daemon bound to an ephemeral port with a seeded member directory
//! - `WsClient`, a protocol-level WebSocket client that buffers broadcasts
//! - Domain fixtures for building events and polls without a socket

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod client;
pub mod fixtures;
pub mod test_server;

pub use client::WsClient;
pub use fixtures::*;
pub use test_server::TestServer;
