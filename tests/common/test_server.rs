//! Daemon fixture bound to 127.0.0.1:0

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use live_poll::access::Directory;
use live_poll::config::DaemonConfig;
use live_poll::socket_server::{serve, Services};
use live_poll::store::MemoryStore;

pub const GROUP: &str = "802.11";

/// Member directory shared by every integration test
///
/// | token       | id     | access | status     |
/// |-------------|--------|--------|------------|
/// | chair       | 1      | admin  | voter      |
/// | recorder    | 2      | rw     | ex_officio |
/// | voter-10..17| 10..17 | ro     | voter      |
/// | aspirant    | 30     | ro     | aspirant   |
/// | outsider    | 40     | (none) | -          |
pub fn directory_toml(connect_timeout_secs: u64) -> String {
    let mut toml = format!(
        r#"
[server]
outbound_capacity = 64
connect_timeout_secs = {connect_timeout_secs}

[[members]]
id = 1
name = "Chair"
token = "chair"
[[members.groups]]
group_id = "{GROUP}"
access = "admin"
status = "voter"

[[members]]
id = 2
name = "Recorder"
token = "recorder"
[[members.groups]]
group_id = "{GROUP}"
access = "rw"
status = "ex_officio"

[[members]]
id = 30
name = "Aspirant"
token = "aspirant"
[[members.groups]]
group_id = "{GROUP}"
access = "ro"
status = "aspirant"

[[members]]
id = 40
name = "Outsider"
token = "outsider"
"#
    );

    for id in 10..=17 {
        toml.push_str(&format!(
            r#"
[[members]]
id = {id}
name = "Voter {id}"
token = "voter-{id}"
[[members.groups]]
group_id = "{GROUP}"
access = "ro"
status = "voter"
"#
        ));
    }
    toml
}

/// A running daemon
pub struct TestServer {
    pub addr: SocketAddr,
    pub services: Arc<Services>,
    _config_dir: TempDir,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_connect_timeout(10).await
    }

    pub async fn with_connect_timeout(secs: u64) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("livepoll.toml");
        fs::write(&path, directory_toml(secs)).expect("Failed to write config");
        let config = DaemonConfig::load_from(&path).expect("Failed to load config");

        let directory = Arc::new(Directory::from_entries(&config.members));
        let services = Arc::new(Services::new(
            Arc::new(MemoryStore::new()),
            directory.clone(),
            directory,
            config.server.clone(),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let addr = listener.local_addr().expect("No local addr");
        let handle = tokio::spawn(serve(listener, services.clone()));

        Self {
            addr,
            services,
            _config_dir: dir,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
