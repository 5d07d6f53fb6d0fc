//! Shared services and the accept loop

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::access::{AccessResolver, AccessService, IdentityService, Session};
use crate::config::SocketConfig;
use crate::error::{Result, StoreError};
use crate::socket_server::connection::handle_connection;
use crate::socket_server::coordinator::Coordinator;
use crate::socket_server::group_registry::{Channel, ConnectionId, GroupContext, GroupRegistry, Recipient};
use crate::socket_server::protocol::{names, ServerMessage};
use crate::socket_server::router::Router;
use crate::store::EventStore;

/// Everything a connection needs, shared across all of them
pub struct Services {
    pub registry: GroupRegistry,
    pub resolver: AccessResolver,
    pub router: Router,
    pub config: SocketConfig,
}

impl Services {
    pub fn new(
        store: Arc<dyn EventStore>,
        identity: Arc<dyn IdentityService>,
        access: Arc<dyn AccessService>,
        config: SocketConfig,
    ) -> Self {
        let coordinator = Arc::new(Coordinator::new(store.clone()));
        Self {
            registry: GroupRegistry::new(store),
            resolver: AccessResolver::new(identity, access),
            router: Router::new(coordinator),
            config,
        }
    }

    /// Attach an authorized connection to its group. When an event is
    /// published, its snapshot is queued to the new connection before any
    /// delta can be: both happen under the group's exclusive gate.
    pub async fn join(&self, session: &Session, recipient: Recipient) -> Result<Arc<GroupContext>> {
        loop {
            let ctx = self.registry.get_or_create(&session.group_id).await?;
            let gate = ctx.exclusive().await;

            let Some(channel) = self.registry.attach(&ctx, recipient.clone(), session.access) else {
                tracing::debug!("GroupContext for {} was evicted during attach, retrying", session.group_id);
                continue;
            };

            let queued = self.queue_snapshot(&ctx, &recipient, channel).await;
            drop(gate);
            if let Err(e) = queued {
                self.registry.detach(&ctx, &recipient.id);
                return Err(e);
            }

            tracing::info!(
                "Member {} joined group {} ({:?})",
                session.member.id,
                session.group_id,
                self.registry.stats()
            );
            return Ok(ctx);
        }
    }

    async fn queue_snapshot(&self, ctx: &GroupContext, recipient: &Recipient, channel: Channel) -> Result<()> {
        if let Some(mut snapshot) = self.router.coordinator().published_snapshot(ctx).await? {
            if channel == Channel::General {
                snapshot = snapshot.for_members();
            }
            let frame = ServerMessage::encode_event(names::EVENT_PUBLISHED, &snapshot).map_err(StoreError::from)?;
            recipient.deliver(&frame);
        }
        Ok(())
    }

    /// Detach a connection, disposing of the group context when it was the last
    pub fn leave(&self, ctx: &GroupContext, id: &ConnectionId) {
        self.registry.detach(ctx, id);
    }
}

/// Accept connections until the listener fails
pub async fn serve(listener: TcpListener, services: Arc<Services>) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::info!("Accepted connection from {}", addr);
                let services = Arc::clone(&services);
                tokio::spawn(async move {
                    handle_connection(stream, services).await;
                });
            }
            Err(e) => {
                tracing::error!("Failed to accept connection: {}", e);
            }
        }
    }
}
