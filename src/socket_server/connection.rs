//! WebSocket connection handler
//!
//! One task per socket. The first frame must be `connect`; after that the
//! task multiplexes inbound requests (handled one at a time, in arrival
//! order) with the connection's outbound broadcast queue.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use uuid::Uuid;

use crate::access::Session;
use crate::error::PollError;
use crate::socket_server::group_registry::{ConnectionId, Frame, GroupContext, Recipient};
use crate::socket_server::protocol::{ClientMessage, ConnectionInfo, Reply, ServerMessage};
use crate::socket_server::server::Services;

/// Handle a single WebSocket connection
pub async fn handle_connection(stream: TcpStream, services: Arc<Services>) {
    let addr = stream.peer_addr().ok();
    tracing::info!("New connection from {:?}", addr);

    // Accept WebSocket handshake
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let mut conn = ConnectionState::new(ws_stream, services);
    if let Err(e) = conn.run().await {
        tracing::debug!("Connection {} ended with error: {}", conn.id, e);
    }

    tracing::info!("Connection closed from {:?}", addr);
}

/// Attachment produced by a successful `connect`
struct Joined {
    session: Session,
    ctx: Arc<GroupContext>,
    outbound: mpsc::Receiver<Frame>,
}

/// State for a single connection
struct ConnectionState {
    ws: WebSocketStream<TcpStream>,
    services: Arc<Services>,
    id: ConnectionId,
}

impl ConnectionState {
    fn new(ws: WebSocketStream<TcpStream>, services: Arc<Services>) -> Self {
        Self {
            ws,
            services,
            id: Uuid::new_v4(),
        }
    }

    fn client_id(&self) -> String {
        format!("cli_{}", self.id.simple())
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        let timeout = Duration::from_secs(self.services.config.connect_timeout_secs);
        let (group_id, token) = match tokio::time::timeout(timeout, self.await_connect()).await {
            Ok(Ok(Some(credentials))) => credentials,
            // Peer went away before connecting
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => return self.refuse(&e).await,
            Err(_) => {
                let err = PollError::unauthorized("connect timed out");
                return self.refuse(&err).await;
            }
        };

        let joined = match self.join(&group_id, &token).await {
            Ok(Some(joined)) => joined,
            Ok(None) => return Ok(()),
            Err(e) => return self.refuse(&e).await,
        };

        let Joined {
            session,
            ctx,
            mut outbound,
        } = joined;

        let result = self.serve(&session, &ctx, &mut outbound).await;

        // Cleanup on disconnect
        self.services.leave(&ctx, &self.id);
        tracing::debug!("Member {} left group {}", session.member.id, ctx.group_id);
        result
    }

    /// Wait for the `connect` frame and return its group id and token
    async fn await_connect(&mut self) -> Result<Option<(String, String)>, PollError> {
        loop {
            let text = match self.ws.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                    continue;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Ok(None),
                Some(Ok(_)) => continue,
            };

            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => {
                    let _ = self.send(&ServerMessage::Pong).await;
                }
                Ok(ClientMessage::Connect { group_id, token }) => return Ok(Some((group_id, token))),
                Ok(ClientMessage::Request { .. }) | Err(_) => {
                    return Err(PollError::unauthorized("connect required before any request"));
                }
            }
        }
    }

    /// Authorize the credentials, attach to the group and confirm. Once
    /// attached, every exit path detaches again.
    async fn join(&mut self, group_id: &str, token: &str) -> Result<Option<Joined>, PollError> {
        let session = self.services.resolver.resolve(token, group_id).await?;

        let (tx, outbound) = mpsc::channel(self.services.config.outbound_capacity.max(1));
        let recipient = Recipient::new(self.id, session.member.id, tx);
        let ctx = self.services.join(&session, recipient).await?;

        let info = ConnectionInfo {
            client_id: self.client_id(),
            group_id: session.group_id.clone(),
            member: session.member.clone(),
            access: session.access,
            published_event_id: ctx.published_event_id(),
        };
        if self.send(&ServerMessage::Connected(info)).await.is_err() {
            self.services.leave(&ctx, &self.id);
            return Ok(None);
        }

        Ok(Some(Joined {
            session,
            ctx,
            outbound,
        }))
    }

    /// Reply with the error and close the socket
    async fn refuse(&mut self, err: &PollError) -> anyhow::Result<()> {
        tracing::info!("Refusing connection {}: {}", self.id, err);
        self.send(&ServerMessage::Response(Reply::error(err))).await?;
        self.ws.close(None).await?;
        Ok(())
    }

    async fn serve(
        &mut self,
        session: &Session,
        ctx: &GroupContext,
        outbound: &mut mpsc::Receiver<Frame>,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                biased;

                // Queued broadcasts go out before the next inbound frame
                frame = outbound.recv() => {
                    match frame {
                        Some(frame) => self.ws.send(Message::Text(frame.to_string())).await?,
                        None => break,
                    }
                }

                // Handle incoming WebSocket messages
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let reply = self.handle_message(session, ctx, &text).await;
                            self.send(&reply).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Client {} requested close", self.id);
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = self.ws.send(Message::Pong(data)).await;
                        }
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error: {}", e);
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_message(&self, session: &Session, ctx: &GroupContext, text: &str) -> ServerMessage {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                let err = PollError::validation(format!("malformed frame: {e}"));
                return ServerMessage::Response(Reply::error(&err));
            }
        };

        match msg {
            ClientMessage::Request { id, name, payload } => {
                let reply = self.services.router.handle(session, ctx, &name, payload).await;
                ServerMessage::Response(reply.with_id(Some(id)))
            }
            ClientMessage::Connect { .. } => {
                let err = PollError::validation("already connected");
                ServerMessage::Response(Reply::error(&err))
            }
            ClientMessage::Ping => ServerMessage::Pong,
        }
    }

    async fn send(&mut self, msg: &ServerMessage) -> anyhow::Result<()> {
        let json = serde_json::to_string(msg)?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }
}
