//! Protocol-level WebSocket client

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

pub struct WsClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    /// Broadcasts received while waiting for a response
    events: VecDeque<(String, Value)>,
}

impl WsClient {
    /// Open a socket without sending anything
    pub async fn open(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("Failed to open socket");
        Self {
            ws,
            next_id: 1,
            events: VecDeque::new(),
        }
    }

    /// Open and send `connect`, returning the server's first frame
    pub async fn connect(url: &str, group_id: &str, token: &str) -> (Self, Value) {
        let mut client = Self::open(url).await;
        client
            .send(json!({"type": "connect", "groupId": group_id, "token": token}))
            .await;
        let first = client.recv().await.expect("No reply to connect");
        (client, first)
    }

    /// Connect and assert success
    pub async fn join(url: &str, group_id: &str, token: &str) -> Self {
        let (client, first) = Self::connect(url, group_id, token).await;
        assert_eq!(first["type"], "connected", "connect refused: {first}");
        client
    }

    pub async fn send(&mut self, frame: Value) {
        self.ws
            .send(Message::Text(frame.to_string()))
            .await
            .expect("Failed to send frame");
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("Failed to send frame");
    }

    /// Next JSON frame, or None when the socket closed or nothing arrived in time
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws.next()).await.ok()??;
            match msg {
                Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Send a request and wait for its response, buffering broadcasts
    pub async fn request(&mut self, name: &str, payload: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        self.send(json!({"type": "request", "id": id, "name": name, "payload": payload}))
            .await;

        loop {
            let frame = self.recv().await.expect("Socket closed before response");
            match frame["type"].as_str() {
                Some("response") if frame["id"] == id => return frame,
                Some("event") => self.buffer(frame),
                _ => {}
            }
        }
    }

    /// Request and assert OK, returning `data`
    pub async fn ok(&mut self, name: &str, payload: Value) -> Value {
        let reply = self.request(name, payload).await;
        assert_eq!(reply["status"], "OK", "{name} failed: {reply}");
        reply.get("data").cloned().unwrap_or(Value::Null)
    }

    /// Request and return the error name
    pub async fn error(&mut self, name: &str, payload: Value) -> String {
        let reply = self.request(name, payload).await;
        assert_eq!(reply["status"], "Error", "{name} unexpectedly succeeded: {reply}");
        reply["error"]["name"].as_str().unwrap_or_default().to_string()
    }

    fn buffer(&mut self, frame: Value) {
        let name = frame["name"].as_str().unwrap_or_default().to_string();
        self.events.push_back((name, frame["payload"].clone()));
    }

    /// Next broadcast, buffered or fresh
    pub async fn next_event(&mut self) -> Option<(String, Value)> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        loop {
            let frame = self.recv().await?;
            if frame["type"] == "event" {
                let name = frame["name"].as_str().unwrap_or_default().to_string();
                return Some((name, frame["payload"].clone()));
            }
        }
    }

    /// Next broadcast, asserting its name
    pub async fn expect_event(&mut self, name: &str) -> Value {
        let (got, payload) = self.next_event().await.unwrap_or_else(|| panic!("no {name} broadcast"));
        assert_eq!(got, name, "unexpected broadcast {got}: {payload}");
        payload
    }

    /// Discard every broadcast received up to a ping round trip
    pub async fn settle(&mut self) {
        self.events.clear();
        self.send(json!({"type": "ping"})).await;
        while let Some(frame) = self.recv().await {
            if frame["type"] == "pong" {
                return;
            }
        }
        panic!("No pong");
    }

    /// Assert nothing else is pending, using a ping round trip as a fence
    pub async fn expect_quiet(&mut self) {
        assert!(self.events.is_empty(), "unexpected broadcasts {:?}", self.events);
        self.send(json!({"type": "ping"})).await;
        let frame = self.recv().await.expect("No pong");
        assert_eq!(frame["type"], "pong", "unexpected frame before pong: {frame}");
    }
}
