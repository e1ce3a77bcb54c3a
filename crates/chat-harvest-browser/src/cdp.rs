//! Minimal Chrome DevTools Protocol client over a WebSocket.
//!
//! Commands carry auto-incrementing ids and are matched to their replies by
//! a background reader task. Protocol events are not consumed by this crate
//! and are dropped on arrival.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Serialize;
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{Mutex, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

use crate::error::BrowserError;

/// Default bound on a single command round trip.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = Result<Value, BrowserError>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

#[derive(Debug, Serialize)]
struct Command<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

/// One DevTools WebSocket connection.
pub struct CdpClient {
    url: String,
    next_id: AtomicU64,
    pending: Pending,
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: JoinHandle<()>,
    command_timeout: Duration,
}

impl CdpClient {
    /// Open a connection to a browser or page endpoint.
    ///
    /// # Errors
    /// Returns error if the WebSocket handshake fails.
    pub async fn connect(url: &str) -> Result<Self, BrowserError> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| BrowserError::Connection {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let (writer, reader) = stream.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&pending)));
        tracing::debug!(url, "Connected to DevTools");

        Ok(Self {
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(writer),
            reader,
            command_timeout: COMMAND_TIMEOUT,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a command and wait for its result.
    ///
    /// # Errors
    /// Returns error if the socket fails, the browser reports an error, or
    /// no reply arrives within the command timeout.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&Command { id, method, params })
            .map_err(|e| BrowserError::Protocol(format!("Failed to encode {method}: {e}")))?;

        // Register before sending so a fast reply cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        tracing::trace!(id, method, "CDP command");
        if let Err(e) = self.writer.lock().await.send(Message::Text(text.into())).await {
            self.pending.lock().await.remove(&id);
            return Err(BrowserError::Protocol(format!("Failed to send {method}: {e}")));
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BrowserError::Protocol(format!(
                "Connection closed while awaiting {method}"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(BrowserError::CommandTimeout {
                    method: method.to_string(),
                    duration: self.command_timeout,
                })
            }
        }
    }

    /// Close the socket. Pending commands fail.
    pub async fn close(&self) {
        if let Err(e) = self.writer.lock().await.close().await {
            tracing::debug!(url = %self.url, error = %e, "DevTools socket already closed");
        }
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(mut reader: SplitStream<WsStream>, pending: Pending) {
    while let Some(message) = reader.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "DevTools socket error, stopping reader");
                break;
            }
        };

        let json: Value = match serde_json::from_str(&text) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable DevTools message");
                continue;
            }
        };

        match parse_reply(&json) {
            Some((id, reply)) => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(reply);
                }
            }
            None => {
                tracing::trace!(method = json.get("method").and_then(serde_json::Value::as_str), "Dropped CDP event");
            }
        }
    }

    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err(BrowserError::Protocol("DevTools connection closed".into())));
    }
}

/// Split a reply into its id and result. Events (no `id`) yield `None`.
fn parse_reply(json: &Value) -> Option<(u64, Reply)> {
    let id = json.get("id")?.as_u64()?;
    if let Some(error) = json.get("error") {
        return Some((
            id,
            Err(BrowserError::Cdp {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
        ));
    }
    Some((id, Ok(json.get("result").cloned().unwrap_or(Value::Null))))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_success_reply() {
        let (id, reply) = parse_reply(&json!({"id": 3, "result": {"frameId": "f1"}})).unwrap();
        assert_eq!(id, 3);
        assert_eq!(reply.unwrap()["frameId"], "f1");
    }

    #[test]
    fn test_parse_error_reply() {
        let (id, reply) = parse_reply(&json!({
            "id": 4,
            "error": {"code": -32601, "message": "'Foo.bar' wasn't found"}
        }))
        .unwrap();
        assert_eq!(id, 4);
        assert!(matches!(reply, Err(BrowserError::Cdp { code: -32601, .. })));
    }

    #[test]
    fn test_events_are_not_replies() {
        assert!(parse_reply(&json!({"method": "Page.loadEventFired", "params": {}})).is_none());
    }

    #[test]
    fn test_command_encoding() {
        let encoded = serde_json::to_value(Command {
            id: 7,
            method: "Runtime.evaluate",
            params: json!({"expression": "1 + 1"}),
        })
        .unwrap();
        assert_eq!(encoded, json!({"id": 7, "method": "Runtime.evaluate", "params": {"expression": "1 + 1"}}));
    }
}
