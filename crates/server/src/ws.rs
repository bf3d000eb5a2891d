use crate::groups::{ConnId, GroupLayer, Outbound};
use crate::state::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Every connection is a member of this group for its whole lifetime.
pub const DEFAULT_GROUP: &str = "updates";

/// Close code used when no channel layer is configured.
const CLOSE_NO_LAYER: u16 = 4001;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub async fn updates(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let Some(layer) = state.groups.clone() else {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_NO_LAYER,
                reason: "channel layer unavailable".into(),
            })))
            .await;
        return;
    };

    let conn = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Outbound writer: best-effort, a failed transmit is logged and ends the
    // writer without touching the read side.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(err) = sink.send(Message::Text(text)).await {
                warn!(target: "server::ws", "conn {conn}: outbound send failed: {err}");
                break;
            }
        }
    });

    layer.register(conn, tx.clone());
    layer.add(DEFAULT_GROUP, conn);

    let session = UpdatesSession { conn, layer: layer.clone(), tx };
    session.send_json(&json!({"type": "connected", "group": DEFAULT_GROUP}));

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => session.handle_text(&text),
            Ok(Message::Binary(bytes)) => {
                // Raw bytes count as text when they decode as UTF-8 and are
                // ignored otherwise.
                if let Ok(text) = String::from_utf8(bytes) {
                    session.handle_text(&text);
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(target: "server::ws", "conn {conn}: read error: {err}");
                break;
            }
        }
    }

    layer.discard(DEFAULT_GROUP, conn);
    layer.unregister(conn);
    writer.abort();
}

/// Per-connection frame protocol, separated from the socket plumbing so the
/// contract is testable against a bare group layer.
pub(crate) struct UpdatesSession {
    pub(crate) conn: ConnId,
    pub(crate) layer: Arc<dyn GroupLayer>,
    pub(crate) tx: Outbound,
}

impl UpdatesSession {
    fn send_json(&self, value: &Value) {
        if self.tx.send(value.to_string()).is_err() {
            warn!(target: "server::ws", "conn {}: dropping reply, writer gone", self.conn);
        }
    }

    pub(crate) fn handle_text(&self, text: &str) {
        let data: Value = match serde_json::from_str::<Value>(text) {
            Ok(v) if v.is_object() => v,
            _ => {
                self.send_json(&json!({"ok": true, "echo": {"message": text}}));
                return;
            }
        };

        let action = data
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        let payload = data
            .get("payload")
            .filter(|p| !p.is_null())
            .cloned()
            .unwrap_or_else(|| json!({}));
        let group = data
            .get("channel")
            .and_then(Value::as_str)
            .filter(|g| !g.is_empty())
            .unwrap_or(DEFAULT_GROUP);

        match action.as_str() {
            "join" => {
                self.layer.add(group, self.conn);
                self.send_json(&json!({"ok": true, "joined": group}));
            }
            "leave" => {
                self.layer.discard(group, self.conn);
                self.send_json(&json!({"ok": true, "left": group}));
            }
            "ping" => {
                self.send_json(&json!({"type": "pong", "echo": payload}));
            }
            "broadcast" => {
                let event = json!({"type": "update", "group": group, "data": payload});
                let delivered = self.layer.send_to_group(group, &event.to_string());
                debug!(
                    target: "server::ws",
                    "conn {}: broadcast to {group} reached {delivered} member(s)", self.conn
                );
                self.send_json(&json!({"ok": true, "sent": true, "group": group}));
            }
            _ => {
                self.send_json(&json!({"ok": true, "received": data}));
            }
        }
    }
}
