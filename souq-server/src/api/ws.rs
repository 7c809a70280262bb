//! WebSocket 实时会话
//!
//! 连接建立后立即回发 `connected` 握手，并自动订阅默认通道
//! （user:{id}、携带门店身份时的 store:{id}、global）。客户端可
//! 随时订阅/退订 city 等附加通道。
//!
//! 每个订阅一个转发任务：广播接收端 -> 连接自己的 mpsc 出口，
//! 写循环串行化所有出站消息。Lagged 意味着该订阅积压超过通道
//! 容量，中间的通知被丢弃（at-most-once，不补发）。

use std::collections::HashMap;
use std::str::FromStr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use shared::message::{Channel, ClientMessage, Notification, ServerMessage};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: i64,
    /// 卖家端连接携带门店 ID
    pub store_id: Option<i64>,
}

/// GET /ws — upgrade to WebSocket
pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state, params))
}

async fn handle_session(socket: WebSocket, state: AppState, params: WsParams) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection_id = state
        .registry
        .register(params.user_id, params.store_id, out_tx.clone());

    // 握手
    if out_tx
        .send(ServerMessage::Connected { connection_id })
        .is_err()
    {
        state.registry.remove(&connection_id);
        return;
    }

    // 默认订阅
    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();
    let mut defaults = vec![Channel::User(params.user_id), Channel::Global];
    if let Some(store_id) = params.store_id {
        defaults.push(Channel::Store(store_id));
    }
    for channel in defaults {
        let rx = state.hub.subscribe(&channel);
        subscriptions.insert(channel.to_string(), spawn_forwarder(rx, out_tx.clone()));
    }

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                let Some(message) = outgoing else { break };
                let Ok(json) = serde_json::to_string(&message) else { continue };
                if ws_sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &state, &out_tx, &mut subscriptions);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary/ping/pong frames ignored
                    Some(Err(e)) => {
                        tracing::warn!(%connection_id, error = %e, "websocket read failed");
                        break;
                    }
                }
            }
        }
    }

    for (_, task) in subscriptions {
        task.abort();
    }
    state.registry.remove(&connection_id);
}

fn handle_client_message(
    text: &str,
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<ServerMessage>,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let _ = out_tx.send(ServerMessage::Error {
                message: format!("invalid message: {e}"),
            });
            return;
        }
    };

    match message {
        ClientMessage::Ping => {
            let _ = out_tx.send(ServerMessage::Pong);
        }
        ClientMessage::Subscribe { channel } => match Channel::from_str(&channel) {
            Ok(parsed) => {
                let key = parsed.to_string();
                if !subscriptions.contains_key(&key) {
                    let rx = state.hub.subscribe(&parsed);
                    subscriptions.insert(key.clone(), spawn_forwarder(rx, out_tx.clone()));
                }
                let _ = out_tx.send(ServerMessage::Subscribed { channel: key });
            }
            Err(e) => {
                let _ = out_tx.send(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        },
        ClientMessage::Unsubscribe { channel } => {
            if let Some(task) = subscriptions.remove(&channel) {
                task.abort();
                let _ = out_tx.send(ServerMessage::Unsubscribed { channel });
            } else {
                let _ = out_tx.send(ServerMessage::Error {
                    message: format!("not subscribed: {channel}"),
                });
            }
        }
    }
}

/// 订阅转发任务：通道广播 -> 连接出口
fn spawn_forwarder(
    mut rx: broadcast::Receiver<Notification>,
    out_tx: mpsc::UnboundedSender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    if out_tx.send(ServerMessage::Notification(notification)).is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "slow subscriber, notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}
