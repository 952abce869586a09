//! 任务状态的WebSocket推送
//!
//! 每个连接注册为一个观察者。客户端可以发送 `{"subscribe": "<task_id>"}`
//! 将连接收窄到单个任务。

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use taskrelay_dispatcher::{ObserverHub, ObserverScope};
use tracing::{debug, warn};

use crate::routes::AppState;

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    subscribe: String,
}

/// 全局状态推送
pub async fn task_monitor(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| observe(socket, state.hub, ObserverScope::All))
}

/// 单个任务的状态推送
pub async fn task_monitor_for(
    ws: WebSocketUpgrade,
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| observe(socket, state.hub, ObserverScope::Task(task_id)))
}

async fn observe(socket: WebSocket, hub: Arc<ObserverHub>, scope: ObserverScope) {
    let mut connection = hub.connect(scope).await;
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outgoing = connection.receiver.recv() => {
                let Some(payload) = outgoing else {
                    debug!("观察者 {} 已被关闭", connection.id);
                    break;
                };
                if let Err(e) = sender.send(Message::Text(payload.into())).await {
                    debug!("向观察者 {} 推送失败: {}", connection.id, e);
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SubscribeRequest>(text.as_str()) {
                            Ok(request) => {
                                hub.subscribe_to_task(connection.id, &request.subscribe).await;
                            }
                            Err(e) => warn!("忽略无法识别的客户端消息: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("观察者 {} 连接错误: {}", connection.id, e);
                        break;
                    }
                }
            }
        }
    }

    hub.disconnect(connection.id).await;
    let _ = sender.close().await;
}
