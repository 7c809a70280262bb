//! 实时连接注册表
//!
//! 每个 WebSocket 连接注册一条 [`Connection`]，出站消息经连接
//! 自己的 mpsc 发送端串行写出。注册表只负责寻址与存活管理，
//! 订阅关系在会话任务里（见 `api::ws`）。

use dashmap::DashMap;
use shared::message::ServerMessage;
use shared::util::now_millis;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::hub::NotificationHub;

/// 一条活跃连接
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    pub user_id: i64,
    /// 卖家端连接携带门店 ID
    pub store_id: Option<i64>,
    /// 出站消息入口（写循环在会话任务里）
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    pub connected_at: i64,
}

/// 连接注册表（DashMap 分片锁，读写不互斥）
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接，返回连接 ID
    pub fn register(
        &self,
        user_id: i64,
        store_id: Option<i64>,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            Connection {
                id,
                user_id,
                store_id,
                sender,
                connected_at: now_millis(),
            },
        );
        tracing::info!(connection_id = %id, user_id, "connection registered");
        id
    }

    /// 移除连接
    pub fn remove(&self, id: &Uuid) {
        if self.connections.remove(id).is_some() {
            tracing::info!(connection_id = %id, "connection removed");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// 定向发送；连接不存在或已断开返回 false
    pub fn send_to(&self, id: &Uuid, message: ServerMessage) -> bool {
        match self.connections.get(id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// 发送给某用户的所有连接（多端在线），返回送达数
    pub fn send_to_user(&self, user_id: i64, message: &ServerMessage) -> usize {
        self.connections
            .iter()
            .filter(|conn| conn.user_id == user_id)
            .filter(|conn| conn.sender.send(message.clone()).is_ok())
            .count()
    }

    /// 全连接广播（运维公告），返回送达数
    pub fn broadcast_all(&self, message: &ServerMessage) -> usize {
        self.connections
            .iter()
            .filter(|conn| conn.sender.send(message.clone()).is_ok())
            .count()
    }

    /// 清扫失效连接（会话任务已退出、发送端关闭），返回清除数
    pub fn sweep(&self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|_, conn| !conn.sender.is_closed());
        before - self.connections.len()
    }
}

/// 周期清扫任务：失效连接 + 通知中心的空通道
pub fn spawn_sweeper(
    registry: std::sync::Arc<ConnectionRegistry>,
    hub: NotificationHub,
    interval_secs: u64,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    let swept = registry.sweep();
                    hub.cleanup();
                    if swept > 0 {
                        tracing::info!(swept, remaining = registry.len(), "swept dead connections");
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<ServerMessage>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn send_to_user_reaches_every_device() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let (tx3, _rx3) = channel();
        registry.register(9, None, tx1);
        registry.register(9, None, tx2);
        registry.register(8, None, tx3);

        let sent = registry.send_to_user(9, &ServerMessage::Pong);
        assert_eq!(sent, 2);
        assert!(matches!(rx1.try_recv(), Ok(ServerMessage::Pong)));
        assert!(matches!(rx2.try_recv(), Ok(ServerMessage::Pong)));
    }

    #[test]
    fn sweep_removes_closed_connections() {
        let registry = ConnectionRegistry::new();
        let (tx1, rx1) = channel();
        let (tx2, _rx2) = channel();
        registry.register(1, None, tx1);
        let live = registry.register(2, Some(7), tx2);

        drop(rx1); // 会话任务退出的效果
        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.send_to(&live, ServerMessage::Pong));
    }

    #[test]
    fn send_to_unknown_connection_is_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to(&Uuid::new_v4(), ServerMessage::Pong));
        assert_eq!(registry.broadcast_all(&ServerMessage::Pong), 0);
    }
}
