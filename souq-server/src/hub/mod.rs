//! 通知中心 - 按通道扇出
//!
//! 每个通道（user:{id} / store:{id} / city:{name} / global）对应
//! 一个广播通道，发布者不等待订阅者：没有订阅者时消息直接丢弃
//! （成交事实在订单表里，通知只是加速）。
//!
//! 投递后端可插拔：
//! - [`LocalBackend`]: 进程内广播（单实例默认）
//! - [`relay::RelayBackend`]: 经 TCP 中继跨实例扇出

pub mod relay;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::message::{Channel, Notification};
use tokio::sync::broadcast;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 投递后端：把通知送达一个通道的所有订阅者
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    /// 发布到通道，返回收到消息的本地订阅者数量
    async fn publish(&self, channel: &Channel, notification: Notification)
        -> Result<usize, BoxError>;

    /// 订阅通道
    fn subscribe(&self, channel: &Channel) -> broadcast::Receiver<Notification>;

    /// 清理无订阅者的通道条目
    fn cleanup(&self);
}

/// 进程内广播后端
///
/// 通道惰性创建；发送失败（无订阅者）不是错误。
pub struct LocalBackend {
    channels: Mutex<HashMap<String, broadcast::Sender<Notification>>>,
    capacity: usize,
}

impl LocalBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// 把通知送进本地通道（中继后端的回环入口也走这里）
    pub(crate) fn deliver(&self, channel: &Channel, notification: Notification) -> usize {
        let key = channel.to_string();
        let channels = self.channels.lock();
        match channels.get(&key) {
            // send 返回当前接收者数；Err 表示没有订阅者，消息丢弃
            Some(sender) => sender.send(notification).unwrap_or(0),
            None => 0,
        }
    }
}

#[async_trait]
impl NotificationBackend for LocalBackend {
    async fn publish(
        &self,
        channel: &Channel,
        notification: Notification,
    ) -> Result<usize, BoxError> {
        Ok(self.deliver(channel, notification))
    }

    fn subscribe(&self, channel: &Channel) -> broadcast::Receiver<Notification> {
        let key = channel.to_string();
        let mut channels = self.channels.lock();
        channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    fn cleanup(&self) {
        let mut channels = self.channels.lock();
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

/// 通知处理器（审计日志、推送桥接等横切消费者）
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, channel: &Channel, notification: &Notification);
}

/// 通知中心
///
/// 业务层只面对按收件人分类的 notify_* 方法，投递细节（本地
/// 广播还是远程中继）由后端决定。
#[derive(Clone)]
pub struct NotificationHub {
    backend: Arc<dyn NotificationBackend>,
    handlers: Arc<Mutex<Vec<Arc<dyn NotificationHandler>>>>,
}

impl NotificationHub {
    pub fn new(backend: Arc<dyn NotificationBackend>) -> Self {
        Self {
            backend,
            handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 进程内单实例部署的默认构造
    pub fn local(capacity: usize) -> Self {
        Self::new(Arc::new(LocalBackend::new(capacity)))
    }

    /// 注册横切处理器；每条通知对每个处理器各起一个任务，
    /// 单个处理器 panic 不影响其他处理器和投递本身
    pub fn register_handler(&self, handler: Arc<dyn NotificationHandler>) {
        self.handlers.lock().push(handler);
    }

    /// 订阅通道
    pub fn subscribe(&self, channel: &Channel) -> broadcast::Receiver<Notification> {
        self.backend.subscribe(channel)
    }

    /// 清理无订阅者的通道
    pub fn cleanup(&self) {
        self.backend.cleanup();
    }

    /// 发布到任意通道
    pub async fn publish(
        &self,
        channel: &Channel,
        notification: Notification,
    ) -> Result<usize, BoxError> {
        let handlers: Vec<Arc<dyn NotificationHandler>> = self.handlers.lock().clone();
        for handler in handlers {
            let channel = channel.clone();
            let notification = notification.clone();
            tokio::spawn(async move {
                handler.handle(&channel, &notification).await;
            });
        }
        self.backend.publish(channel, notification).await
    }

    // ==================== 按收件人分类的入口 ====================

    pub async fn notify_user(
        &self,
        user_id: i64,
        notification: Notification,
    ) -> Result<usize, BoxError> {
        self.publish(&Channel::User(user_id), notification).await
    }

    pub async fn notify_store(
        &self,
        store_id: i64,
        notification: Notification,
    ) -> Result<usize, BoxError> {
        self.publish(&Channel::Store(store_id), notification).await
    }

    pub async fn notify_city(
        &self,
        city: &str,
        notification: Notification,
    ) -> Result<usize, BoxError> {
        self.publish(&Channel::City(city.to_string()), notification)
            .await
    }

    pub async fn broadcast(&self, notification: Notification) -> Result<usize, BoxError> {
        self.publish(&Channel::Global, notification).await
    }
}
