//! 实时通道的消息类型定义
//!
//! 服务端与实时客户端之间的 JSON 信封协议：
//!
//! ```text
//! Client ──▶ {"type": "subscribe", "payload": {"channel": "city:porto"}}
//! Server ──▶ {"type": "notification", "payload": { ... }}
//! ```
//!
//! 通知本身是短暂的：从不持久化，投递为 at-most-once。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::now_millis;

// ==================== Channels ====================

/// 逻辑订阅范围 - 通知按通道扇出
///
/// 通道名采用 `scope:id` 文本形式，便于客户端直接订阅：
/// `user:42`、`store:7`、`city:porto`、`global`。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// 单个用户的所有连接
    User(i64),
    /// 单个门店（卖家端）
    Store(i64),
    /// 城市范围（营销、公告）
    City(String),
    /// 全局广播
    Global,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Store(id) => write!(f, "store:{}", id),
            Self::City(name) => write!(f, "city:{}", name),
            Self::Global => write!(f, "global"),
        }
    }
}

/// 通道名解析错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid channel name: {0}")]
pub struct InvalidChannel(pub String);

impl FromStr for Channel {
    type Err = InvalidChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "global" {
            return Ok(Self::Global);
        }
        let (scope, id) = s.split_once(':').ok_or_else(|| InvalidChannel(s.into()))?;
        match scope {
            "user" => id
                .parse()
                .map(Self::User)
                .map_err(|_| InvalidChannel(s.into())),
            "store" => id
                .parse()
                .map(Self::Store)
                .map_err(|_| InvalidChannel(s.into())),
            "city" if !id.is_empty() => Ok(Self::City(id.to_string())),
            _ => Err(InvalidChannel(s.into())),
        }
    }
}

// ==================== Notification ====================

/// 通知优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
}

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// 订单被卖家接受
    OrderAccepted,
    /// 订单可取（仅自取单通知客户）
    OrderReady,
    /// 配送开始
    OrderDelivering,
    /// 订单完成（客户可评价）
    OrderCompleted,
    /// 卖家拒单
    OrderRejected,
    /// 客户取消（通知卖家）
    OrderCancelled,
    /// 系统/运营通知
    System,
}

/// 接收方范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientScope {
    User,
    Store,
    City,
    Global,
}

/// 通知接收方 (id + 范围)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub scope: RecipientScope,
    /// user/store 为数字 ID 的字符串形式，city 为城市名，global 为 None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl From<&Channel> for Recipient {
    fn from(channel: &Channel) -> Self {
        match channel {
            Channel::User(id) => Self {
                scope: RecipientScope::User,
                id: Some(id.to_string()),
            },
            Channel::Store(id) => Self {
                scope: RecipientScope::Store,
                id: Some(id.to_string()),
            },
            Channel::City(name) => Self {
                scope: RecipientScope::City,
                id: Some(name.clone()),
            },
            Channel::Global => Self {
                scope: RecipientScope::Global,
                id: None,
            },
        }
    }
}

/// 通知载荷 (服务端 -> 客户端)
///
/// 短暂数据：从不入库，发布时无订阅者则直接丢弃。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// 通知类型
    pub kind: NotificationKind,
    /// 接收方 (id + 范围)
    pub recipient: Recipient,
    /// 标题
    pub title: String,
    /// 消息内容
    pub message: String,
    /// 附加数据 (JSON)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// 优先级
    pub priority: NotificationPriority,
    /// 创建时间 (UTC 毫秒)
    pub created_at: i64,
}

impl Notification {
    /// 创建面向指定通道的通知
    pub fn new(
        kind: NotificationKind,
        channel: &Channel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            recipient: Recipient::from(channel),
            title: title.into(),
            message: message.into(),
            data: None,
            priority: NotificationPriority::Normal,
            created_at: now_millis(),
        }
    }

    /// 附加结构化数据
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }
}

// ==================== Wire Envelope ====================

/// 客户端 -> 服务端消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 心跳
    Ping,
    /// 订阅通道 (如 "city:porto")
    Subscribe { channel: String },
    /// 退订通道
    Unsubscribe { channel: String },
}

/// 服务端 -> 客户端消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 连接握手（注册成功后立即发送）
    Connected { connection_id: Uuid },
    /// 业务通知
    Notification(Notification),
    /// 心跳应答
    Pong,
    /// 订阅确认
    Subscribed { channel: String },
    /// 退订确认
    Unsubscribed { channel: String },
    /// 协议层错误（无效信封、无效通道名）
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_round_trips_through_text() {
        for raw in ["user:42", "store:7", "city:porto", "global"] {
            let channel: Channel = raw.parse().unwrap();
            assert_eq!(channel.to_string(), raw);
        }
    }

    #[test]
    fn bad_channel_names_rejected() {
        assert!("user:".parse::<Channel>().is_err());
        assert!("user:abc".parse::<Channel>().is_err());
        assert!("city:".parse::<Channel>().is_err());
        assert!("planet:earth".parse::<Channel>().is_err());
        assert!("global:all".parse::<Channel>().is_err());
    }

    #[test]
    fn envelope_uses_type_payload_shape() {
        let msg = ClientMessage::Subscribe {
            channel: "city:porto".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["payload"]["channel"], "city:porto");

        // Unit variants carry no payload key
        let ping = serde_json::to_value(ClientMessage::Ping).unwrap();
        assert_eq!(ping["type"], "ping");
        assert!(ping.get("payload").is_none());

        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::Ping);
    }

    #[test]
    fn notification_recipient_follows_channel() {
        let n = Notification::new(
            NotificationKind::OrderAccepted,
            &Channel::User(9),
            "Order accepted",
            "Your order is being prepared",
        );
        assert_eq!(n.recipient.scope, RecipientScope::User);
        assert_eq!(n.recipient.id.as_deref(), Some("9"));
        assert_eq!(n.priority, NotificationPriority::Normal);
    }
}
