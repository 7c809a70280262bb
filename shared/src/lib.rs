//! Souq 共享类型库 - 服务端与实时客户端共用
//!
//! # 内容
//!
//! - [`error`] - 统一错误码与 API 响应结构
//! - [`message`] - 实时通道的 JSON 信封与通知类型
//! - [`order`] - 订单域的规范类型（状态机、支付映射、行项目）
//! - [`util`] - 时间戳与 ID 生成工具

pub mod error;
pub mod message;
pub mod order;
pub mod util;

pub use error::{ApiResponse, AppError, AppResult, ErrorCode};
pub use message::{
    Channel, ClientMessage, Notification, NotificationKind, NotificationPriority, Recipient,
    ServerMessage,
};
pub use order::{
    Offer, OfferStatus, Order, OrderItem, OrderStatus, OrderType, PaymentMethod, PaymentStatus,
};
