//! 数据库访问层
//!
//! 每个实体一个子模块：`&PgPool` / 事务上的自由函数，
//! 元组行 + 单一边界映射函数转换为规范 struct。
//! 时间戳统一为 UTC 毫秒 (BIGINT)。

pub mod idempotency;
pub mod offers;
pub mod orders;

use shared::order::OrderStatus;

/// 非终态状态列表（用于部分索引条件与未完结订单统计）
pub const OPEN_STATUSES: [OrderStatus; 4] = [
    OrderStatus::Pending,
    OrderStatus::Preparing,
    OrderStatus::Ready,
    OrderStatus::Delivering,
];

/// 状态列表转为可绑定的 TEXT[] 参数
pub(crate) fn status_names(statuses: &[OrderStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// 枚举文本解码失败时的统一错误构造
pub(crate) fn decode_error(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}
