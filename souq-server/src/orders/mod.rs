//! 订单域服务
//!
//! - [`store`]: 订单创建（库存预留 + 幂等提交）与查询
//! - [`lifecycle`]: 状态转移与通知扇出

pub mod lifecycle;
pub mod store;

pub use lifecycle::OrderLifecycle;
pub use store::{CartItemRequest, CartOrderRequest, OrderStore, SubmitOutcome};
