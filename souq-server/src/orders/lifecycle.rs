//! 订单状态机执行器
//!
//! 转移规则（可达表、库存回补、通知去向）全部收敛在纯类型
//! [`Transition`] 上，可脱离存储测试；[`OrderLifecycle`] 负责
//! 事务执行：锁单、守卫更新、同事务回补库存、提交后扇出通知。
//!
//! 通知在提交之后发出且不阻塞调用方：状态转移的事实在订单表，
//! 通知投递失败只记日志。

use shared::error::{AppError, ErrorCode};
use shared::message::{Channel, Notification, NotificationKind, NotificationPriority};
use shared::order::{Order, OrderStatus, OrderType, PaymentStatus};
use shared::util::now_millis;
use sqlx::PgPool;

use crate::db;
use crate::error::ServiceResult;
use crate::hub::NotificationHub;
use crate::inventory;

/// 转移发起方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// 下单客户
    Customer { user_id: i64 },
    /// 门店卖家
    Seller { store_id: i64 },
}

/// 状态转移的声明式描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 卖家接单: PENDING -> PREPARING
    Confirm,
    /// 备货完成: PREPARING -> READY
    MarkReady,
    /// 配送出发: READY -> DELIVERING（仅配送单）
    StartDelivery,
    /// 完成: READY/DELIVERING -> COMPLETED
    Complete,
    /// 卖家拒单: PENDING/PREPARING -> REJECTED
    Reject,
    /// 客户取消: PENDING/PREPARING -> CANCELLED
    Cancel,
}

impl Transition {
    /// 目标状态
    pub fn target(&self) -> OrderStatus {
        match self {
            Self::Confirm => OrderStatus::Preparing,
            Self::MarkReady => OrderStatus::Ready,
            Self::StartDelivery => OrderStatus::Delivering,
            Self::Complete => OrderStatus::Completed,
            Self::Reject => OrderStatus::Rejected,
            Self::Cancel => OrderStatus::Cancelled,
        }
    }

    /// 进入终态且未履约的转移回补库存
    ///
    /// 拒单与取消同样处理：两者都意味着商品没有售出。
    pub fn releases_stock(&self) -> bool {
        matches!(self, Self::Reject | Self::Cancel)
    }

    /// 仍在等待支付动作的订单在该转移后支付作废
    pub fn voids_awaiting_payment(&self) -> bool {
        matches!(self, Self::Reject | Self::Cancel)
    }

    /// 发起方权限：取消只属于客户，其余操作属于卖家
    pub fn permitted_by(&self, actor: &Actor) -> bool {
        match self {
            Self::Cancel => matches!(actor, Actor::Customer { .. }),
            _ => matches!(actor, Actor::Seller { .. }),
        }
    }

    /// 通知计划：去向通道 + 载荷；None 表示该转移不产生通知
    ///
    /// 不对称点：
    /// - MarkReady 只通知自取单客户（带取货码）；配送单的 READY
    ///   是门店内部状态，客户等 DELIVERING 通知。
    /// - Cancel 通知卖家（客户自己刚发起，不必回声）。
    pub fn notification(&self, order: &Order) -> Option<(Channel, Notification)> {
        let user = Channel::User(order.user_id);
        let store = Channel::Store(order.store_id);
        let order_data = serde_json::json!({ "order_id": order.id });
        match self {
            Self::Confirm => {
                let n = Notification::new(
                    NotificationKind::OrderAccepted,
                    &user,
                    "Order accepted",
                    "The store is preparing your order",
                )
                .with_data(order_data);
                Some((user, n))
            }
            Self::MarkReady => match order.order_type {
                OrderType::Pickup => {
                    let n = Notification::new(
                        NotificationKind::OrderReady,
                        &user,
                        "Order ready for pickup",
                        "Show your pickup code at the counter",
                    )
                    .with_data(serde_json::json!({
                        "order_id": order.id,
                        "pickup_code": order.pickup_code,
                    }))
                    .with_priority(NotificationPriority::High);
                    Some((user, n))
                }
                OrderType::Delivery => None,
            },
            Self::StartDelivery => {
                let n = Notification::new(
                    NotificationKind::OrderDelivering,
                    &user,
                    "Order on its way",
                    "Your order has left the store",
                )
                .with_data(order_data);
                Some((user, n))
            }
            Self::Complete => {
                let n = Notification::new(
                    NotificationKind::OrderCompleted,
                    &user,
                    "Order completed",
                    "Enjoy! You can now rate the store",
                )
                .with_data(order_data);
                Some((user, n))
            }
            Self::Reject => {
                let n = Notification::new(
                    NotificationKind::OrderRejected,
                    &user,
                    "Order rejected",
                    "The store could not take your order; stock was returned",
                )
                .with_data(order_data)
                .with_priority(NotificationPriority::High);
                Some((user, n))
            }
            Self::Cancel => {
                let n = Notification::new(
                    NotificationKind::OrderCancelled,
                    &store,
                    "Order cancelled",
                    "The customer cancelled this order",
                )
                .with_data(order_data);
                Some((store, n))
            }
        }
    }
}

/// 状态机执行器
#[derive(Clone)]
pub struct OrderLifecycle {
    pool: PgPool,
    hub: NotificationHub,
}

impl OrderLifecycle {
    pub fn new(pool: PgPool, hub: NotificationHub) -> Self {
        Self { pool, hub }
    }

    // ==================== 具名入口 ====================

    pub async fn confirm(&self, order_id: i64, store_id: i64) -> ServiceResult<Order> {
        self.apply(order_id, Transition::Confirm, Actor::Seller { store_id })
            .await
    }

    pub async fn mark_ready(&self, order_id: i64, store_id: i64) -> ServiceResult<Order> {
        self.apply(order_id, Transition::MarkReady, Actor::Seller { store_id })
            .await
    }

    pub async fn start_delivery(&self, order_id: i64, store_id: i64) -> ServiceResult<Order> {
        self.apply(order_id, Transition::StartDelivery, Actor::Seller { store_id })
            .await
    }

    pub async fn complete(&self, order_id: i64, store_id: i64) -> ServiceResult<Order> {
        self.apply(order_id, Transition::Complete, Actor::Seller { store_id })
            .await
    }

    pub async fn reject(&self, order_id: i64, store_id: i64) -> ServiceResult<Order> {
        self.apply(order_id, Transition::Reject, Actor::Seller { store_id })
            .await
    }

    pub async fn cancel(&self, order_id: i64, user_id: i64) -> ServiceResult<Order> {
        self.apply(order_id, Transition::Cancel, Actor::Customer { user_id })
            .await
    }

    /// 卖家确认收款（凭证核对/网关回执）: awaiting_* -> paid
    ///
    /// 不走状态机：支付状态与履约状态是两条轴。
    pub async fn mark_paid(&self, order_id: i64, store_id: i64) -> ServiceResult<Order> {
        let mut tx = self.pool.begin().await?;

        let mut order = db::orders::lock(&mut tx, order_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::OrderNotFound))?;
        if order.store_id != store_id {
            return Err(AppError::new(ErrorCode::OrderNotFound).into());
        }
        if order.status.is_terminal() {
            return Err(AppError::new(ErrorCode::OrderTerminal)
                .with_detail("status", order.status.as_str())
                .into());
        }
        if !order.payment_status.is_awaiting() {
            return Err(AppError::invalid("payment is not awaiting confirmation")
                .with_detail("payment_status", order.payment_status.as_str())
                .into());
        }

        let now = now_millis();
        db::orders::update_payment_status(&mut tx, order_id, PaymentStatus::Paid, now).await?;
        tx.commit().await?;

        tracing::info!(order_id, "payment confirmed");
        order.payment_status = PaymentStatus::Paid;
        order.updated_at = now;
        Ok(order)
    }

    /// 执行一次状态转移
    ///
    /// 锁单 -> 校验 -> 守卫更新 -> （需要时）同事务回补库存
    /// -> 提交 -> 通知。
    async fn apply(
        &self,
        order_id: i64,
        transition: Transition,
        actor: Actor,
    ) -> ServiceResult<Order> {
        let mut tx = self.pool.begin().await?;

        let mut order = db::orders::lock(&mut tx, order_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::OrderNotFound))?;

        match actor {
            Actor::Customer { user_id } if order.user_id != user_id => {
                return Err(AppError::new(ErrorCode::OrderNotFound).into());
            }
            Actor::Seller { store_id } if order.store_id != store_id => {
                return Err(AppError::new(ErrorCode::OrderNotFound).into());
            }
            _ => {}
        }
        if !transition.permitted_by(&actor) {
            return Err(AppError::invalid("operation not permitted for this actor").into());
        }

        let target = transition.target();
        if order.status.is_terminal() {
            return Err(AppError::new(ErrorCode::OrderTerminal)
                .with_detail("status", order.status.as_str())
                .into());
        }
        if !order.status.can_transition(target, order.order_type) {
            return Err(AppError::new(ErrorCode::InvalidTransition)
                .with_detail("from", order.status.as_str())
                .with_detail("to", target.as_str())
                .into());
        }

        let payment_update = (transition.voids_awaiting_payment()
            && order.payment_status.is_awaiting())
        .then_some(PaymentStatus::Voided);

        let now = now_millis();
        let rows =
            db::orders::transition(&mut tx, order_id, &[order.status], target, payment_update, now)
                .await?;
        if rows == 0 {
            // 持锁期间状态不应再变，落空说明有绕过锁的写者
            return Err(AppError::new(ErrorCode::ConcurrentUpdate).into());
        }

        if transition.releases_stock() {
            for item in &order.items {
                inventory::release(&mut tx, item.offer_id, item.quantity).await?;
            }
        }

        tx.commit().await?;

        tracing::info!(order_id, from = %order.status, to = %target, "order transitioned");

        order.status = target;
        if let Some(ps) = payment_update {
            order.payment_status = ps;
        }
        order.updated_at = now;

        if let Some((channel, notification)) = transition.notification(&order) {
            let hub = self.hub.clone();
            tokio::spawn(async move {
                if let Err(e) = hub.publish(&channel, notification).await {
                    tracing::warn!(%channel, error = %e, "notification publish failed");
                }
            });
        }

        Ok(order)
    }
}
