//! 订单创建与查询
//!
//! 创建路径的不变式：库存预留、容量计数与订单行写入在同一个
//! PostgreSQL 事务内，要么全部生效要么全部回滚。幂等提交把
//! 事务包在 [`IdempotencyGuard`] 的占位/缓存协议里，同一
//! (key, user) 的重复提交不会二次扣库存。

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::error::{AppError, ErrorCode};
use shared::order::{Order, OrderItem, OrderStatus, OrderType, PaymentMethod};
use shared::util::{now_millis, snowflake_id};
use sqlx::{Acquire, PgPool, Postgres, Transaction};
use validator::Validate;

use crate::db;
use crate::error::{ServiceError, ServiceResult};
use crate::idempotency::{self, IdempotencyCheck, IdempotencyGuard};
use crate::inventory;

/// 取货码字符集（去掉 0/O/1/I 等易混字符）
const PICKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// 取货码撞上未完结订单唯一索引时的重试上限
const PICKUP_CODE_MAX_ATTEMPTS: u32 = 5;

/// 购物车行项目
///
/// 校验失败时行项目会进入错误参数，因此同时可序列化。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CartItemRequest {
    pub offer_id: i64,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
}

/// 购物车下单请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CartOrderRequest {
    pub store_id: i64,
    #[validate(length(min = 1, message = "order must contain at least one item"), nested)]
    pub items: Vec<CartItemRequest>,
    pub order_type: OrderType,
    pub payment_method: PaymentMethod,
    /// 配送单必填
    pub delivery_address: Option<String>,
}

impl CartOrderRequest {
    /// 派生校验之外的跨字段规则
    fn validate_request(&self) -> Result<(), AppError> {
        self.validate()
            .map_err(|e| AppError::validation(e.to_string()))?;
        if self.order_type == OrderType::Delivery
            && self
                .delivery_address
                .as_deref()
                .map(str::trim)
                .is_none_or(str::is_empty)
        {
            return Err(AppError::validation(
                "delivery orders require a delivery address",
            ));
        }
        Ok(())
    }

    /// 行项目按 offer_id 合并并排序
    ///
    /// 排序固定了多行预留的加锁顺序，避免并发订单互相死锁。
    fn merged_items(&self) -> Vec<(i64, i32)> {
        let mut merged: BTreeMap<i64, i32> = BTreeMap::new();
        for item in &self.items {
            *merged.entry(item.offer_id).or_insert(0) += item.quantity;
        }
        merged.into_iter().collect()
    }
}

/// 幂等提交的结果
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// 本次提交真正创建了订单
    Created(Order),
    /// 命中缓存响应（同 key 同载荷的重复提交）
    Replayed { status: i16, body: Value },
}

/// 订单创建与查询服务
#[derive(Clone)]
pub struct OrderStore {
    pool: PgPool,
    guard: IdempotencyGuard,
    max_open_orders_per_user: i64,
    delivery_fee: Decimal,
    pickup_code_length: usize,
}

impl OrderStore {
    pub fn new(
        pool: PgPool,
        max_open_orders_per_user: i64,
        delivery_fee: Decimal,
        pickup_code_length: usize,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(pool.clone()),
            pool,
            max_open_orders_per_user,
            delivery_fee,
            pickup_code_length,
        }
    }

    // ==================== Create ====================

    /// 幂等提交购物车订单
    ///
    /// 不带 key 的提交绕过幂等闸直接创建。带 key 时占位成功才
    /// 进入创建事务；创建成功后缓存响应，失败则删除占位让客户端
    /// 携同一 key 重试。
    pub async fn submit_cart_order(
        &self,
        user_id: i64,
        idempotency_key: Option<&str>,
        request: CartOrderRequest,
    ) -> ServiceResult<SubmitOutcome> {
        request.validate_request()?;

        let items = request.merged_items();
        let Some(idempotency_key) = idempotency_key else {
            let order = self.create_cart_order(user_id, &request, &items).await?;
            return Ok(SubmitOutcome::Created(order));
        };
        let hash = idempotency::canonical_request_hash(
            user_id,
            request.store_id,
            request.order_type.as_str(),
            request.payment_method.as_str(),
            request.delivery_address.as_deref(),
            &items,
        );

        match self
            .guard
            .check_or_reserve(idempotency_key, user_id, &hash, now_millis())
            .await?
        {
            IdempotencyCheck::Proceed => {}
            IdempotencyCheck::Replay { status, body } => {
                tracing::info!(idempotency_key, user_id, "replaying cached order response");
                return Ok(SubmitOutcome::Replayed { status, body });
            }
            IdempotencyCheck::InProgress => {
                return Err(AppError::new(ErrorCode::IdempotencyInProgress).into());
            }
            IdempotencyCheck::Conflict => {
                return Err(AppError::new(ErrorCode::IdempotencyConflict).into());
            }
        }

        match self.create_cart_order(user_id, &request, &items).await {
            Ok(order) => {
                let body = serde_json::to_value(&order)
                    .map_err(|e| ServiceError::App(AppError::internal(e.to_string())))?;
                self.guard
                    .store_response(idempotency_key, user_id, 201, &body)
                    .await?;
                Ok(SubmitOutcome::Created(order))
            }
            Err(e) => {
                // 删除占位，给同一 key 的重试留路；删除失败只记日志
                if let Err(cleanup) = self.guard.remove_placeholder(idempotency_key, user_id).await
                {
                    tracing::error!(
                        idempotency_key,
                        user_id,
                        error = %cleanup,
                        "failed to remove idempotency placeholder"
                    );
                }
                Err(e)
            }
        }
    }

    /// 购物车订单创建事务
    async fn create_cart_order(
        &self,
        user_id: i64,
        request: &CartOrderRequest,
        items: &[(i64, i32)],
    ) -> ServiceResult<Order> {
        let mut tx = self.pool.begin().await?;

        inventory::check_booking_limit(&mut tx, user_id, self.max_open_orders_per_user).await?;

        let mut order_items = Vec::with_capacity(items.len());
        for &(offer_id, quantity) in items {
            let offer = inventory::reserve(&mut tx, offer_id, quantity).await?;
            if offer.store_id != request.store_id {
                return Err(AppError::validation(format!(
                    "offer {offer_id} does not belong to store {}",
                    request.store_id
                ))
                .into());
            }
            // 单价在下单瞬间冻结
            order_items.push(OrderItem {
                offer_id,
                quantity,
                unit_price: offer.unit_price,
            });
        }

        let delivery_fee = match request.order_type {
            OrderType::Delivery => self.delivery_fee,
            OrderType::Pickup => Decimal::ZERO,
        };
        let total_price: Decimal =
            order_items.iter().map(OrderItem::line_total).sum::<Decimal>() + delivery_fee;

        let now = now_millis();
        let order = Order {
            id: snowflake_id(),
            user_id,
            store_id: request.store_id,
            items: order_items,
            order_type: request.order_type,
            payment_method: request.payment_method.clone(),
            payment_status: request.payment_method.initial_payment_status(),
            status: OrderStatus::Pending,
            pickup_code: None,
            delivery_address: request
                .delivery_address
                .as_deref()
                .map(str::trim)
                .map(String::from),
            delivery_fee,
            total_price,
            created_at: now,
            updated_at: now,
        };

        let order = self.insert_with_pickup_code(&mut tx, order).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = order.id,
            user_id,
            store_id = order.store_id,
            total = %order.total_price,
            "order created"
        );
        Ok(order)
    }

    /// 单项快速预订（自取）
    ///
    /// 价格来自锁定的 offer 行；可选预留取货时段容量。
    pub async fn create_booking(
        &self,
        user_id: i64,
        offer_id: i64,
        quantity: i32,
        payment_method: PaymentMethod,
        slot_start: Option<i64>,
    ) -> ServiceResult<Order> {
        if quantity < 1 {
            return Err(AppError::validation("quantity must be at least 1").into());
        }

        let mut tx = self.pool.begin().await?;

        inventory::check_booking_limit(&mut tx, user_id, self.max_open_orders_per_user).await?;
        let offer = inventory::reserve(&mut tx, offer_id, quantity).await?;
        if let Some(slot_start) = slot_start {
            inventory::reserve_slot(&mut tx, offer.store_id, slot_start).await?;
        }

        let item = OrderItem {
            offer_id,
            quantity,
            unit_price: offer.unit_price,
        };
        let now = now_millis();
        let order = Order {
            id: snowflake_id(),
            user_id,
            store_id: offer.store_id,
            total_price: item.line_total(),
            items: vec![item],
            order_type: OrderType::Pickup,
            payment_status: payment_method.initial_payment_status(),
            payment_method,
            status: OrderStatus::Pending,
            pickup_code: None,
            delivery_address: None,
            delivery_fee: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };

        let order = self.insert_with_pickup_code(&mut tx, order).await?;
        tx.commit().await?;

        tracing::info!(order_id = order.id, user_id, offer_id, "booking created");
        Ok(order)
    }

    /// 写入订单行；自取单带取货码，撞码走保存点重试
    ///
    /// 取货码唯一性由未完结订单上的部分唯一索引保证，撞码时
    /// 回滚保存点（不污染外层事务）换码重试。
    async fn insert_with_pickup_code(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        mut order: Order,
    ) -> ServiceResult<Order> {
        if order.order_type != OrderType::Pickup {
            db::orders::insert(tx, &order).await?;
            return Ok(order);
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            order.pickup_code = Some(generate_pickup_code(self.pickup_code_length));

            let mut sp = tx.begin().await?;
            match db::orders::insert(&mut sp, &order).await {
                Ok(()) => {
                    sp.commit().await?;
                    return Ok(order);
                }
                Err(e) if is_pickup_code_collision(&e) && attempts < PICKUP_CODE_MAX_ATTEMPTS => {
                    sp.rollback().await?;
                    tracing::warn!(attempts, "pickup code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ==================== Read ====================

    /// 读取订单
    pub async fn get_order(&self, order_id: i64) -> ServiceResult<Order> {
        db::orders::get(&self.pool, order_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::OrderNotFound).into())
    }

    /// 用户订单列表
    pub async fn list_for_user(&self, user_id: i64) -> ServiceResult<Vec<Order>> {
        Ok(db::orders::list_for_user(&self.pool, user_id).await?)
    }

    /// 门店订单列表
    pub async fn list_for_store(&self, store_id: i64) -> ServiceResult<Vec<Order>> {
        Ok(db::orders::list_for_store(&self.pool, store_id).await?)
    }
}

/// 随机取货码
fn generate_pickup_code(length: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..PICKUP_CODE_ALPHABET.len());
            PICKUP_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// 未完结订单取货码唯一索引的冲突判定
fn is_pickup_code_collision(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db_err) if db_err.constraint() == Some("orders_pickup_code_open_idx")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_request(order_type: OrderType, address: Option<&str>) -> CartOrderRequest {
        CartOrderRequest {
            store_id: 1,
            items: vec![CartItemRequest {
                offer_id: 10,
                quantity: 2,
            }],
            order_type,
            payment_method: PaymentMethod::Cash,
            delivery_address: address.map(String::from),
        }
    }

    #[test]
    fn pickup_code_uses_unambiguous_alphabet() {
        for _ in 0..50 {
            let code = generate_pickup_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| PICKUP_CODE_ALPHABET.contains(&b)));
            assert!(!code.contains('0') && !code.contains('O'));
            assert!(!code.contains('1') && !code.contains('I'));
        }
    }

    #[test]
    fn delivery_requires_address() {
        assert!(cart_request(OrderType::Delivery, None)
            .validate_request()
            .is_err());
        assert!(cart_request(OrderType::Delivery, Some("  "))
            .validate_request()
            .is_err());
        assert!(cart_request(OrderType::Delivery, Some("rua das flores 5"))
            .validate_request()
            .is_ok());
        assert!(cart_request(OrderType::Pickup, None).validate_request().is_ok());
    }

    #[test]
    fn empty_cart_and_zero_quantity_rejected() {
        let mut req = cart_request(OrderType::Pickup, None);
        req.items.clear();
        let err = req.validate_request().unwrap_err();
        assert!(err.message.contains("at least one item"), "{}", err.message);

        let mut req = cart_request(OrderType::Pickup, None);
        req.items[0].quantity = 0;
        let err = req.validate_request().unwrap_err();
        assert!(err.message.contains("at least 1"), "{}", err.message);
    }

    #[test]
    fn merged_items_are_sorted_and_deduplicated() {
        let req = CartOrderRequest {
            store_id: 1,
            items: vec![
                CartItemRequest { offer_id: 30, quantity: 1 },
                CartItemRequest { offer_id: 10, quantity: 2 },
                CartItemRequest { offer_id: 30, quantity: 3 },
            ],
            order_type: OrderType::Pickup,
            payment_method: PaymentMethod::Cash,
            delivery_address: None,
        };
        assert_eq!(req.merged_items(), vec![(10, 2), (30, 4)]);
    }
}
