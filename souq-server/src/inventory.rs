//! 库存台账 - 防超卖的唯一闸口
//!
//! 所有库存变更都在调用方持有的事务内执行：先行级排他锁，
//! 再以 CAS 守卫写回。同一 offer 的并发扣减在锁上串行化，
//! 不同 offer 之间无跨行顺序保证。
//!
//! 预期失败全部以 [`StockError`] 的类型化原因返回，调用方
//! 据此渲染用户可见文案；这里从不 panic。

use shared::order::Offer;
use shared::util::now_millis;
use sqlx::{Postgres, Transaction};

use crate::db;

/// 库存操作的类型化失败原因
#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("offer not found")]
    OfferNotFound,

    #[error("offer is not active")]
    OfferInactive,

    #[error("insufficient stock: {available} available")]
    InsufficientStock { available: i32 },

    /// 拿锁前有写者已变更该行（读值过期）
    #[error("concurrent update on offer")]
    ConcurrentUpdate,

    #[error("open order limit reached ({open}/{limit})")]
    BookingLimit { open: i64, limit: i64 },

    #[error("pickup slot is full")]
    SlotFull,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl StockError {
    /// 稳定的机器可读原因串（控制器层映射为用户文案）
    pub fn reason(&self) -> &'static str {
        match self {
            Self::OfferNotFound => "offer_not_found",
            Self::OfferInactive => "offer_inactive",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::ConcurrentUpdate => "concurrent_update",
            Self::BookingLimit { .. } => "booking_limit",
            Self::SlotFull => "slot_full",
            Self::Storage(sqlx::Error::PoolTimedOut) => "resource_exhausted",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<StockError> for crate::error::ServiceError {
    fn from(e: StockError) -> Self {
        use shared::error::{AppError, ErrorCode};
        match e {
            StockError::Storage(db) => Self::Db(db),
            StockError::OfferNotFound => Self::App(AppError::new(ErrorCode::OfferNotFound)),
            StockError::OfferInactive => Self::App(AppError::new(ErrorCode::OfferInactive)),
            StockError::InsufficientStock { available } => Self::App(
                AppError::new(ErrorCode::InsufficientStock).with_detail("available", available),
            ),
            StockError::ConcurrentUpdate => Self::App(AppError::new(ErrorCode::ConcurrentUpdate)),
            StockError::BookingLimit { open, limit } => Self::App(
                AppError::new(ErrorCode::BookingLimit)
                    .with_detail("open", open)
                    .with_detail("limit", limit),
            ),
            StockError::SlotFull => Self::App(AppError::new(ErrorCode::SlotFull)),
        }
    }
}

/// 预留库存：锁行、校验、CAS 扣减
///
/// 成功返回扣减前的 offer（单项预订路径用它取冻结单价）。
/// 任何失败都不修改行；调用方负责回滚所在事务。
pub async fn reserve(
    tx: &mut Transaction<'_, Postgres>,
    offer_id: i64,
    quantity: i32,
) -> Result<Offer, StockError> {
    let offer = db::offers::lock(tx, offer_id)
        .await?
        .ok_or(StockError::OfferNotFound)?;

    // 只有人工下架算不可售；out_of_stock 是库存问题，走数量检查
    // 报 insufficient_stock（末件竞争的败者也落在这里）
    if offer.status == shared::order::OfferStatus::Inactive {
        return Err(StockError::OfferInactive);
    }
    if offer.quantity < quantity {
        return Err(StockError::InsufficientStock {
            available: offer.quantity,
        });
    }

    let new_quantity = offer.quantity - quantity;
    let new_status = offer.status.derive(new_quantity);
    let rows = db::offers::cas_update_stock(
        tx,
        offer_id,
        offer.quantity,
        new_quantity,
        new_status,
        now_millis(),
    )
    .await?;
    if rows == 0 {
        return Err(StockError::ConcurrentUpdate);
    }

    Ok(offer)
}

/// 回补库存：取消/拒单时把预留量还回去
///
/// offer 已被目录协作方删除时按无操作处理（记日志），
/// 不让回补失败挡住订单终态化。
pub async fn release(
    tx: &mut Transaction<'_, Postgres>,
    offer_id: i64,
    quantity: i32,
) -> Result<(), StockError> {
    let Some(offer) = db::offers::lock(tx, offer_id).await? else {
        tracing::warn!(offer_id, "release on missing offer, skipping");
        return Ok(());
    };

    let new_quantity = offer.quantity + quantity;
    // out_of_stock -> active 恢复由派生规则完成；inactive 保持不变
    let new_status = offer.status.derive(new_quantity);
    let rows = db::offers::cas_update_stock(
        tx,
        offer_id,
        offer.quantity,
        new_quantity,
        new_status,
        now_millis(),
    )
    .await?;
    if rows == 0 {
        // 行已被锁住读取，CAS 不应落空
        return Err(StockError::ConcurrentUpdate);
    }
    Ok(())
}

/// 下单上限检查：用户未完结订单数达到上限则拒绝新预留
pub async fn check_booking_limit(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    limit: i64,
) -> Result<(), StockError> {
    let open = db::orders::count_open_for_user(tx, user_id).await?;
    if open >= limit {
        return Err(StockError::BookingLimit { open, limit });
    }
    Ok(())
}

/// 预留取货时段容量（store + slot 的次级计数器，同一锁纪律）
///
/// 未配置该时段的容量行时视为不限量。
pub async fn reserve_slot(
    tx: &mut Transaction<'_, Postgres>,
    store_id: i64,
    slot_start: i64,
) -> Result<(), StockError> {
    let row: Option<(i32, i32)> = sqlx::query_as(
        r#"
        SELECT capacity, reserved FROM pickup_slots
        WHERE store_id = $1 AND slot_start = $2
        FOR UPDATE
        "#,
    )
    .bind(store_id)
    .bind(slot_start)
    .fetch_optional(&mut **tx)
    .await?;

    let Some((capacity, reserved)) = row else {
        return Ok(());
    };
    if reserved >= capacity {
        return Err(StockError::SlotFull);
    }

    sqlx::query(
        "UPDATE pickup_slots SET reserved = reserved + 1 WHERE store_id = $1 AND slot_start = $2",
    )
    .bind(store_id)
    .bind(slot_start)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
