//! Offer 行访问
//!
//! 库存行只通过这里读写；扣减/回补的业务规则在 `inventory` 模块。

use rust_decimal::Decimal;
use shared::order::{Offer, OfferStatus};
use sqlx::{PgPool, Postgres, Transaction};

/// 原始行元组: (id, store_id, quantity, status, unit_price, created_at, updated_at)
type OfferRow = (i64, i64, i32, String, Decimal, i64, i64);

/// 存储行 -> 规范 struct 的唯一边界映射
fn offer_from_row(row: OfferRow) -> Result<Offer, sqlx::Error> {
    let (id, store_id, quantity, status, unit_price, created_at, updated_at) = row;
    Ok(Offer {
        id,
        store_id,
        quantity,
        status: status.parse::<OfferStatus>().map_err(super::decode_error)?,
        unit_price,
        created_at,
        updated_at,
    })
}

/// 写入新 offer（目录协作方/测试种子使用）
pub async fn insert(pool: &PgPool, offer: &Offer) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO offers (id, store_id, quantity, status, unit_price, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(offer.id)
    .bind(offer.store_id)
    .bind(offer.quantity)
    .bind(offer.status.as_str())
    .bind(offer.unit_price)
    .bind(offer.created_at)
    .bind(offer.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// 读取 offer（无锁）
pub async fn get(pool: &PgPool, offer_id: i64) -> Result<Option<Offer>, sqlx::Error> {
    let row: Option<OfferRow> = sqlx::query_as(
        r#"
        SELECT id, store_id, quantity, status, unit_price, created_at, updated_at
        FROM offers WHERE id = $1
        "#,
    )
    .bind(offer_id)
    .fetch_optional(pool)
    .await?;
    row.map(offer_from_row).transpose()
}

/// 行级排他锁读取 - 同一 offer 的并发扣减在此串行化
pub async fn lock(
    tx: &mut Transaction<'_, Postgres>,
    offer_id: i64,
) -> Result<Option<Offer>, sqlx::Error> {
    let row: Option<OfferRow> = sqlx::query_as(
        r#"
        SELECT id, store_id, quantity, status, unit_price, created_at, updated_at
        FROM offers WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(offer_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.map(offer_from_row).transpose()
}

/// CAS 写回库存：只有余量仍等于读取值时才生效
///
/// 返回受影响行数；0 行表示在拿锁前有写者已变更该行。
pub async fn cas_update_stock(
    tx: &mut Transaction<'_, Postgres>,
    offer_id: i64,
    expected_quantity: i32,
    new_quantity: i32,
    new_status: OfferStatus,
    now: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE offers
        SET quantity = $3, status = $4, updated_at = $5
        WHERE id = $1 AND quantity = $2
        "#,
    )
    .bind(offer_id)
    .bind(expected_quantity)
    .bind(new_quantity)
    .bind(new_status.as_str())
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}
