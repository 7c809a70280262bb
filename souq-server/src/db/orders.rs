//! Order 行访问
//!
//! 订单行项目以 JSONB 序列化存储；状态转移统一走
//! [`transition`]，其 `status = ANY(from)` 守卫保证并发转移
//! 只有一个赢家。

use rust_decimal::Decimal;
use shared::order::{Order, OrderItem, OrderStatus, OrderType, PaymentMethod, PaymentStatus};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

/// 原始行元组，列序与 SELECT_COLUMNS 一致
type OrderRow = (
    i64,                  // id
    i64,                  // user_id
    i64,                  // store_id
    Json<Vec<OrderItem>>, // items
    String,               // order_type
    String,               // payment_method
    String,               // payment_status
    String,               // status
    Option<String>,       // pickup_code
    Option<String>,       // delivery_address
    Decimal,              // delivery_fee
    Decimal,              // total_price
    i64,                  // created_at
    i64,                  // updated_at
);

const SELECT_COLUMNS: &str = "id, user_id, store_id, items, order_type, payment_method, \
     payment_status, status, pickup_code, delivery_address, delivery_fee, total_price, \
     created_at, updated_at";

/// 存储行 -> 规范 struct 的唯一边界映射
fn order_from_row(row: OrderRow) -> Result<Order, sqlx::Error> {
    let (
        id,
        user_id,
        store_id,
        items,
        order_type,
        payment_method,
        payment_status,
        status,
        pickup_code,
        delivery_address,
        delivery_fee,
        total_price,
        created_at,
        updated_at,
    ) = row;
    Ok(Order {
        id,
        user_id,
        store_id,
        items: items.0,
        order_type: order_type.parse::<OrderType>().map_err(super::decode_error)?,
        payment_method: PaymentMethod::from(payment_method),
        payment_status: payment_status
            .parse::<PaymentStatus>()
            .map_err(super::decode_error)?,
        status: status.parse::<OrderStatus>().map_err(super::decode_error)?,
        pickup_code,
        delivery_address,
        delivery_fee,
        total_price,
        created_at,
        updated_at,
    })
}

/// 在事务内写入订单行（与库存扣减同一事务）
pub async fn insert(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO orders (id, user_id, store_id, items, order_type, payment_method,
                            payment_status, status, pickup_code, delivery_address,
                            delivery_fee, total_price, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(order.id)
    .bind(order.user_id)
    .bind(order.store_id)
    .bind(Json(&order.items))
    .bind(order.order_type.as_str())
    .bind(order.payment_method.as_str())
    .bind(order.payment_status.as_str())
    .bind(order.status.as_str())
    .bind(&order.pickup_code)
    .bind(&order.delivery_address)
    .bind(order.delivery_fee)
    .bind(order.total_price)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// 读取订单
pub async fn get(pool: &PgPool, order_id: i64) -> Result<Option<Order>, sqlx::Error> {
    let row: Option<OrderRow> =
        sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id)
            .fetch_optional(pool)
            .await?;
    row.map(order_from_row).transpose()
}

/// 行级排他锁读取 - 状态转移前先锁单
pub async fn lock(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
) -> Result<Option<Order>, sqlx::Error> {
    let row: Option<OrderRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
    ))
    .bind(order_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.map(order_from_row).transpose()
}

/// 守卫式状态转移：status 仍在 `from` 集合内才生效
///
/// `updated_at`（以及需要时的 `payment_status`）与状态变更写在
/// 同一条 UPDATE 中。返回受影响行数。
pub async fn transition(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
    from: &[OrderStatus],
    to: OrderStatus,
    payment_status: Option<PaymentStatus>,
    now: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET status = $3,
            payment_status = COALESCE($4, payment_status),
            updated_at = $5
        WHERE id = $1 AND status = ANY($2)
        "#,
    )
    .bind(order_id)
    .bind(super::status_names(from))
    .bind(to.as_str())
    .bind(payment_status.map(|s| s.as_str().to_string()))
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// 支付状态更新（卖家确认凭证/网关回执）
pub async fn update_payment_status(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
    status: PaymentStatus,
    now: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE orders SET payment_status = $2, updated_at = $3 WHERE id = $1")
        .bind(order_id)
        .bind(status.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

/// 用户未完结订单数（下单上限检查，事务内调用）
pub async fn count_open_for_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
) -> Result<i64, sqlx::Error> {
    let row: (i64,) =
        sqlx::query_as("SELECT count(*) FROM orders WHERE user_id = $1 AND status = ANY($2)")
            .bind(user_id)
            .bind(super::status_names(&super::OPEN_STATUSES))
            .fetch_one(&mut **tx)
            .await?;
    Ok(row.0)
}

/// 用户订单列表（新单在前）
pub async fn list_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Order>, sqlx::Error> {
    let rows: Vec<OrderRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(order_from_row).collect()
}

/// 门店订单列表（卖家端工作台，新单在前）
pub async fn list_for_store(pool: &PgPool, store_id: i64) -> Result<Vec<Order>, sqlx::Error> {
    let rows: Vec<OrderRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM orders WHERE store_id = $1 ORDER BY created_at DESC"
    ))
    .bind(store_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(order_from_row).collect()
}
