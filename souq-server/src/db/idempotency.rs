//! 幂等记录行访问
//!
//! 复合主键 (key, user_id)；占位插入用 ON CONFLICT DO NOTHING
//! 实现无冲突竞争，响应一经写入不再变更。

use serde_json::Value;
use sqlx::PgPool;

/// 幂等记录（响应字段在订单创建完成前为空）
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub request_hash: String,
    pub response_status: Option<i16>,
    pub response_body: Option<Value>,
}

/// 占位插入；返回 true 表示本次插入赢得竞争
pub async fn try_insert(
    pool: &PgPool,
    key: &str,
    user_id: i64,
    request_hash: &str,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO idempotency_keys (key, user_id, request_hash, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (key, user_id) DO NOTHING
        "#,
    )
    .bind(key)
    .bind(user_id)
    .bind(request_hash)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// 读取已存在的记录
pub async fn fetch(
    pool: &PgPool,
    key: &str,
    user_id: i64,
) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
    let row: Option<(String, Option<i16>, Option<Value>)> = sqlx::query_as(
        r#"
        SELECT request_hash, response_status, response_body
        FROM idempotency_keys
        WHERE key = $1 AND user_id = $2
        "#,
    )
    .bind(key)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(request_hash, response_status, response_body)| IdempotencyRecord {
        request_hash,
        response_status,
        response_body,
    }))
}

/// 写入缓存响应（只写一次，已有响应的记录不可变）
pub async fn store_response(
    pool: &PgPool,
    key: &str,
    user_id: i64,
    status: i16,
    body: &Value,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE idempotency_keys
        SET response_status = $3, response_body = $4
        WHERE key = $1 AND user_id = $2 AND response_body IS NULL
        "#,
    )
    .bind(key)
    .bind(user_id)
    .bind(status)
    .bind(body)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// 删除占位记录（订单创建失败后调用，允许客户端重试同一 key）
pub async fn remove_placeholder(
    pool: &PgPool,
    key: &str,
    user_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM idempotency_keys WHERE key = $1 AND user_id = $2 AND response_body IS NULL",
    )
    .bind(key)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
