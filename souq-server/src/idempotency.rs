//! 幂等闸 - 同一 (key, user) 的重复提交返回缓存响应
//!
//! 提交流程分三步：
//!
//! 1. [`IdempotencyGuard::check_or_reserve`] - 规范化请求哈希，
//!    尝试占位插入；占位赢得竞争才放行创建。
//! 2. 订单创建成功后 [`IdempotencyGuard::store_response`] 写入
//!    缓存响应（只写一次）。
//! 3. 创建失败则 [`IdempotencyGuard::remove_placeholder`] 删除
//!    占位，允许客户端携同一 key 重试。
//!
//! 纯决策逻辑抽出为 [`decide`]，可脱离存储单独测试。

use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::db;
use crate::db::idempotency::IdempotencyRecord;

/// check_or_reserve 的判定结果
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyCheck {
    /// 占位成功，放行订单创建
    Proceed,
    /// 同 key 同载荷已完成，返回缓存响应
    Replay { status: i16, body: Value },
    /// 同 key 同载荷仍在创建中
    InProgress,
    /// 同 key 不同载荷
    Conflict,
}

/// 已有记录 + 本次请求哈希 -> 判定
///
/// 占位竞争（记录不存在时谁先插入）不在这里，由调用方的
/// try_insert 处理；这里只对已存在的记录分类。
pub fn decide(record: &IdempotencyRecord, request_hash: &str) -> IdempotencyCheck {
    if record.request_hash != request_hash {
        return IdempotencyCheck::Conflict;
    }
    match (&record.response_body, record.response_status) {
        (Some(body), Some(status)) => IdempotencyCheck::Replay {
            status,
            body: body.clone(),
        },
        _ => IdempotencyCheck::InProgress,
    }
}

/// 规范化请求哈希
///
/// 字段按固定顺序序列化，行项目先按 offer_id 排序再参与哈希，
/// 保证语义相同但顺序不同的载荷得到同一指纹。
pub fn canonical_request_hash(
    user_id: i64,
    store_id: i64,
    order_type: &str,
    payment_method: &str,
    delivery_address: Option<&str>,
    items: &[(i64, i32)],
) -> String {
    let mut sorted: Vec<(i64, i32)> = items.to_vec();
    sorted.sort_by_key(|(offer_id, _)| *offer_id);

    let mut hasher = Sha256::new();
    hasher.update(user_id.to_le_bytes());
    hasher.update(store_id.to_le_bytes());
    hasher.update(order_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(payment_method.as_bytes());
    hasher.update([0u8]);
    hasher.update(delivery_address.unwrap_or("").as_bytes());
    hasher.update([0u8]);
    for (offer_id, quantity) in &sorted {
        hasher.update(offer_id.to_le_bytes());
        hasher.update(quantity.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// 幂等闸（占位与响应缓存都落在 idempotency_keys 表）
#[derive(Clone)]
pub struct IdempotencyGuard {
    pool: PgPool,
}

impl IdempotencyGuard {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 占位或判定已有记录
    ///
    /// try_insert 与 fetch 之间没有窗口问题：插入失败说明记录
    /// 已存在，读出来分类即可。极端情况下并发方赢得占位但尚未
    /// 写响应，分类为 InProgress，客户端稍后重试。
    pub async fn check_or_reserve(
        &self,
        key: &str,
        user_id: i64,
        request_hash: &str,
        now: i64,
    ) -> Result<IdempotencyCheck, sqlx::Error> {
        if db::idempotency::try_insert(&self.pool, key, user_id, request_hash, now).await? {
            return Ok(IdempotencyCheck::Proceed);
        }
        match db::idempotency::fetch(&self.pool, key, user_id).await? {
            Some(record) => Ok(decide(&record, request_hash)),
            // 占位刚被失败清理删除，让客户端重试
            None => Ok(IdempotencyCheck::InProgress),
        }
    }

    /// 写入缓存响应
    pub async fn store_response(
        &self,
        key: &str,
        user_id: i64,
        status: i16,
        body: &Value,
    ) -> Result<(), sqlx::Error> {
        let rows = db::idempotency::store_response(&self.pool, key, user_id, status, body).await?;
        if rows == 0 {
            tracing::warn!(key, user_id, "idempotency response already stored");
        }
        Ok(())
    }

    /// 创建失败后删除占位
    pub async fn remove_placeholder(&self, key: &str, user_id: i64) -> Result<(), sqlx::Error> {
        db::idempotency::remove_placeholder(&self.pool, key, user_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(hash: &str, response: Option<(i16, Value)>) -> IdempotencyRecord {
        let (response_status, response_body) = match response {
            Some((s, b)) => (Some(s), Some(b)),
            None => (None, None),
        };
        IdempotencyRecord {
            request_hash: hash.to_string(),
            response_status,
            response_body,
        }
    }

    #[test]
    fn same_hash_with_response_replays() {
        let rec = record("abc", Some((201, json!({"order_id": 1}))));
        assert_eq!(
            decide(&rec, "abc"),
            IdempotencyCheck::Replay {
                status: 201,
                body: json!({"order_id": 1}),
            }
        );
    }

    #[test]
    fn same_hash_without_response_is_in_progress() {
        let rec = record("abc", None);
        assert_eq!(decide(&rec, "abc"), IdempotencyCheck::InProgress);
    }

    #[test]
    fn different_hash_conflicts_regardless_of_completion() {
        assert_eq!(decide(&record("abc", None), "xyz"), IdempotencyCheck::Conflict);
        assert_eq!(
            decide(&record("abc", Some((201, json!({})))), "xyz"),
            IdempotencyCheck::Conflict
        );
    }

    #[test]
    fn hash_ignores_item_order() {
        let a = canonical_request_hash(7, 3, "pickup", "cash", None, &[(10, 2), (5, 1)]);
        let b = canonical_request_hash(7, 3, "pickup", "cash", None, &[(5, 1), (10, 2)]);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_is_sensitive_to_payload_fields() {
        let base = canonical_request_hash(7, 3, "pickup", "cash", None, &[(5, 1)]);
        assert_ne!(
            base,
            canonical_request_hash(7, 3, "pickup", "cash", None, &[(5, 2)])
        );
        assert_ne!(
            base,
            canonical_request_hash(7, 3, "delivery", "cash", Some("rua x"), &[(5, 1)])
        );
        assert_ne!(
            base,
            canonical_request_hash(8, 3, "pickup", "cash", None, &[(5, 1)])
        );
    }

    #[test]
    fn hash_fields_do_not_bleed_into_each_other() {
        // 分隔符保证 ("ab","c") 与 ("a","bc") 不同
        let a = canonical_request_hash(1, 1, "ab", "c", None, &[]);
        let b = canonical_request_hash(1, 1, "a", "bc", None, &[]);
        assert_ne!(a, b);
    }
}
