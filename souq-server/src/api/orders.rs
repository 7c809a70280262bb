//! 订单接口
//!
//! POST /api/orders 携带 `Idempotency-Key` 头时幂等：真正创建返回
//! 201，同 key 同载荷的重复提交原样回放缓存响应。

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use shared::error::ApiResponse;
use shared::order::{Order, PaymentMethod};

use super::{StoreId, UserId};
use crate::error::ServiceError;
use crate::orders::{CartOrderRequest, SubmitOutcome};
use crate::state::AppState;

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// POST /api/orders — 提交购物车订单（带 `Idempotency-Key` 头则幂等）
pub async fn submit(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    headers: HeaderMap,
    Json(request): Json<CartOrderRequest>,
) -> Result<Response, ServiceError> {
    let key = idempotency_key(&headers);
    match state
        .store
        .submit_cart_order(user_id, key.as_deref(), request)
        .await?
    {
        SubmitOutcome::Created(order) => Ok((
            StatusCode::CREATED,
            Json(ApiResponse::success(order)),
        )
            .into_response()),
        SubmitOutcome::Replayed { status, body } => {
            let status = StatusCode::from_u16(u16::try_from(status).unwrap_or(200))
                .unwrap_or(StatusCode::OK);
            Ok((status, Json(ApiResponse::success(body))).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BookingRequest {
    pub offer_id: i64,
    pub quantity: i32,
    pub payment_method: PaymentMethod,
    /// 可选取货时段（UTC 毫秒）
    pub slot_start: Option<i64>,
}

/// POST /api/bookings — 单项快速预订
pub async fn create_booking(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<BookingRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .store
        .create_booking(
            user_id,
            request.offer_id,
            request.quantity,
            request.payment_method,
            request.slot_start,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))).into_response())
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.store.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// GET /api/orders — 当前用户的订单
pub async fn list_mine(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<ApiResponse<Vec<Order>>>, ServiceError> {
    let orders = state.store.list_for_user(user_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// GET /api/store/orders — 卖家工作台
pub async fn list_for_store(
    State(state): State<AppState>,
    StoreId(store_id): StoreId,
) -> Result<Json<ApiResponse<Vec<Order>>>, ServiceError> {
    let orders = state.store.list_for_store(store_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

// ==================== 状态转移 ====================

/// POST /api/orders/{id}/confirm
pub async fn confirm(
    State(state): State<AppState>,
    StoreId(store_id): StoreId,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.lifecycle.confirm(id, store_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/orders/{id}/ready
pub async fn mark_ready(
    State(state): State<AppState>,
    StoreId(store_id): StoreId,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.lifecycle.mark_ready(id, store_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/orders/{id}/deliver
pub async fn start_delivery(
    State(state): State<AppState>,
    StoreId(store_id): StoreId,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.lifecycle.start_delivery(id, store_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/orders/{id}/complete
pub async fn complete(
    State(state): State<AppState>,
    StoreId(store_id): StoreId,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.lifecycle.complete(id, store_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/orders/{id}/reject
pub async fn reject(
    State(state): State<AppState>,
    StoreId(store_id): StoreId,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.lifecycle.reject(id, store_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/orders/{id}/paid — 卖家确认收款
pub async fn mark_paid(
    State(state): State<AppState>,
    StoreId(store_id): StoreId,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.lifecycle.mark_paid(id, store_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/orders/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.lifecycle.cancel(id, user_id).await?;
    Ok(Json(ApiResponse::success(order)))
}
