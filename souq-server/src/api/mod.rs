//! API 路由
//!
//! 认证网关不在本服务内：身份由上游代理注入的 `X-User-Id` /
//! `X-Store-Id` 头携带，这里只做解析。

pub mod health;
pub mod offers;
pub mod orders;
pub mod ws;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::Router;
use shared::error::AppError;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// 组合路由
pub fn create_router(state: AppState) -> Router {
    let orders = Router::new()
        .route("/api/orders", post(orders::submit).get(orders::list_mine))
        .route("/api/bookings", post(orders::create_booking))
        .route("/api/orders/{id}", get(orders::get_order))
        .route("/api/orders/{id}/confirm", post(orders::confirm))
        .route("/api/orders/{id}/ready", post(orders::mark_ready))
        .route("/api/orders/{id}/deliver", post(orders::start_delivery))
        .route("/api/orders/{id}/complete", post(orders::complete))
        .route("/api/orders/{id}/reject", post(orders::reject))
        .route("/api/orders/{id}/paid", post(orders::mark_paid))
        .route("/api/orders/{id}/cancel", post(orders::cancel))
        .route("/api/store/orders", get(orders::list_for_store));

    let offers = Router::new()
        .route("/api/offers", post(offers::create))
        .route("/api/offers/{id}", get(offers::get));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ws", get(ws::handle_ws))
        .merge(orders)
        .merge(offers)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 从请求头解析数字 ID
fn header_id(parts: &Parts, name: &'static str) -> Result<i64, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::invalid(format!("missing or invalid {name} header")))
}

/// 已认证用户（上游代理注入的 X-User-Id 头）
pub struct UserId(pub i64);

impl FromRequestParts<AppState> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        header_id(parts, "x-user-id").map(Self)
    }
}

/// 已认证门店（卖家端请求的 X-Store-Id 头）
pub struct StoreId(pub i64);

impl FromRequestParts<AppState> for StoreId {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        header_id(parts, "x-store-id").map(Self)
    }
}
