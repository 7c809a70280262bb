//! Offer 管理接口（目录协作方种入库存单元）

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::error::{ApiResponse, AppError, ErrorCode};
use shared::order::{Offer, OfferStatus};
use shared::util::{now_millis, snowflake_id};
use validator::Validate;

use super::StoreId;
use crate::db;
use crate::error::ServiceError;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOfferRequest {
    #[validate(range(min = 0, message = "quantity must not be negative"))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// POST /api/offers
pub async fn create(
    State(state): State<AppState>,
    StoreId(store_id): StoreId,
    Json(request): Json<CreateOfferRequest>,
) -> Result<Json<ApiResponse<Offer>>, ServiceError> {
    request
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;
    if request.unit_price < Decimal::ZERO {
        return Err(AppError::validation("unit_price must not be negative").into());
    }

    let now = now_millis();
    let offer = Offer {
        id: snowflake_id(),
        store_id,
        status: OfferStatus::Active.derive(request.quantity),
        quantity: request.quantity,
        unit_price: request.unit_price,
        created_at: now,
        updated_at: now,
    };
    db::offers::insert(&state.pool, &offer).await?;

    tracing::info!(offer_id = offer.id, store_id, "offer created");
    Ok(Json(ApiResponse::success(offer)))
}

/// GET /api/offers/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Offer>>, ServiceError> {
    let offer = db::offers::get(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::OfferNotFound))?;
    Ok(Json(ApiResponse::success(offer)))
}
