//! 统一错误系统
//!
//! - [`ErrorCode`]: 全局错误码（按域分段）
//! - [`AppError`]: 携带错误码、消息和结构化细节的应用错误
//! - [`ApiResponse`]: 统一 API 响应格式
//!
//! # 错误码分段
//!
//! - 0xxx: 通用错误
//! - 4xxx: 订单错误
//! - 5xxx: 支付/幂等错误
//! - 6xxx: 库存错误
//! - 9xxx: 系统错误
//!
//! # 示例
//!
//! ```
//! use shared::error::{AppError, ErrorCode};
//!
//! let err = AppError::with_message(ErrorCode::InsufficientStock, "Only 1 left");
//! assert_eq!(err.code, ErrorCode::InsufficientStock);
//! ```

use std::collections::HashMap;

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 全局错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,

    // ==================== 4xxx: Orders ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Transition not allowed from the current status
    InvalidTransition = 4002,
    /// Order is already in a terminal status
    OrderTerminal = 4003,
    /// Too many open orders for this user
    BookingLimit = 4004,
    /// Pickup slot is full
    SlotFull = 4005,

    // ==================== 5xxx: Payment / Idempotency ====================
    /// Idempotency key reused with a different payload
    IdempotencyConflict = 5001,
    /// A request with this idempotency key is still in flight
    IdempotencyInProgress = 5002,

    // ==================== 6xxx: Stock ====================
    /// Offer not found
    OfferNotFound = 6001,
    /// Offer is not active
    OfferInactive = 6002,
    /// Not enough stock to reserve
    InsufficientStock = 6003,
    /// Lost a race against a concurrent stock writer
    ConcurrentUpdate = 6004,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Shared resource exhausted (connection pool, channels)
    ResourceExhausted = 9003,
}

impl ErrorCode {
    /// 默认消息
    pub fn message(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::ValidationFailed => "Validation failed",
            Self::NotFound => "Resource not found",
            Self::AlreadyExists => "Resource already exists",
            Self::InvalidRequest => "Invalid request",
            Self::OrderNotFound => "Order not found",
            Self::InvalidTransition => "Transition not allowed from current status",
            Self::OrderTerminal => "Order is already in a terminal status",
            Self::BookingLimit => "Too many open orders",
            Self::SlotFull => "Pickup slot is full",
            Self::IdempotencyConflict => "Idempotency key reused with a different payload",
            Self::IdempotencyInProgress => "Request is already in progress",
            Self::OfferNotFound => "Offer not found",
            Self::OfferInactive => "Offer is not active",
            Self::InsufficientStock => "Not enough stock",
            Self::ConcurrentUpdate => "Concurrent update detected, please retry",
            Self::InternalError => "Internal server error",
            Self::DatabaseError => "Database error",
            Self::ResourceExhausted => "Resource exhausted, please retry later",
        }
    }

    /// 对应的 HTTP 状态码
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Success => StatusCode::OK,
            Self::ValidationFailed | Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::NotFound | Self::OrderNotFound | Self::OfferNotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists | Self::IdempotencyConflict | Self::ConcurrentUpdate => {
                StatusCode::CONFLICT
            }
            Self::IdempotencyInProgress => StatusCode::CONFLICT,
            Self::InvalidTransition
            | Self::OrderTerminal
            | Self::BookingLimit
            | Self::SlotFull
            | Self::OfferInactive
            | Self::InsufficientStock => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError | Self::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 数字错误码
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

/// 应用错误 - 带错误码、消息和可选细节
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
    /// 错误码
    pub code: ErrorCode,
    /// 人类可读的错误消息
    pub message: String,
    /// 可选的结构化细节（字段错误、上下文等）
    pub details: Option<HashMap<String, Value>>,
}

impl AppError {
    /// 使用错误码的默认消息创建错误
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            details: None,
        }
    }

    /// 使用自定义消息创建错误
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// 追加一条细节
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// HTTP 状态码
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    // ==================== Convenience constructors ====================

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ValidationFailed, msg)
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        let r = resource.into();
        Self::with_message(ErrorCode::NotFound, format!("{} not found", r)).with_detail("resource", r)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, msg)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidRequest, msg)
    }
}

/// API 统一响应结构
///
/// ```json
/// { "code": 0, "message": "Success", "data": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 数字错误码（0 表示成功）
    pub code: u16,
    /// 消息
    pub message: String,
    /// 响应数据
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 成功响应
    pub fn success(data: T) -> Self {
        Self {
            code: ErrorCode::Success.as_u16(),
            message: ErrorCode::Success.message().to_string(),
            data: Some(data),
        }
    }

    /// 错误响应
    pub fn error(err: &AppError) -> Self {
        Self {
            code: err.code.as_u16(),
            message: err.message.clone(),
            data: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = ApiResponse::<()>::error(&self);
        (status, Json(body)).into_response()
    }
}

/// Result 别名
pub type AppResult<T> = Result<T, AppError>;
