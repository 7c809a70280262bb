//! 服务层统一错误
//!
//! `ServiceError` 衔接 db 层错误 (`sqlx::Error`) 与 API 层错误
//! (`AppError`)，让 `?` 传播无需手写
//! `.map_err(|e| { tracing::error!(...); AppError::new(...) })`。

use axum::response::IntoResponse;
use shared::error::{AppError, ErrorCode};

/// 服务层错误 - 只有两种变体
///
/// - `Db`: 数据库/基础设施错误（自动记日志，映射为 DatabaseError）
/// - `App`: 业务规则错误（带正确 ErrorCode，透传给客户端）
#[derive(Debug)]
pub enum ServiceError {
    /// 数据库或基础设施错误
    Db(sqlx::Error),
    /// 业务规则错误
    App(AppError),
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        ServiceError::Db(e)
    }
}

impl From<AppError> for ServiceError {
    fn from(e: AppError) -> Self {
        ServiceError::App(e)
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::App(app_err) => app_err,
            // 池等待超时是共享资源耗尽，对客户端可见为可重试错误
            ServiceError::Db(sqlx::Error::PoolTimedOut) => {
                tracing::warn!("connection pool exhausted");
                AppError::new(ErrorCode::ResourceExhausted)
            }
            ServiceError::Db(db_err) => {
                tracing::error!(error = %db_err, "service database error");
                AppError::new(ErrorCode::DatabaseError)
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(e) => write!(f, "database error: {e}"),
            Self::App(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ServiceError {}

/// 服务层 Result 别名
pub type ServiceResult<T> = Result<T, ServiceError>;
