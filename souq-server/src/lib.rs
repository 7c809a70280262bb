//! souq-server — 市集订单与库存一致性引擎
//!
//! | 模块 | 职责 |
//! |------|------|
//! | `inventory` | 库存台账：行锁 + CAS 的原子预留/回补 |
//! | `idempotency` | 幂等闸：占位/回放/冲突判定 |
//! | `orders` | 订单创建事务与状态机执行 |
//! | `hub` | 通知中心：按通道扇出，本地广播或 TCP 中继 |
//! | `realtime` | WebSocket 连接注册表与清扫 |
//! | `api` | HTTP/WebSocket 路由 |
//! | `db` | PostgreSQL 行访问 |

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod idempotency;
pub mod inventory;
pub mod orders;
pub mod realtime;
pub mod state;

pub use config::Config;
pub use error::{ServiceError, ServiceResult};
pub use state::AppState;
