//! 应用状态装配
//!
//! 连接池、通知中心、连接注册表与订单服务在这里构建并注入
//! 所有 axum handler。连接池就是全服务共享的有界工作池：
//! 池满时 acquire 超时，统一以 ResourceExhausted 拒绝请求。

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::hub::relay::{RelayBackend, RelayServer};
use crate::hub::NotificationHub;
use crate::orders::{OrderLifecycle, OrderStore};
use crate::realtime::{spawn_sweeper, ConnectionRegistry};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 共享应用状态（全部字段可廉价 Clone）
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub hub: NotificationHub,
    pub registry: Arc<ConnectionRegistry>,
    pub store: OrderStore,
    pub lifecycle: OrderLifecycle,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// 建池、跑迁移、装配服务
    pub async fn new(config: Config) -> Result<Self, BoxError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_millis(config.db_acquire_timeout_ms))
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!().run(&pool).await?;

        let shutdown = CancellationToken::new();

        // 本进程承担中继服务时先起监听，再让自己的后端连上去
        if let Some(listen_addr) = &config.relay_listen_addr {
            let server = RelayServer::bind(listen_addr, shutdown.clone()).await?;
            tracing::info!(addr = %listen_addr, "notification relay listening");
            tokio::spawn(server.run());
        }

        let hub = match &config.relay_addr {
            Some(addr) => {
                let backend =
                    RelayBackend::connect(addr, config.hub_channel_capacity, shutdown.clone())
                        .await?;
                tracing::info!(addr = %addr, "notification hub connected to relay");
                NotificationHub::new(Arc::new(backend))
            }
            None => NotificationHub::local(config.hub_channel_capacity),
        };

        let store = OrderStore::new(
            pool.clone(),
            config.max_open_orders_per_user,
            config.delivery_fee,
            config.pickup_code_length,
        );
        let lifecycle = OrderLifecycle::new(pool.clone(), hub.clone());

        Ok(Self {
            config: Arc::new(config),
            pool,
            hub,
            registry: Arc::new(ConnectionRegistry::new()),
            store,
            lifecycle,
            shutdown,
        })
    }

    /// 启动周期后台任务（失效连接与空通道清扫）
    pub fn start_background_tasks(&self) {
        spawn_sweeper(
            self.registry.clone(),
            self.hub.clone(),
            self.config.sweep_interval_secs,
            self.shutdown.clone(),
        );
    }
}
