//! souq-server — 市集订单与库存一致性引擎
//!
//! 常驻服务：
//! - 原子库存预留（防超卖）与幂等下单
//! - 订单状态机（自取/配送两条路径）
//! - 按通道扇出的实时通知（WebSocket + 可选 TCP 中继）

use souq_server::api;
use souq_server::{AppState, Config};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "souq_server=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting souq-server (env: {})", config.environment);

    let state = AppState::new(config).await?;
    state.start_background_tasks();

    let app = api::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", state.config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("souq-server listening on {addr}");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
