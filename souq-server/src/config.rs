//! 服务配置

use rust_decimal::Decimal;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 服务配置 - 全部来自环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | DATABASE_URL | (必填) | PostgreSQL 连接串 |
/// | HTTP_PORT | 8080 | HTTP/WebSocket 端口 |
/// | DB_MAX_CONNECTIONS | 10 | 连接池上限 |
/// | DB_ACQUIRE_TIMEOUT_MS | 5000 | 取连接等待上限（超时 = 资源耗尽） |
/// | MAX_OPEN_ORDERS_PER_USER | 10 | 单用户未完结订单上限 |
/// | DELIVERY_FEE | 2.50 | 配送费 |
/// | PICKUP_CODE_LENGTH | 6 | 取货码长度 |
/// | SWEEP_INTERVAL_SECS | 30 | 失效连接清扫周期 |
/// | HUB_CHANNEL_CAPACITY | 256 | 每通道广播缓冲 |
/// | RELAY_ADDR | (无) | 设置后通知走远程中继（多实例部署） |
/// | RELAY_LISTEN_ADDR | (无) | 设置后本进程同时承担中继服务 |
/// | ENVIRONMENT | development | 运行环境 |
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL 连接串
    pub database_url: String,
    /// HTTP/WebSocket 端口
    pub http_port: u16,
    /// 连接池上限（共享有界工作池）
    pub db_max_connections: u32,
    /// 取连接等待上限（毫秒）
    pub db_acquire_timeout_ms: u64,
    /// 单用户未完结订单上限
    pub max_open_orders_per_user: i64,
    /// 配送单附加费
    pub delivery_fee: Decimal,
    /// 取货码长度
    pub pickup_code_length: usize,
    /// 失效连接清扫周期（秒）
    pub sweep_interval_secs: u64,
    /// 每通道广播缓冲容量
    pub hub_channel_capacity: usize,
    /// 远程通知中继地址（多实例部署时必填，见 NotificationHub）
    pub relay_addr: Option<String>,
    /// 本进程承担中继服务时的监听地址
    pub relay_listen_addr: Option<String>,
    /// 运行环境: development | staging | production
    pub environment: String,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, BoxError> {
        let delivery_fee = match std::env::var("DELIVERY_FEE") {
            Ok(v) => v
                .parse::<Decimal>()
                .map_err(|e| format!("invalid DELIVERY_FEE: {e}"))?,
            Err(_) => Decimal::new(250, 2), // 2.50
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?,
            http_port: env_parse("HTTP_PORT", 8080),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 10),
            db_acquire_timeout_ms: env_parse("DB_ACQUIRE_TIMEOUT_MS", 5000),
            max_open_orders_per_user: env_parse("MAX_OPEN_ORDERS_PER_USER", 10),
            delivery_fee,
            pickup_code_length: env_parse("PICKUP_CODE_LENGTH", 6),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 30),
            hub_channel_capacity: env_parse("HUB_CHANNEL_CAPACITY", 256),
            relay_addr: std::env::var("RELAY_ADDR").ok().filter(|s| !s.is_empty()),
            relay_listen_addr: std::env::var("RELAY_LISTEN_ADDR")
                .ok()
                .filter(|s| !s.is_empty()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
