use chrono_tz::Tz;

/// 服务器配置
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | HTTP_PORT | 3000 | HTTP 服务端口 |
/// | DATABASE_PATH | ./data/reserve.db | SQLite 数据库路径 |
/// | REDIS_URL | (未设置) | 锁协调服务地址；未设置时使用进程内锁 |
/// | BUSINESS_TIMEZONE | Asia/Shanghai | 业务时区（"今天"、时段截止的基准） |
/// | ENVIRONMENT | development | 运行环境 |
///
/// # 示例
///
/// ```ignore
/// HTTP_PORT=8080 REDIS_URL=redis://127.0.0.1:6379 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API 服务端口
    pub http_port: u16,
    /// SQLite 数据库路径
    pub database_path: String,
    /// 锁协调服务 (Redis) 地址；`None` 时退化为进程内锁
    pub redis_url: Option<String>,
    /// 业务时区
    pub timezone: Tz,
    /// 运行环境: development | staging | production
    pub environment: String,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        let timezone = match std::env::var("BUSINESS_TIMEZONE") {
            Ok(name) => name.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    timezone = %name,
                    "Unknown BUSINESS_TIMEZONE, falling back to Asia/Shanghai"
                );
                chrono_tz::Asia::Shanghai
            }),
            Err(_) => chrono_tz::Asia::Shanghai,
        };

        Self {
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./data/reserve.db".into()),
            redis_url: std::env::var("REDIS_URL").ok(),
            timezone,
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
