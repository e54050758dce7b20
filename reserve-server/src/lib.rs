//! Reserve Server - 景区个人预约服务
//!
//! # 架构概述
//!
//! 面向景区访客管理的预约后端，核心是个人预约子系统：
//!
//! - **去重指纹 + 锁协调** (`reservations::dedup`): 短 TTL claim 防重复提交，
//!   协调服务不可用时降级为持久层探查
//! - **乐观并发持久层** (`db`): 版本号谓词更新，0 行命中即冲突
//! - **状态机** (`reservations::lifecycle`): NOT_STARTED → CANCELLED / VERIFIED / EXPIRED
//! - **过期清扫** (`reservations::sweeper`): 每小时按业务时区批量过期
//! - **HTTP API** (`api`): RESTful 预约接口
//!
//! # 模块结构
//!
//! ```text
//! reserve-server/src/
//! ├── core/          # 配置、状态、后台任务
//! ├── auth/          # 网关透传的请求方身份
//! ├── api/           # HTTP 路由和处理器
//! ├── reservations/  # 预约核心域
//! ├── db/            # 数据库层
//! └── utils/         # 错误、日志、时间、校验
//! ```

pub mod api;
pub mod auth;
pub mod core;
pub mod db;
pub mod reservations;
pub mod utils;

// Re-export 公共类型
pub use auth::CurrentUser;
pub use core::{Config, Server, ServerState};
pub use reservations::{ReservationError, ReservationService};
pub use utils::{AppError, AppResult};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

pub fn print_banner() {
    println!(
        r#"
    ____
   / __ \___  ________  ______   _____
  / /_/ / _ \/ ___/ _ \/ ___/ | / / _ \
 / _, _/  __(__  )  __/ /   | |/ /  __/
/_/ |_|\___/____/\___/_/    |___/\___/
"#
    );
}
