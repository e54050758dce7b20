//! 个人预约核心域
//!
//! # 模块结构
//!
//! - [`fingerprint`] - 去重指纹构造
//! - [`dedup`] - 锁协调器与双路去重策略
//! - [`lifecycle`] - 预约状态机与过期判定
//! - [`service`] - 预约服务编排
//! - [`sweeper`] - 过期清扫定时任务

pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod lifecycle;
pub mod service;
pub mod sweeper;

pub use dedup::{LockCoordinator, MemorySlotLock, RedisSlotLock};
pub use error::ReservationError;
pub use service::ReservationService;
pub use sweeper::ExpirationSweeper;
