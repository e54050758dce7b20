//! 服务器状态
//!
//! 启动时装配数据库、锁协调器与预约服务，供路由层和后台任务共享。

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::core::config::Config;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::db::DbService;
use crate::reservations::{
    ExpirationSweeper, LockCoordinator, MemorySlotLock, RedisSlotLock, ReservationService,
};
use crate::utils::AppError;

/// Shared application state, cheap to clone into every handler.
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub pool: SqlitePool,
    pub coordinator: Arc<LockCoordinator>,
    pub reservations: Arc<ReservationService>,
}

impl ServerState {
    /// Assemble all services from the configuration.
    ///
    /// A failed coordination-service handshake is not fatal: the server
    /// starts with the coordinator disconnected and every duplicate check
    /// takes the store-fallback path until a restart.
    pub async fn initialize(config: &Config) -> Result<Self, AppError> {
        if let Some(parent) = std::path::Path::new(&config.database_path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::internal(format!("Failed to create data dir: {e}")))?;
        }
        let db = DbService::new(&config.database_path).await?;

        let coordinator = Arc::new(match &config.redis_url {
            Some(url) => match RedisSlotLock::connect(url).await {
                Ok(lock) => {
                    tracing::info!("Lock coordination via Redis");
                    LockCoordinator::new(Arc::new(lock))
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Lock coordination unreachable at startup, duplicate checks fall back to the store"
                    );
                    LockCoordinator::disconnected()
                }
            },
            None => {
                tracing::info!("REDIS_URL not set, using in-process slot lock");
                LockCoordinator::new(Arc::new(MemorySlotLock::new()))
            }
        });

        let reservations = Arc::new(ReservationService::new(
            db.pool.clone(),
            coordinator.clone(),
            config.timezone,
        ));

        Ok(Self {
            config: config.clone(),
            pool: db.pool,
            coordinator,
            reservations,
        })
    }

    /// Register long-running tasks with the task manager.
    pub fn start_background_tasks(&self, tasks: &mut BackgroundTasks) {
        let sweeper = ExpirationSweeper::new(
            self.pool.clone(),
            self.config.timezone,
            tasks.shutdown_token(),
        );
        tasks.spawn("expiration_sweeper", TaskKind::Periodic, sweeper.run());
    }
}
