//! 过期清扫定时任务
//!
//! 每小时第 7 分钟扫描一批未核销预约，按业务时区判定是否过期，
//! 逐条做乐观过期更新。单条失败只记日志，绝不中断整批。

use chrono::{DateTime, Duration as ChronoDuration, Timelike};
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use super::lifecycle;
use crate::db::repository::reservation as reservation_repo;
use crate::utils::time;

/// Upper bound of open reservations examined per run.
const SWEEP_BATCH_SIZE: i64 = 1000;

/// Minute-of-hour the sweep fires at. Offset from the top of the hour so it
/// never races the slot cutoffs themselves.
const SWEEP_MINUTE: u32 = 7;

/// Outcome counters for one sweep run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub expired: usize,
    /// Version predicate missed: another writer changed the record first.
    /// Left for the next run.
    pub conflicts: usize,
    pub errors: usize,
}

/// Hourly expiration sweeper, driven as a background task.
pub struct ExpirationSweeper {
    pool: SqlitePool,
    tz: Tz,
    shutdown: CancellationToken,
}

impl ExpirationSweeper {
    pub fn new(pool: SqlitePool, tz: Tz, shutdown: CancellationToken) -> Self {
        Self { pool, tz, shutdown }
    }

    /// Run until the shutdown token fires.
    pub async fn run(self) {
        tracing::info!(minute = SWEEP_MINUTE, "Expiration sweeper started");
        loop {
            let delay = self.delay_until_next_run();
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Expiration sweeper stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let stats = self.sweep().await;
            tracing::info!(
                scanned = stats.scanned,
                expired = stats.expired,
                conflicts = stats.conflicts,
                errors = stats.errors,
                "Expiration sweep finished"
            );
        }
    }

    fn delay_until_next_run(&self) -> std::time::Duration {
        let now = time::now_in(self.tz);
        let mut next = now
            .with_minute(SWEEP_MINUTE)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        if next <= now {
            next += ChronoDuration::hours(1);
        }
        (next - now).to_std().unwrap_or_default()
    }

    /// One sweep against the current business-timezone clock.
    pub async fn sweep(&self) -> SweepStats {
        self.sweep_at(time::now_in(self.tz)).await
    }

    /// One sweep against an explicit clock. Each expiration is an optimistic
    /// update; a record that changed since it was read is skipped and
    /// retried on the next run.
    pub async fn sweep_at(&self, now: DateTime<Tz>) -> SweepStats {
        let mut stats = SweepStats::default();

        let batch = match reservation_repo::find_not_started(&self.pool, SWEEP_BATCH_SIZE).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "Expiration sweep could not load candidates");
                stats.errors += 1;
                return stats;
            }
        };

        for reservation in batch {
            stats.scanned += 1;

            let visit_date = match time::parse_date(&reservation.visit_date) {
                Ok(d) => d,
                Err(_) => {
                    tracing::warn!(
                        reservation_no = %reservation.reservation_no,
                        visit_date = %reservation.visit_date,
                        "Unparseable visit date, skipping"
                    );
                    stats.errors += 1;
                    continue;
                }
            };
            if !lifecycle::should_expire(visit_date, reservation.time_slot, now) {
                continue;
            }

            match reservation_repo::expire(
                &self.pool,
                reservation.id,
                reservation.version,
                shared::util::now_millis(),
            )
            .await
            {
                Ok(1) => {
                    tracing::info!(
                        reservation_no = %reservation.reservation_no,
                        visit_date = %reservation.visit_date,
                        time_slot = reservation.time_slot,
                        "Reservation expired"
                    );
                    stats.expired += 1;
                }
                Ok(_) => {
                    tracing::warn!(
                        reservation_no = %reservation.reservation_no,
                        "Concurrent update during expiration, will retry next run"
                    );
                    stats.conflicts += 1;
                }
                Err(e) => {
                    tracing::error!(
                        reservation_no = %reservation.reservation_no,
                        error = %e,
                        "Failed to expire reservation"
                    );
                    stats.errors += 1;
                }
            }
        }

        stats
    }
}
