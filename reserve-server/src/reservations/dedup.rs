//! 锁协调器与双路去重策略
//!
//! 正常路径：共享 KV 服务上的 claim-if-absent（SET NX EX）；
//! 降级路径：协调服务不可用时直接探查持久层中的同槽位预约。
//! 两条路径实现同一个 [`DedupStrategy`] 接口，由健康标志选择。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use sqlx::SqlitePool;

use super::error::ReservationError;
use crate::db::repository::reservation as reservation_repo;

/// Claim TTL. Deliberately not released on success: the held claim throttles
/// an immediate repeat submission of the same fingerprint for its remainder.
pub const CLAIM_TTL: Duration = Duration::from_secs(30);

/// After a connectivity failure the coordinator reports unavailable for this
/// long, then lets the next create re-probe the backend.
const RETRY_WINDOW_MS: i64 = 30_000;

/// Lock backend connectivity error. Never surfaced to callers of the
/// reservation API — the service recovers via the store fallback.
#[derive(Debug, thiserror::Error)]
#[error("lock backend unreachable: {0}")]
pub struct LockError(pub String);

/// Short-lived, at-most-one-holder claims over a fingerprint key.
#[async_trait]
pub trait SlotLockBackend: Send + Sync {
    /// Atomic "set if absent". `true` iff this caller is the first to claim
    /// the key within the TTL window.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Best-effort delete.
    async fn delete(&self, key: &str) -> Result<(), LockError>;
}

/// Redis-backed slot lock via `SET key NX EX ttl`.
///
/// Connection pooling and reconnection are handled by [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisSlotLock {
    conn_manager: ConnectionManager,
}

impl RedisSlotLock {
    /// Connect to the coordination service.
    ///
    /// Fails only if the initial handshake fails; afterwards the manager
    /// reconnects on its own and individual calls report [`LockError`].
    pub async fn connect(redis_url: &str) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| LockError(format!("invalid redis url: {e}")))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| LockError(format!("redis handshake failed: {e}")))?;
        Ok(Self { conn_manager })
    }
}

#[async_trait]
impl SlotLockBackend for RedisSlotLock {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError(e.to_string()))?;
        // SET NX replies OK when the key was set, nil when already held
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), LockError> {
        let mut conn = self.conn_manager.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError(e.to_string()))?;
        Ok(())
    }
}

/// In-process slot lock for single-node deployments and tests.
#[derive(Default)]
pub struct MemorySlotLock {
    /// key → claim expiry
    entries: DashMap<String, Instant>,
}

impl MemorySlotLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotLockBackend for MemorySlotLock {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        // Keys rarely repeat across booking attempts, so without eviction
        // expired claims accumulate for the life of the process.
        self.entries.retain(|_, expiry| *expiry > now);
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(free) => {
                free.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), LockError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Wraps a [`SlotLockBackend`] and tracks its health.
///
/// The availability flag is an explicit field on the instance (not a
/// process-wide singleton): cleared by any successful call, set by any
/// connectivity failure, re-probed after [`RETRY_WINDOW_MS`].
pub struct LockCoordinator {
    backend: Option<Arc<dyn SlotLockBackend>>,
    available: AtomicBool,
    last_failure_ms: AtomicI64,
}

impl LockCoordinator {
    pub fn new(backend: Arc<dyn SlotLockBackend>) -> Self {
        Self {
            backend: Some(backend),
            available: AtomicBool::new(true),
            last_failure_ms: AtomicI64::new(0),
        }
    }

    /// Coordinator without a backend: permanently unavailable, every create
    /// uses the store-fallback duplicate check. Used when the coordination
    /// service handshake fails at startup.
    pub fn disconnected() -> Self {
        Self {
            backend: None,
            available: AtomicBool::new(false),
            last_failure_ms: AtomicI64::new(i64::MAX),
        }
    }

    /// Claim the key for [`CLAIM_TTL`]. `Ok(true)` iff this caller won.
    pub async fn claim(&self, key: &str) -> Result<bool, LockError> {
        let Some(backend) = &self.backend else {
            return Err(LockError("no lock backend configured".into()));
        };
        match backend.set_if_absent(key, CLAIM_TTL).await {
            Ok(won) => {
                self.available.store(true, Ordering::Relaxed);
                Ok(won)
            }
            Err(e) => {
                self.mark_failed();
                Err(e)
            }
        }
    }

    /// Best-effort release, used only on failure paths after a won claim.
    pub async fn release(&self, key: &str) {
        let Some(backend) = &self.backend else {
            return;
        };
        match backend.delete(key).await {
            Ok(()) => self.available.store(true, Ordering::Relaxed),
            Err(e) => {
                self.mark_failed();
                // The claim will expire with its TTL anyway
                tracing::warn!(key = %key, error = %e, "Failed to release slot claim");
            }
        }
    }

    /// Health as observed by the most recent backend call. After a failure
    /// the coordinator stays unavailable for the retry window, then reports
    /// available again so the next create re-probes the backend.
    pub fn is_available(&self) -> bool {
        if self.backend.is_none() {
            return false;
        }
        if self.available.load(Ordering::Relaxed) {
            return true;
        }
        let failed_at = self.last_failure_ms.load(Ordering::Relaxed);
        shared::util::now_millis().saturating_sub(failed_at) >= RETRY_WINDOW_MS
    }

    fn mark_failed(&self) {
        self.available.store(false, Ordering::Relaxed);
        self.last_failure_ms
            .store(shared::util::now_millis(), Ordering::Relaxed);
    }
}

/// One reservation attempt as seen by the duplicate check.
pub struct DedupRequest<'a> {
    pub fingerprint: &'a str,
    pub visit_date: &'a str,
    pub time_slot: i64,
    pub id_type: &'a str,
    pub id_number: &'a str,
    pub user_id: Option<i64>,
}

/// Outcome of an admitted attempt. `claimed` records whether a lock claim
/// is held and must be released should the write fail afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub claimed: bool,
}

/// Duplicate check over one fingerprint; rejections arrive as
/// [`ReservationError::Duplicate`].
#[async_trait]
pub trait DedupStrategy: Send + Sync {
    async fn admit(&self, request: &DedupRequest<'_>) -> Result<Admission, ReservationError>;
}

/// Fast path: claim the fingerprint on the lock coordinator.
pub struct LockFirstDedup {
    coordinator: Arc<LockCoordinator>,
}

impl LockFirstDedup {
    pub fn new(coordinator: Arc<LockCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl DedupStrategy for LockFirstDedup {
    async fn admit(&self, request: &DedupRequest<'_>) -> Result<Admission, ReservationError> {
        match self.coordinator.claim(request.fingerprint).await {
            Ok(true) => Ok(Admission { claimed: true }),
            Ok(false) => Err(ReservationError::Duplicate {
                message: "Duplicate reservation or submitting too frequently, please retry later"
                    .into(),
                owned_by_caller: true,
            }),
            Err(e) => Err(ReservationError::CoordinationUnavailable(e.to_string())),
        }
    }
}

/// Degraded path: probe the persistent store for an existing, non-cancelled
/// reservation with the same slot identity. Two requests racing this read
/// can both pass — a narrow duplicate-admission window accepted for
/// availability while the coordination service is down.
pub struct StoreFallbackDedup {
    pool: SqlitePool,
}

impl StoreFallbackDedup {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DedupStrategy for StoreFallbackDedup {
    async fn admit(&self, request: &DedupRequest<'_>) -> Result<Admission, ReservationError> {
        let existing = reservation_repo::find_active_by_slot_identity(
            &self.pool,
            request.visit_date,
            request.time_slot,
            request.id_type,
            request.id_number,
        )
        .await?;

        match existing {
            None => Ok(Admission { claimed: false }),
            Some(found) => {
                let owned_by_caller =
                    request.user_id.is_some() && found.user_id == request.user_id;
                let message = if owned_by_caller {
                    "You have already booked this time slot".to_string()
                } else {
                    "This time slot has already been booked for this visitor".to_string()
                };
                Err(ReservationError::Duplicate {
                    message,
                    owned_by_caller,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_lock_first_claim_wins() {
        let lock = MemorySlotLock::new();
        assert!(lock.set_if_absent("k", CLAIM_TTL).await.unwrap());
        assert!(!lock.set_if_absent("k", CLAIM_TTL).await.unwrap());
        assert!(lock.set_if_absent("other", CLAIM_TTL).await.unwrap());
    }

    #[tokio::test]
    async fn memory_lock_expired_claim_can_be_retaken() {
        let lock = MemorySlotLock::new();
        assert!(lock.set_if_absent("k", Duration::ZERO).await.unwrap());
        assert!(lock.set_if_absent("k", CLAIM_TTL).await.unwrap());
    }

    #[tokio::test]
    async fn memory_lock_evicts_expired_claims() {
        let lock = MemorySlotLock::new();
        // Every booking attempt brings a fresh key; the table must not
        // retain the dead ones.
        for i in 0..1000 {
            assert!(
                lock.set_if_absent(&format!("k{i}"), Duration::ZERO)
                    .await
                    .unwrap()
            );
        }
        assert!(lock.set_if_absent("live", CLAIM_TTL).await.unwrap());
        assert_eq!(lock.entries.len(), 1);
    }

    #[tokio::test]
    async fn memory_lock_delete_frees_the_key() {
        let lock = MemorySlotLock::new();
        assert!(lock.set_if_absent("k", CLAIM_TTL).await.unwrap());
        lock.delete("k").await.unwrap();
        assert!(lock.set_if_absent("k", CLAIM_TTL).await.unwrap());
    }

    #[tokio::test]
    async fn coordinator_reports_health() {
        let coordinator = LockCoordinator::new(Arc::new(MemorySlotLock::new()));
        assert!(coordinator.is_available());
        assert!(coordinator.claim("k").await.unwrap());
        assert!(!coordinator.claim("k").await.unwrap());
        assert!(coordinator.is_available());

        let disconnected = LockCoordinator::disconnected();
        assert!(!disconnected.is_available());
        assert!(disconnected.claim("k").await.is_err());
        assert!(!disconnected.is_available());
    }

    #[tokio::test]
    async fn release_frees_a_won_claim() {
        let coordinator = LockCoordinator::new(Arc::new(MemorySlotLock::new()));
        assert!(coordinator.claim("k").await.unwrap());
        coordinator.release("k").await;
        assert!(coordinator.claim("k").await.unwrap());
    }
}
