//! 预约服务编排
//!
//! create 流程：校验 → 指纹 → 去重准入（锁优先，降级走持久层探查）→
//! 原子写入；cancel / verify 流程：读取 → 状态机守卫 → 乐观更新。
//! 版本冲突（0 行命中）一律上抛，由调用方决定是否重试。

use std::sync::Arc;

use chrono_tz::Tz;
use sqlx::SqlitePool;

use shared::models::{
    PERSON_TYPE_CHILD, Page, Reservation, ReservationCancel, ReservationCreate, ReservationDetail,
    ReservationPerson, ReservationQuery, ReservationStatus, ReservationVerify,
};
use shared::util::{now_millis, reservation_no, snowflake_id};

use super::dedup::{
    Admission, DedupRequest, DedupStrategy, LockCoordinator, LockFirstDedup, StoreFallbackDedup,
};
use super::error::ReservationError;
use super::{fingerprint, lifecycle};
use crate::db::repository::reservation as reservation_repo;
use crate::utils::time;

const MAX_PAGE_SIZE: i64 = 100;

/// Reservation use-case facade shared by the HTTP handlers and the sweeper.
pub struct ReservationService {
    pool: SqlitePool,
    coordinator: Arc<LockCoordinator>,
    lock_dedup: LockFirstDedup,
    store_dedup: StoreFallbackDedup,
    tz: Tz,
}

impl ReservationService {
    pub fn new(pool: SqlitePool, coordinator: Arc<LockCoordinator>, tz: Tz) -> Self {
        Self {
            lock_dedup: LockFirstDedup::new(coordinator.clone()),
            store_dedup: StoreFallbackDedup::new(pool.clone()),
            pool,
            coordinator,
            tz,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Create a reservation for the given (possibly anonymous) user.
    /// `actor` is the audit-trail string for `create_by`/`update_by`, the
    /// same one cancel and verify record.
    ///
    /// On a successful write the slot claim is deliberately left to expire
    /// with its TTL, which throttles an immediate duplicate resubmission of
    /// the same fingerprint. Only failed writes release the claim early.
    pub async fn create(
        &self,
        user_id: Option<i64>,
        actor: &str,
        req: ReservationCreate,
    ) -> Result<ReservationDetail, ReservationError> {
        let visit_date = time::parse_date(&req.visit_date)
            .map_err(|_| ReservationError::Invalid(format!("Invalid visit date: {}", req.visit_date)))?;

        if req.persons.is_empty() {
            return Err(ReservationError::Invalid(
                "At least one party member is required".into(),
            ));
        }
        let mut contacts = req.persons.iter().filter(|p| p.is_contact);
        let Some(contact) = contacts.next() else {
            return Err(ReservationError::Invalid(
                "Exactly one party member must be the primary contact".into(),
            ));
        };
        if contacts.next().is_some() {
            return Err(ReservationError::Invalid(
                "Exactly one party member must be the primary contact".into(),
            ));
        }

        let child_count = req.child_count.unwrap_or_else(|| {
            req.persons
                .iter()
                .filter(|p| p.person_type == PERSON_TYPE_CHILD)
                .count() as i64
        });
        let adult_count = req
            .adult_count
            .unwrap_or(req.persons.len() as i64 - child_count);

        let fp = fingerprint::build(
            visit_date,
            req.time_slot,
            &contact.id_type,
            &contact.id_number,
            user_id,
        );
        let admission = match fp.as_deref() {
            Some(key) => self.admit(key, &req, contact, user_id).await?,
            None => {
                // Incomplete contact identity: the dedup protocol has no key
                // to work with. Accept the request and flag the data quality.
                tracing::warn!(
                    visit_date = %req.visit_date,
                    time_slot = req.time_slot,
                    "Reservation without contact identity, duplicate check skipped"
                );
                Admission { claimed: false }
            }
        };

        let now = now_millis();
        let reservation = Reservation {
            id: snowflake_id(),
            reservation_no: req.reservation_no.clone().unwrap_or_else(reservation_no),
            user_id,
            scenic_area_id: req.scenic_area_id,
            visit_date: req.visit_date.clone(),
            time_slot: req.time_slot,
            adult_count,
            child_count,
            total_count: adult_count + child_count,
            contact_name: Some(contact.name.clone()),
            id_type: Some(contact.id_type.clone()),
            id_number: Some(contact.id_number.clone()),
            phone: contact.phone.clone(),
            status: ReservationStatus::NotStarted.code(),
            version: 0,
            deleted: 0,
            cancel_time: None,
            cancel_reason: None,
            verification_time: None,
            operator_id: None,
            verification_location: None,
            device_info: None,
            verification_remark: None,
            create_time: now,
            update_time: now,
            create_by: Some(actor.to_string()),
            update_by: Some(actor.to_string()),
        };
        let persons: Vec<ReservationPerson> = req
            .persons
            .iter()
            .map(|p| ReservationPerson {
                id: snowflake_id(),
                reservation_id: reservation.id,
                name: p.name.clone(),
                id_type: p.id_type.clone(),
                id_number: p.id_number.clone(),
                phone: p.phone.clone(),
                person_type: p.person_type,
                is_contact: p.is_contact,
                visit_date: req.visit_date.clone(),
                time_slot: req.time_slot,
                version: 0,
                deleted: 0,
                create_time: now,
                update_time: now,
            })
            .collect();

        if let Err(e) = reservation_repo::create_with_persons(&self.pool, &reservation, &persons).await
        {
            // Free the fingerprint so the caller can retry immediately
            if admission.claimed
                && let Some(key) = fp.as_deref()
            {
                self.coordinator.release(key).await;
            }
            return Err(e.into());
        }

        tracing::info!(
            reservation_no = %reservation.reservation_no,
            visit_date = %reservation.visit_date,
            time_slot = reservation.time_slot,
            party = persons.len(),
            "Reservation created"
        );
        Ok(ReservationDetail {
            reservation,
            persons,
        })
    }

    /// Duplicate admission: lock path while the coordinator is healthy,
    /// store fallback otherwise (including mid-request connectivity loss).
    async fn admit(
        &self,
        key: &str,
        req: &ReservationCreate,
        contact: &shared::models::PersonCreate,
        user_id: Option<i64>,
    ) -> Result<Admission, ReservationError> {
        let request = DedupRequest {
            fingerprint: key,
            visit_date: &req.visit_date,
            time_slot: req.time_slot,
            id_type: &contact.id_type,
            id_number: &contact.id_number,
            user_id,
        };

        if self.coordinator.is_available() {
            match self.lock_dedup.admit(&request).await {
                Err(ReservationError::CoordinationUnavailable(msg)) => {
                    tracing::warn!(
                        error = %msg,
                        "Lock coordination lost, falling back to store duplicate check"
                    );
                    self.store_dedup.admit(&request).await
                }
                other => other,
            }
        } else {
            self.store_dedup.admit(&request).await
        }
    }

    /// Cancel an open reservation on behalf of `actor`.
    pub async fn cancel(
        &self,
        id: i64,
        actor: &str,
        req: &ReservationCancel,
    ) -> Result<Reservation, ReservationError> {
        let reservation = self.require(id).await?;
        lifecycle::ensure_can_cancel(reservation.status)?;

        let rows = reservation_repo::cancel(
            &self.pool,
            id,
            reservation.version,
            &req.reason,
            actor,
            now_millis(),
        )
        .await?;
        if rows == 0 {
            return Err(ReservationError::VersionConflict);
        }

        tracing::info!(reservation_no = %reservation.reservation_no, "Reservation cancelled");
        self.require(id).await
    }

    /// Gate check-in by an operator.
    pub async fn verify(
        &self,
        id: i64,
        operator_id: i64,
        req: &ReservationVerify,
    ) -> Result<Reservation, ReservationError> {
        let reservation = self.require(id).await?;
        lifecycle::ensure_can_verify(reservation.status)?;

        let fields = reservation_repo::VerifyFields {
            operator_id,
            verification_location: req.verification_location.as_deref(),
            device_info: req.device_info.as_deref(),
            verification_remark: req.remark.as_deref(),
        };
        let rows = reservation_repo::verify(
            &self.pool,
            id,
            reservation.version,
            &fields,
            &operator_id.to_string(),
            now_millis(),
        )
        .await?;
        if rows == 0 {
            return Err(ReservationError::VersionConflict);
        }

        tracing::info!(
            reservation_no = %reservation.reservation_no,
            operator_id,
            "Reservation verified"
        );
        self.require(id).await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<ReservationDetail, ReservationError> {
        let reservation = self.require(id).await?;
        let persons = reservation_repo::find_persons(&self.pool, id).await?;
        Ok(ReservationDetail {
            reservation,
            persons,
        })
    }

    pub async fn get_by_reservation_no(
        &self,
        reservation_no: &str,
    ) -> Result<ReservationDetail, ReservationError> {
        let reservation = reservation_repo::find_by_reservation_no(&self.pool, reservation_no)
            .await?
            .ok_or_else(|| {
                ReservationError::NotFound(format!("Reservation {reservation_no} not found"))
            })?;
        let persons = reservation_repo::find_persons(&self.pool, reservation.id).await?;
        Ok(ReservationDetail {
            reservation,
            persons,
        })
    }

    /// Paged lookup by a party member's identity number.
    pub async fn query_by_identity(
        &self,
        query: &ReservationQuery,
    ) -> Result<Page<ReservationDetail>, ReservationError> {
        let id_number = query.id_number.trim();
        if id_number.is_empty() {
            return Err(ReservationError::Invalid("id_number is required".into()));
        }
        let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
        let offset = query.offset.max(0);

        let (reservations, total) =
            reservation_repo::page_by_identity(&self.pool, id_number, query.status, limit, offset)
                .await?;

        let mut items = Vec::with_capacity(reservations.len());
        for reservation in reservations {
            let persons = reservation_repo::find_persons(&self.pool, reservation.id).await?;
            items.push(ReservationDetail {
                reservation,
                persons,
            });
        }

        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    async fn require(&self, id: i64) -> Result<Reservation, ReservationError> {
        reservation_repo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("Reservation {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::reservation::tests::test_pool;
    use crate::reservations::dedup::MemorySlotLock;
    use shared::models::PersonCreate;

    fn service(pool: SqlitePool, coordinator: LockCoordinator) -> ReservationService {
        ReservationService::new(pool, Arc::new(coordinator), chrono_tz::Asia::Shanghai)
    }

    fn locked_service(pool: SqlitePool) -> ReservationService {
        service(
            pool,
            LockCoordinator::new(Arc::new(MemorySlotLock::new())),
        )
    }

    fn person(id_number: &str, is_contact: bool) -> PersonCreate {
        PersonCreate {
            name: "Alice".into(),
            id_type: "ID_CARD".into(),
            id_number: id_number.to_string(),
            phone: Some("13800000000".into()),
            person_type: shared::models::PERSON_TYPE_ADULT,
            is_contact,
        }
    }

    fn request(visit_date: &str, time_slot: i64, persons: Vec<PersonCreate>) -> ReservationCreate {
        ReservationCreate {
            scenic_area_id: 1,
            visit_date: visit_date.to_string(),
            time_slot,
            adult_count: None,
            child_count: None,
            reservation_no: None,
            persons,
        }
    }

    #[tokio::test]
    async fn create_persists_reservation_with_party() {
        let svc = locked_service(test_pool().await);

        let detail = svc
            .create(Some(42), "42", request("2099-05-01", 1, vec![person("A-1", true)]))
            .await
            .unwrap();

        assert_eq!(detail.reservation.status, 0);
        assert_eq!(detail.reservation.version, 0);
        assert_eq!(detail.reservation.total_count, 1);
        assert_eq!(detail.reservation.id_number.as_deref(), Some("A-1"));
        assert!(detail.reservation.reservation_no.starts_with("RES"));
        assert_eq!(detail.persons.len(), 1);
        assert_eq!(detail.persons[0].visit_date, "2099-05-01");

        let reread = svc.get_by_id(detail.reservation.id).await.unwrap();
        assert_eq!(reread.persons.len(), 1);
    }

    #[tokio::test]
    async fn create_stamps_the_caller_actor_into_audit_columns() {
        let svc = locked_service(test_pool().await);

        // An anonymous caller identified only by display name is recorded
        // with the same actor string that cancel and verify would use.
        let detail = svc
            .create(None, "Alice", request("2099-05-01", 1, vec![person("A-1", true)]))
            .await
            .unwrap();
        assert_eq!(detail.reservation.create_by.as_deref(), Some("Alice"));
        assert_eq!(detail.reservation.update_by.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn repeated_submission_is_rejected_by_the_lock_path() {
        let svc = locked_service(test_pool().await);
        let req = request("2099-05-01", 1, vec![person("A-1", true)]);

        svc.create(Some(42), "42", req.clone()).await.unwrap();
        let err = svc.create(Some(42), "42", req).await.unwrap_err();
        assert!(matches!(
            err,
            ReservationError::Duplicate {
                owned_by_caller: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn concurrent_creates_admit_exactly_one() {
        let svc = locked_service(test_pool().await);
        let req = request("2099-05-01", 1, vec![person("A-1", true)]);

        let (first, second) =
            tokio::join!(svc.create(Some(42), "42", req.clone()), svc.create(Some(42), "42", req));
        assert_eq!(
            first.is_ok() as u8 + second.is_ok() as u8,
            1,
            "exactly one of the racing creates may win"
        );
        let loser = if first.is_err() { first } else { second };
        assert!(matches!(
            loser.unwrap_err(),
            ReservationError::Duplicate { .. }
        ));
    }

    #[tokio::test]
    async fn party_must_have_exactly_one_contact() {
        let svc = locked_service(test_pool().await);

        let err = svc
            .create(Some(42), "42", request("2099-05-01", 1, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Invalid(_)));

        let err = svc
            .create(Some(42), "42", request("2099-05-01", 1, vec![person("A-1", false)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Invalid(_)));

        let err = svc
            .create(
                Some(42),
                "42",
                request(
                    "2099-05-01",
                    1,
                    vec![person("A-1", true), person("A-2", true)],
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Invalid(_)));
    }

    #[tokio::test]
    async fn malformed_date_is_rejected() {
        let svc = locked_service(test_pool().await);
        let err = svc
            .create(Some(42), "42", request("2099/05/01", 1, vec![person("A-1", true)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Invalid(_)));
    }

    #[tokio::test]
    async fn failed_write_releases_the_claim_for_retry() {
        let svc = locked_service(test_pool().await);
        // Two identical identities in one party violate the unique index
        let bad = request(
            "2099-05-01",
            1,
            vec![person("A-1", true), person("A-1", false)],
        );

        let err = svc.create(Some(42), "42", bad).await.unwrap_err();
        assert!(matches!(err, ReservationError::Store(_)));

        // Same fingerprint again: the claim was released on failure
        svc.create(Some(42), "42", request("2099-05-01", 1, vec![person("A-1", true)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fallback_path_admits_then_rejects_duplicates() {
        let pool = test_pool().await;
        let svc = service(pool, LockCoordinator::disconnected());

        svc.create(Some(42), "42", request("2099-05-01", 1, vec![person("A-1", true)]))
            .await
            .unwrap();

        // Same caller, same slot identity
        let err = svc
            .create(Some(42), "42", request("2099-05-01", 1, vec![person("A-1", true)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReservationError::Duplicate {
                owned_by_caller: true,
                ..
            }
        ));

        // Different caller, same visitor identity
        let err = svc
            .create(Some(7), "7", request("2099-05-01", 1, vec![person("A-1", true)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReservationError::Duplicate {
                owned_by_caller: false,
                ..
            }
        ));

        // A different slot is a different booking
        svc.create(Some(42), "42", request("2099-05-01", 2, vec![person("A-1", true)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fallback_ignores_cancelled_reservations() {
        let pool = test_pool().await;
        let svc = service(pool, LockCoordinator::disconnected());

        let detail = svc
            .create(Some(42), "42", request("2099-05-01", 1, vec![person("A-1", true)]))
            .await
            .unwrap();
        svc.cancel(
            detail.reservation.id,
            "42",
            &ReservationCancel {
                reason: "change of plans".into(),
            },
        )
        .await
        .unwrap();

        // The slot is free again once the earlier booking is cancelled
        svc.create(Some(42), "42", request("2099-05-01", 1, vec![person("A-1", true)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_is_single_shot() {
        let svc = locked_service(test_pool().await);
        let detail = svc
            .create(Some(42), "42", request("2099-05-01", 1, vec![person("A-1", true)]))
            .await
            .unwrap();
        let id = detail.reservation.id;

        let cancelled = svc
            .cancel(
                id,
                "42",
                &ReservationCancel {
                    reason: "change of plans".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled.status, 1);
        assert_eq!(cancelled.version, 1);
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("change of plans"));

        let err = svc
            .cancel(
                id,
                "42",
                &ReservationCancel {
                    reason: "again".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::IllegalTransition(_)));

        // A rejected verify leaves the record untouched
        let err = svc
            .verify(id, 7, &ReservationVerify::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::IllegalTransition(_)));
        let stored = svc.get_by_id(id).await.unwrap();
        assert_eq!(stored.reservation.version, 1);
        assert_eq!(stored.reservation.status, 1);
    }

    #[tokio::test]
    async fn verify_records_operator_facts_and_blocks_cancel() {
        let svc = locked_service(test_pool().await);
        let detail = svc
            .create(Some(42), "42", request("2099-05-01", 1, vec![person("A-1", true)]))
            .await
            .unwrap();
        let id = detail.reservation.id;

        let verified = svc
            .verify(
                id,
                7,
                &ReservationVerify {
                    verification_location: Some("East gate".into()),
                    device_info: Some("scanner-03".into()),
                    remark: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(verified.status, 10);
        assert_eq!(verified.operator_id, Some(7));
        assert!(verified.verification_time.is_some());

        let err = svc
            .cancel(
                id,
                "42",
                &ReservationCancel {
                    reason: "too late".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn missing_reservation_is_not_found() {
        let svc = locked_service(test_pool().await);
        assert!(matches!(
            svc.get_by_id(999).await.unwrap_err(),
            ReservationError::NotFound(_)
        ));
        assert!(matches!(
            svc.get_by_reservation_no("RES-NOPE").await.unwrap_err(),
            ReservationError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn identity_query_pages_details() {
        let svc = locked_service(test_pool().await);
        for slot in [1, 2] {
            svc.create(Some(42), "42", request("2099-05-01", slot, vec![person("A-1", true)]))
                .await
                .unwrap();
        }

        let page = svc
            .query_by_identity(&ReservationQuery {
                id_number: "A-1".into(),
                status: None,
                limit: 1,
                offset: 0,
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].persons.len(), 1);
    }
}
