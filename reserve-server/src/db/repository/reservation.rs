//! Reservation Repository
//!
//! All mutations follow the optimistic-update discipline: the UPDATE
//! predicate carries the `version` the caller read, and a zero
//! rows-affected result means another writer got there first. Callers
//! decide whether to re-read and retry — nothing here retries silently.

use super::RepoResult;
use shared::models::{Reservation, ReservationPerson, ReservationStatus};
use sqlx::SqlitePool;

const COLUMNS: &str = "id, reservation_no, user_id, scenic_area_id, visit_date, time_slot, \
     adult_count, child_count, total_count, contact_name, id_type, id_number, phone, \
     status, version, deleted, cancel_time, cancel_reason, verification_time, operator_id, \
     verification_location, device_info, verification_remark, create_time, update_time, \
     create_by, update_by";

/// Insert a reservation together with its party as one atomic unit.
///
/// Either every row becomes visible or none does; a failed person insert
/// rolls the reservation row back with the transaction.
pub async fn create_with_persons(
    pool: &SqlitePool,
    reservation: &Reservation,
    persons: &[ReservationPerson],
) -> RepoResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO reservation (id, reservation_no, user_id, scenic_area_id, visit_date, \
         time_slot, adult_count, child_count, total_count, contact_name, id_type, id_number, \
         phone, status, version, deleted, create_time, update_time, create_by, update_by) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(reservation.id)
    .bind(&reservation.reservation_no)
    .bind(reservation.user_id)
    .bind(reservation.scenic_area_id)
    .bind(&reservation.visit_date)
    .bind(reservation.time_slot)
    .bind(reservation.adult_count)
    .bind(reservation.child_count)
    .bind(reservation.total_count)
    .bind(&reservation.contact_name)
    .bind(&reservation.id_type)
    .bind(&reservation.id_number)
    .bind(&reservation.phone)
    .bind(reservation.status)
    .bind(reservation.version)
    .bind(reservation.deleted)
    .bind(reservation.create_time)
    .bind(reservation.update_time)
    .bind(&reservation.create_by)
    .bind(&reservation.update_by)
    .execute(&mut *tx)
    .await?;

    for person in persons {
        sqlx::query(
            "INSERT INTO reservation_person (id, reservation_id, name, id_type, id_number, \
             phone, person_type, is_contact, visit_date, time_slot, version, deleted, \
             create_time, update_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(person.id)
        .bind(person.reservation_id)
        .bind(&person.name)
        .bind(&person.id_type)
        .bind(&person.id_number)
        .bind(&person.phone)
        .bind(person.person_type)
        .bind(person.is_contact)
        .bind(&person.visit_date)
        .bind(person.time_slot)
        .bind(person.version)
        .bind(person.deleted)
        .bind(person.create_time)
        .bind(person.update_time)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> RepoResult<Option<Reservation>> {
    let reservation = sqlx::query_as::<_, Reservation>(&format!(
        "SELECT {COLUMNS} FROM reservation WHERE id = ? AND deleted = 0"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(reservation)
}

pub async fn find_by_reservation_no(
    pool: &SqlitePool,
    reservation_no: &str,
) -> RepoResult<Option<Reservation>> {
    let reservation = sqlx::query_as::<_, Reservation>(&format!(
        "SELECT {COLUMNS} FROM reservation WHERE reservation_no = ? AND deleted = 0"
    ))
    .bind(reservation_no)
    .fetch_optional(pool)
    .await?;
    Ok(reservation)
}

/// Fallback duplicate probe: an existing, non-cancelled reservation holding
/// the same (date, slot, identity). Used only when the lock coordinator is
/// unavailable; two requests racing this read can both miss, which is the
/// accepted degraded-mode tradeoff.
pub async fn find_active_by_slot_identity(
    pool: &SqlitePool,
    visit_date: &str,
    time_slot: i64,
    id_type: &str,
    id_number: &str,
) -> RepoResult<Option<Reservation>> {
    let reservation = sqlx::query_as::<_, Reservation>(&format!(
        "SELECT {COLUMNS} FROM reservation \
         WHERE visit_date = ? AND time_slot = ? AND id_type = ? AND id_number = ? \
         AND status <> ? AND deleted = 0 LIMIT 1"
    ))
    .bind(visit_date)
    .bind(time_slot)
    .bind(id_type)
    .bind(id_number)
    .bind(ReservationStatus::Cancelled.code())
    .fetch_optional(pool)
    .await?;
    Ok(reservation)
}

pub async fn find_persons(
    pool: &SqlitePool,
    reservation_id: i64,
) -> RepoResult<Vec<ReservationPerson>> {
    let persons = sqlx::query_as::<_, ReservationPerson>(
        "SELECT id, reservation_id, name, id_type, id_number, phone, person_type, is_contact, \
         visit_date, time_slot, version, deleted, create_time, update_time \
         FROM reservation_person WHERE reservation_id = ? AND deleted = 0 ORDER BY id",
    )
    .bind(reservation_id)
    .fetch_all(pool)
    .await?;
    Ok(persons)
}

/// Cancel transition. Returns the number of rows updated: 0 means the
/// version predicate missed (lost-update conflict).
pub async fn cancel(
    pool: &SqlitePool,
    id: i64,
    version: i64,
    reason: &str,
    update_by: &str,
    now: i64,
) -> RepoResult<u64> {
    let result = sqlx::query(
        "UPDATE reservation SET status = ?, cancel_time = ?, cancel_reason = ?, \
         update_time = ?, update_by = ?, version = version + 1 \
         WHERE id = ? AND version = ? AND deleted = 0",
    )
    .bind(ReservationStatus::Cancelled.code())
    .bind(now)
    .bind(reason)
    .bind(now)
    .bind(update_by)
    .bind(id)
    .bind(version)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Verify transition fields, set only on a successful verify.
pub struct VerifyFields<'a> {
    pub operator_id: i64,
    pub verification_location: Option<&'a str>,
    pub device_info: Option<&'a str>,
    pub verification_remark: Option<&'a str>,
}

/// Verify transition. Same zero-rows-means-conflict contract as [`cancel`].
pub async fn verify(
    pool: &SqlitePool,
    id: i64,
    version: i64,
    fields: &VerifyFields<'_>,
    update_by: &str,
    now: i64,
) -> RepoResult<u64> {
    let result = sqlx::query(
        "UPDATE reservation SET status = ?, verification_time = ?, operator_id = ?, \
         verification_location = ?, device_info = ?, verification_remark = ?, \
         update_time = ?, update_by = ?, version = version + 1 \
         WHERE id = ? AND version = ? AND deleted = 0",
    )
    .bind(ReservationStatus::Verified.code())
    .bind(now)
    .bind(fields.operator_id)
    .bind(fields.verification_location)
    .bind(fields.device_info)
    .bind(fields.verification_remark)
    .bind(now)
    .bind(update_by)
    .bind(id)
    .bind(version)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Expire transition (system only). Touches nothing but status, version and
/// the audit timestamp.
pub async fn expire(pool: &SqlitePool, id: i64, version: i64, now: i64) -> RepoResult<u64> {
    let result = sqlx::query(
        "UPDATE reservation SET status = ?, update_time = ?, version = version + 1 \
         WHERE id = ? AND version = ? AND status = ? AND deleted = 0",
    )
    .bind(ReservationStatus::Expired.code())
    .bind(now)
    .bind(id)
    .bind(version)
    .bind(ReservationStatus::NotStarted.code())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Bounded page of open reservations for the expiration sweep.
pub async fn find_not_started(pool: &SqlitePool, limit: i64) -> RepoResult<Vec<Reservation>> {
    let reservations = sqlx::query_as::<_, Reservation>(&format!(
        "SELECT {COLUMNS} FROM reservation WHERE status = ? AND deleted = 0 \
         ORDER BY visit_date, id LIMIT ?"
    ))
    .bind(ReservationStatus::NotStarted.code())
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(reservations)
}

/// Paged query by a party member's identity number, newest first.
pub async fn page_by_identity(
    pool: &SqlitePool,
    id_number: &str,
    status: Option<i64>,
    limit: i64,
    offset: i64,
) -> RepoResult<(Vec<Reservation>, i64)> {
    let status_filter = if status.is_some() {
        " AND r.status = ?"
    } else {
        ""
    };

    let list_sql = format!(
        "SELECT DISTINCT r.{} FROM reservation r \
         JOIN reservation_person p ON p.reservation_id = r.id AND p.deleted = 0 \
         WHERE p.id_number = ? AND r.deleted = 0{status_filter} \
         ORDER BY r.create_time DESC, r.id DESC LIMIT ? OFFSET ?",
        COLUMNS.replace(", ", ", r.")
    );
    let mut list_query = sqlx::query_as::<_, Reservation>(&list_sql).bind(id_number);
    if let Some(s) = status {
        list_query = list_query.bind(s);
    }
    let items = list_query.bind(limit).bind(offset).fetch_all(pool).await?;

    let count_sql = format!(
        "SELECT COUNT(DISTINCT r.id) FROM reservation r \
         JOIN reservation_person p ON p.reservation_id = r.id AND p.deleted = 0 \
         WHERE p.id_number = ? AND r.deleted = 0{status_filter}"
    );
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(id_number);
    if let Some(s) = status {
        count_query = count_query.bind(s);
    }
    let total = count_query.fetch_one(pool).await?;

    Ok((items, total))
}
