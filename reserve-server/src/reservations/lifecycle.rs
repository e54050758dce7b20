//! 预约状态机
//!
//! 状态流转：`NOT_STARTED(0)` → `CANCELLED(1)` | `VERIFIED(10)` | `EXPIRED(11)`，
//! 右侧三个状态均为终态。守卫函数只做判定，不做持久化；
//! 持久化由 repository 的乐观更新完成。

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use shared::models::ReservationStatus;

use super::error::ReservationError;
use crate::utils::time;

/// Guard for the cancel transition: legal only from NOT_STARTED.
pub fn ensure_can_cancel(status_code: i64) -> Result<(), ReservationError> {
    match ReservationStatus::from_code(status_code) {
        Some(ReservationStatus::NotStarted) => Ok(()),
        Some(ReservationStatus::Verified) => Err(ReservationError::IllegalTransition(
            "Reservation already verified, cannot cancel".into(),
        )),
        Some(ReservationStatus::Cancelled) => Err(ReservationError::IllegalTransition(
            "Reservation already cancelled".into(),
        )),
        Some(ReservationStatus::Expired) => Err(ReservationError::IllegalTransition(
            "Reservation expired, cannot cancel".into(),
        )),
        None => Err(ReservationError::IllegalTransition(format!(
            "Unknown reservation status {status_code}"
        ))),
    }
}

/// Guard for the verify transition: legal only from NOT_STARTED.
pub fn ensure_can_verify(status_code: i64) -> Result<(), ReservationError> {
    match ReservationStatus::from_code(status_code) {
        Some(ReservationStatus::NotStarted) => Ok(()),
        Some(ReservationStatus::Cancelled) => Err(ReservationError::IllegalTransition(
            "Reservation cancelled, cannot verify".into(),
        )),
        Some(ReservationStatus::Verified) => Err(ReservationError::IllegalTransition(
            "Reservation already verified".into(),
        )),
        Some(ReservationStatus::Expired) => Err(ReservationError::IllegalTransition(
            "Reservation expired, cannot verify".into(),
        )),
        None => Err(ReservationError::IllegalTransition(format!(
            "Unknown reservation status {status_code}"
        ))),
    }
}

/// Expire predicate, evaluated against "now" in the business timezone.
///
/// - visit date strictly before today → expired
/// - visit date strictly after today → not expired
/// - visit date today → expired once the clock passes the slot cutoff
///   (morning 12:00, afternoon 16:00); reserved slot codes never
///   auto-expire by time-of-day
pub fn should_expire(visit_date: NaiveDate, time_slot: i64, now: DateTime<Tz>) -> bool {
    let today = now.date_naive();
    if visit_date < today {
        return true;
    }
    if visit_date > today {
        return false;
    }
    match time::slot_cutoff(time_slot) {
        Some(cutoff) => now.time() > cutoff,
        None => false,
    }
}
