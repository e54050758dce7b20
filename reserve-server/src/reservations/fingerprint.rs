//! 去重指纹构造
//!
//! 指纹由 (到访日期, 时段, 证件类型, 证件号, 提交用户) 派生；
//! 同一指纹在锁 TTL 窗口内的两次提交视为同一次预约请求。

use chrono::NaiveDate;

/// Key namespace shared by the Redis and in-process lock backends.
const KEY_PREFIX: &str = "reservation:slot";

/// Build the canonical dedup key for one reservation attempt.
///
/// Deterministic and collision-free across distinct (date, slot, identity,
/// user) tuples; the date contributes day granularity only. Returns `None`
/// when an identity component is missing or blank — the caller logs a
/// data-quality warning and skips the dedup protocol entirely.
///
/// A missing `user_id` is the sentinel "unknown owner" flow; it maps to
/// literal `0` so anonymous submissions of the same identity still collide.
pub fn build(
    visit_date: NaiveDate,
    time_slot: i64,
    id_type: &str,
    id_number: &str,
    user_id: Option<i64>,
) -> Option<String> {
    let id_type = id_type.trim();
    let id_number = id_number.trim();
    if id_type.is_empty() || id_number.is_empty() {
        return None;
    }

    Some(format!(
        "{KEY_PREFIX}:{}:{time_slot}:{id_type}:{id_number}:{}",
        visit_date.format("%Y-%m-%d"),
        user_id.unwrap_or(0)
    ))
}
