//! 时间工具函数 — 业务时区转换
//!
//! 预约的"今天"、时段截止时间都以配置的业务时区为准；
//! repository 层只接收 `i64` Unix millis 或 `YYYY-MM-DD` 字符串。

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use shared::models::TimeSlot;

use crate::utils::{AppError, AppResult};

/// 解析日期字符串 (YYYY-MM-DD)
pub fn parse_date(date: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| AppError::validation(format!("Invalid date format: {}", date)))
}

/// 当前业务时区时间
pub fn now_in(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

/// 验证日期不在过去 (业务时区)
pub fn validate_not_past(date: NaiveDate, tz: Tz) -> AppResult<()> {
    let today = now_in(tz).date_naive();
    if date < today {
        return Err(AppError::validation(format!(
            "Visit date {} is in the past (today is {})",
            date, today
        )));
    }
    Ok(())
}

/// 时段的当日核销截止时间
///
/// 上午场 12:00，下午场 16:00；其余时段码无截止时间（不按时刻过期）。
pub fn slot_cutoff(time_slot: i64) -> Option<NaiveTime> {
    match TimeSlot::from_code(time_slot)? {
        TimeSlot::Morning => NaiveTime::from_hms_opt(12, 0, 0),
        TimeSlot::Afternoon => NaiveTime::from_hms_opt(16, 0, 0),
    }
}
