//! Reservation API Handlers
//!
//! Handlers guard free-form input lengths and date sanity, then delegate to
//! [`ReservationService`]; domain rejections map onto stable error codes in
//! [`crate::utils::AppError`].

use axum::{
    Json,
    extract::{Path, Query, State},
};

use shared::models::{
    Page, Reservation, ReservationCancel, ReservationCreate, ReservationDetail, ReservationQuery,
    ReservationVerify,
};

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::reservations::ReservationService;
use crate::utils::validation::{
    MAX_NAME_LEN, MAX_NOTE_LEN, MAX_SHORT_TEXT_LEN, validate_optional_text, validate_required_text,
};
use crate::utils::{AppError, AppResult, time};

/// POST /api/reservations - 创建预约
pub async fn create(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Json(payload): Json<ReservationCreate>,
) -> AppResult<Json<ReservationDetail>> {
    validate_create(&payload, &state.reservations)?;

    let detail = state
        .reservations
        .create(current_user.id, &current_user.actor(), payload)
        .await?;
    Ok(Json(detail))
}

/// GET /api/reservations?id_number=xxx - 按证件号分页查询
pub async fn query(
    State(state): State<ServerState>,
    Query(query): Query<ReservationQuery>,
) -> AppResult<Json<Page<ReservationDetail>>> {
    validate_required_text(&query.id_number, "id_number", MAX_SHORT_TEXT_LEN)?;

    let page = state.reservations.query_by_identity(&query).await?;
    Ok(Json(page))
}

/// GET /api/reservations/:id - 获取单个预约（含随行人）
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ReservationDetail>> {
    let detail = state.reservations.get_by_id(id).await?;
    Ok(Json(detail))
}

/// GET /api/reservations/no/:reservation_no - 按预约号获取
pub async fn get_by_no(
    State(state): State<ServerState>,
    Path(reservation_no): Path<String>,
) -> AppResult<Json<ReservationDetail>> {
    validate_required_text(&reservation_no, "reservation_no", MAX_SHORT_TEXT_LEN)?;

    let detail = state.reservations.get_by_reservation_no(&reservation_no).await?;
    Ok(Json(detail))
}

/// POST /api/reservations/:id/cancel - 取消预约
pub async fn cancel(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<ReservationCancel>,
) -> AppResult<Json<Reservation>> {
    validate_required_text(&payload.reason, "reason", MAX_NOTE_LEN)?;

    let reservation = state
        .reservations
        .cancel(id, &current_user.actor(), &payload)
        .await?;
    Ok(Json(reservation))
}

/// POST /api/reservations/:id/verify - 核销（闸机/人工检票）
pub async fn verify(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<ReservationVerify>,
) -> AppResult<Json<Reservation>> {
    let Some(operator_id) = current_user.id else {
        return Err(AppError::validation("Verification requires an operator identity"));
    };
    validate_optional_text(
        &payload.verification_location,
        "verification_location",
        MAX_SHORT_TEXT_LEN,
    )?;
    validate_optional_text(&payload.device_info, "device_info", MAX_SHORT_TEXT_LEN)?;
    validate_optional_text(&payload.remark, "remark", MAX_NOTE_LEN)?;

    let reservation = state.reservations.verify(id, operator_id, &payload).await?;
    Ok(Json(reservation))
}

fn validate_create(payload: &ReservationCreate, service: &ReservationService) -> AppResult<()> {
    let visit_date = time::parse_date(&payload.visit_date)?;
    time::validate_not_past(visit_date, service.timezone())?;

    for person in &payload.persons {
        validate_required_text(&person.name, "person.name", MAX_NAME_LEN)?;
        validate_required_text(&person.id_type, "person.id_type", MAX_SHORT_TEXT_LEN)?;
        validate_required_text(&person.id_number, "person.id_number", MAX_SHORT_TEXT_LEN)?;
        validate_optional_text(&person.phone, "person.phone", MAX_SHORT_TEXT_LEN)?;
    }
    validate_optional_text(
        &payload.reservation_no,
        "reservation_no",
        MAX_SHORT_TEXT_LEN,
    )?;
    Ok(())
}
