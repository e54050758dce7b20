//! Reservation API 模块

mod handler;

use axum::{Router, routing::{get, post}};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/reservations", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", post(handler::create).get(handler::query))
        .route("/{id}", get(handler::get_by_id))
        .route("/no/{reservation_no}", get(handler::get_by_no))
        .route("/{id}/cancel", post(handler::cancel))
        .route("/{id}/verify", post(handler::verify))
}
