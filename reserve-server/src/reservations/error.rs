//! Reservation domain errors

use crate::db::repository::RepoError;
use crate::utils::AppError;

/// Errors produced by the reservation service and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    /// The fingerprint is already held (lock path) or the slot is already
    /// booked (store fallback). Never retried automatically.
    #[error("{message}")]
    Duplicate {
        message: String,
        /// Whether the existing booking belongs to the caller
        owned_by_caller: bool,
    },

    /// The state machine rejected the requested transition.
    #[error("{0}")]
    IllegalTransition(String),

    /// Optimistic update affected zero rows: another writer mutated the
    /// record between this caller's read and write.
    #[error("Reservation data changed, please retry")]
    VersionConflict,

    /// The lock coordinator's backing service is unreachable. Internal:
    /// the service recovers by switching to the store-fallback path.
    #[error("Lock coordination unavailable: {0}")]
    CoordinationUnavailable(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error("Store failure: {0}")]
    Store(#[from] RepoError),
}

impl From<ReservationError> for AppError {
    fn from(e: ReservationError) -> Self {
        match e {
            ReservationError::Duplicate { message, .. } => AppError::DuplicateClaim(message),
            ReservationError::IllegalTransition(msg) => AppError::BusinessRule(msg),
            ReservationError::VersionConflict => {
                AppError::StaleVersion("Reservation data changed, please retry".into())
            }
            // Should have been recovered by the fallback path; if it leaks
            // this far, something inside the service is wrong.
            ReservationError::CoordinationUnavailable(msg) => AppError::internal(msg),
            ReservationError::NotFound(msg) => AppError::NotFound(msg),
            ReservationError::Invalid(msg) => AppError::Validation(msg),
            ReservationError::Store(e) => e.into(),
        }
    }
}
