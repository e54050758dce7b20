//! Domain models and API payloads

mod reservation;

pub use reservation::{
    Page, PersonCreate, Reservation, ReservationCancel, ReservationCreate, ReservationDetail,
    ReservationPerson, ReservationQuery, ReservationStatus, ReservationVerify, TimeSlot,
    PERSON_TYPE_ADULT, PERSON_TYPE_CHILD,
};
