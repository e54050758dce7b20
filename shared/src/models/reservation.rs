//! Reservation Model (个人预约)

use serde::{Deserialize, Serialize};

/// Party member type: adult
pub const PERSON_TYPE_ADULT: i64 = 1;
/// Party member type: child
pub const PERSON_TYPE_CHILD: i64 = 2;

/// Reservation lifecycle status.
///
/// Stored as a raw integer code; `Cancelled`, `Verified` and `Expired` are
/// terminal — a record never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    NotStarted,
    Cancelled,
    Verified,
    Expired,
}

impl ReservationStatus {
    /// Numeric code as persisted in the `status` column.
    pub const fn code(self) -> i64 {
        match self {
            Self::NotStarted => 0,
            Self::Cancelled => 1,
            Self::Verified => 10,
            Self::Expired => 11,
        }
    }

    /// Decode a stored status code. Unknown codes return `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::NotStarted),
            1 => Some(Self::Cancelled),
            10 => Some(Self::Verified),
            11 => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::NotStarted)
    }
}

/// Visit time slot. Codes other than 1/2 are reserved for future slots and
/// are carried through as raw integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeSlot {
    Morning,
    Afternoon,
}

impl TimeSlot {
    pub const fn code(self) -> i64 {
        match self {
            Self::Morning => 1,
            Self::Afternoon => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Morning),
            2 => Some(Self::Afternoon),
            _ => None,
        }
    }
}

/// Reservation record — one visitor claim on one date/time-slot.
///
/// The `version` column is the optimistic-concurrency token: every accepted
/// mutation increments it by exactly one, and every UPDATE carries the
/// previously read value in its predicate. `deleted` is an independent
/// soft-delete flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Reservation {
    pub id: i64,
    /// Human-readable reservation number (globally unique)
    pub reservation_no: String,
    /// Owning user; None for flows where the gateway supplied no identity
    pub user_id: Option<i64>,
    pub scenic_area_id: i64,
    /// Visit date, day granularity, `YYYY-MM-DD`
    pub visit_date: String,
    /// Slot code: 1 = morning, 2 = afternoon, others reserved
    pub time_slot: i64,
    pub adult_count: i64,
    pub child_count: i64,
    /// Always `adult_count + child_count`
    pub total_count: i64,
    /// Primary contact identity, denormalized from the `is_contact` person
    pub contact_name: Option<String>,
    pub id_type: Option<String>,
    pub id_number: Option<String>,
    pub phone: Option<String>,
    /// Status code, see [`ReservationStatus`]
    pub status: i64,
    /// Optimistic-concurrency token
    pub version: i64,
    /// Soft-delete flag (0/1)
    pub deleted: i64,
    pub cancel_time: Option<i64>,
    pub cancel_reason: Option<String>,
    pub verification_time: Option<i64>,
    pub operator_id: Option<i64>,
    pub verification_location: Option<String>,
    pub device_info: Option<String>,
    pub verification_remark: Option<String>,
    /// Unix millis
    pub create_time: i64,
    pub update_time: i64,
    pub create_by: Option<String>,
    pub update_by: Option<String>,
}

/// One visitor identity inside a reservation.
///
/// Persons are owned by the reservation (deleted together with it); exactly
/// one per reservation carries `is_contact = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct ReservationPerson {
    pub id: i64,
    pub reservation_id: i64,
    pub name: String,
    pub id_type: String,
    pub id_number: String,
    pub phone: Option<String>,
    /// 1 = adult, 2 = child
    pub person_type: i64,
    pub is_contact: bool,
    /// Copied from the parent at creation
    pub visit_date: String,
    pub time_slot: i64,
    pub version: i64,
    pub deleted: i64,
    pub create_time: i64,
    pub update_time: i64,
}

/// Party member in a create request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonCreate {
    pub name: String,
    /// Identity document type (e.g. "ID_CARD", "PASSPORT")
    pub id_type: String,
    pub id_number: String,
    pub phone: Option<String>,
    #[serde(default = "default_person_type")]
    pub person_type: i64,
    /// Exactly one person per request must be the primary contact
    #[serde(default)]
    pub is_contact: bool,
}

fn default_person_type() -> i64 {
    PERSON_TYPE_ADULT
}

/// Create reservation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationCreate {
    pub scenic_area_id: i64,
    /// `YYYY-MM-DD`
    pub visit_date: String,
    pub time_slot: i64,
    /// Defaults to the number of adult party members
    pub adult_count: Option<i64>,
    /// Defaults to the number of child party members
    pub child_count: Option<i64>,
    /// Assigned by the server when absent
    pub reservation_no: Option<String>,
    pub persons: Vec<PersonCreate>,
}

/// Cancel reservation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationCancel {
    pub reason: String,
}

/// Verify (gate check-in) payload. The operator comes from the acting user.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReservationVerify {
    pub verification_location: Option<String>,
    pub device_info: Option<String>,
    pub remark: Option<String>,
}

/// Paged query by visitor identity number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationQuery {
    pub id_number: String,
    /// Optional status code filter
    pub status: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

/// Pagination envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Reservation with its party, as returned by read endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationDetail {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub persons: Vec<ReservationPerson>,
}
