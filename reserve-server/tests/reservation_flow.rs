//! End-to-end reservation lifecycle against a real (temp-file) database.
//!
//! Boots the full server state — migrations, lock coordinator, service —
//! and walks a reservation through create, duplicate rejection, lookup,
//! cancel, verify and the hourly expiration sweep.

use chrono::TimeZone;
use chrono_tz::Asia::Shanghai;
use tokio_util::sync::CancellationToken;

use reserve_server::reservations::sweeper::ExpirationSweeper;
use reserve_server::{Config, ReservationError, ServerState};
use shared::models::{
    PersonCreate, ReservationCancel, ReservationCreate, ReservationQuery, ReservationVerify,
};

async fn test_state(dir: &tempfile::TempDir) -> ServerState {
    let config = Config {
        http_port: 0,
        database_path: dir
            .path()
            .join("reserve.db")
            .to_string_lossy()
            .into_owned(),
        redis_url: None,
        timezone: Shanghai,
        environment: "test".into(),
    };
    ServerState::initialize(&config).await.unwrap()
}

fn party(id_number: &str) -> Vec<PersonCreate> {
    vec![
        PersonCreate {
            name: "Alice".into(),
            id_type: "ID_CARD".into(),
            id_number: id_number.to_string(),
            phone: Some("13800000000".into()),
            person_type: shared::models::PERSON_TYPE_ADULT,
            is_contact: true,
        },
        PersonCreate {
            name: "Bob".into(),
            id_type: "ID_CARD".into(),
            id_number: format!("{id_number}-child"),
            phone: None,
            person_type: shared::models::PERSON_TYPE_CHILD,
            is_contact: false,
        },
    ]
}

fn create_request(visit_date: &str, time_slot: i64, id_number: &str) -> ReservationCreate {
    ReservationCreate {
        scenic_area_id: 1,
        visit_date: visit_date.to_string(),
        time_slot,
        adult_count: None,
        child_count: None,
        reservation_no: None,
        persons: party(id_number),
    }
}

#[tokio::test]
async fn full_reservation_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir).await;
    let svc = &state.reservations;

    // Create
    let detail = svc
        .create(Some(42), "42", create_request("2099-06-01", 1, "A-100"))
        .await
        .unwrap();
    assert_eq!(detail.reservation.adult_count, 1);
    assert_eq!(detail.reservation.child_count, 1);
    assert_eq!(detail.reservation.total_count, 2);
    assert_eq!(detail.persons.len(), 2);

    // Immediate resubmission hits the held claim
    let err = svc
        .create(Some(42), "42", create_request("2099-06-01", 1, "A-100"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Duplicate { .. }));

    // Lookup by number and by party member identity
    let by_no = svc
        .get_by_reservation_no(&detail.reservation.reservation_no)
        .await
        .unwrap();
    assert_eq!(by_no.reservation.id, detail.reservation.id);

    let page = svc
        .query_by_identity(&ReservationQuery {
            id_number: "A-100-child".into(),
            status: None,
            limit: 20,
            offset: 0,
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);

    // Verify at the gate, then cancelling is illegal
    let verified = svc
        .verify(
            detail.reservation.id,
            7,
            &ReservationVerify {
                verification_location: Some("East gate".into()),
                device_info: Some("scanner-03".into()),
                remark: Some("manual check".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(verified.status, 10);
    assert_eq!(verified.version, 1);

    let err = svc
        .cancel(
            detail.reservation.id,
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
async fn cancel_frees_the_slot_for_rebooking() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir).await;
    let svc = &state.reservations;

    let first = svc
        .create(Some(42), "42", create_request("2099-06-01", 2, "B-200"))
        .await
        .unwrap();
    svc.cancel(
        first.reservation.id,
        "42",
        &ReservationCancel {
            reason: "change of plans".into(),
        },
    )
    .await
    .unwrap();

    // The 30s claim throttles an immediate rebook of the same fingerprint;
    // a booking for the other slot goes through right away.
    let err = svc
        .create(Some(42), "42", create_request("2099-06-01", 2, "B-200"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Duplicate { .. }));
    svc.create(Some(42), "42", create_request("2099-06-01", 1, "B-200"))
        .await
        .unwrap();
}

#[tokio::test]
async fn sweep_expires_lapsed_reservations_once() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir).await;
    let svc = &state.reservations;

    let lapsed = svc
        .create(Some(42), "42", create_request("2025-01-01", 1, "C-300"))
        .await
        .unwrap();
    let upcoming = svc
        .create(Some(42), "42", create_request("2099-06-01", 1, "C-301"))
        .await
        .unwrap();

    let sweeper = ExpirationSweeper::new(state.pool.clone(), Shanghai, CancellationToken::new());
    let at_1300 = Shanghai.with_ymd_and_hms(2025, 1, 1, 13, 0, 0).unwrap();

    let stats = sweeper.sweep_at(at_1300).await;
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.conflicts, 0);
    assert_eq!(stats.errors, 0);

    let expired = svc.get_by_id(lapsed.reservation.id).await.unwrap();
    assert_eq!(expired.reservation.status, 11);
    assert_eq!(expired.reservation.version, 1);
    let open = svc.get_by_id(upcoming.reservation.id).await.unwrap();
    assert_eq!(open.reservation.status, 0);

    // Expired is terminal: the next sweep finds nothing to do
    let again = sweeper.sweep_at(at_1300).await;
    assert_eq!(again.expired, 0);

    // And the record can no longer be verified
    let err = svc
        .verify(lapsed.reservation.id, 7, &ReservationVerify::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::IllegalTransition(_)));
}
