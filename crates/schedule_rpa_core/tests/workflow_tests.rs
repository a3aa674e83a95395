use std::time::Duration;

use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;

use schedule_rpa_core::{
    Credentials, EngineConfig, ErrorCode, JobStatus, ReservationOperation, ReservationRequest,
    ResultStatus, SchedulingService, SessionConfig, SessionManager, SessionState,
};

mod fake_ui;
use fake_ui::{FakeLauncher, FakeVendor, BASE_URL, LOGIN_ID, LOGIN_SECRET, SHOP_ID};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn credentials() -> Credentials {
    Credentials::new(LOGIN_ID, LOGIN_SECRET, SHOP_ID)
}

fn service_with(vendor: &FakeVendor, config: SessionConfig) -> SchedulingService {
    let session = SessionManager::new(config, FakeLauncher::new(vendor.clone()));
    SchedulingService::new(session, EngineConfig::default()).with_clock(|| day(2025, 12, 28))
}

fn service(vendor: &FakeVendor) -> SchedulingService {
    service_with(vendor, SessionConfig::new(BASE_URL))
}

fn request(
    operation: ReservationOperation,
    date: NaiveDate,
    start: &str,
    name: &str,
    phone: &str,
) -> ReservationRequest {
    ReservationRequest {
        request_id: Uuid::new_v4(),
        operation,
        date,
        start_time: schedule_rpa_core::domain::parse_hhmm(start).unwrap(),
        duration_minutes: 30,
        customer_name: name.to_string(),
        customer_phone: phone.to_string(),
        menu_name: None,
        notes: None,
    }
}

//=========================================================================================
// Slot discovery
//=========================================================================================

#[tokio::test]
async fn single_open_cell_yields_exactly_one_slot() {
    let vendor = FakeVendor::new();
    vendor.add_cell("20251228", "09:00", "09:30", "1", &[]);
    // Rendered by the same window but outside the requested range.
    vendor.add_cell("20251229", "09:00", "09:30", "1", &[]);
    let service = service(&vendor);

    let outcome = service
        .fetch_slots(&credentials(), day(2025, 12, 28), day(2025, 12, 28), false)
        .await
        .unwrap();

    assert_eq!(outcome.value.len(), 1);
    let slot = &outcome.value[0];
    assert_eq!(slot.date, day(2025, 12, 28));
    assert_eq!(slot.start_time, 9 * 60);
    assert_eq!(slot.duration_minutes, 30);
    assert_eq!(slot.capacity, 1);
    assert_eq!(slot.resource_id, "1");
    assert_eq!(slot.resource_name, "resource 1");
    assert!(outcome.screenshot.is_none());
    assert!(vendor.logged("invoke changeScheduleDate [\"20251228\"]"));
}

#[tokio::test]
async fn reserved_closed_and_off_shift_cells_are_filtered() {
    let vendor = FakeVendor::new();
    vendor.add_resource("1", "Stylist A");
    vendor.add_resource("2", "Stylist B");
    vendor.add_cell("20251228", "09:00", "09:30", "1", &[]);
    vendor.add_cell("20251228", "09:30", "10:00", "1", &[]);
    vendor.add_cell("20251228", "10:00", "10:30", "1", &["is-closed"]);
    vendor.add_cell("20251228", "09:00", "09:30", "2", &[]);
    vendor.add_cell("20251228", "18:00", "18:30", "2", &[]);
    vendor.add_reservation("R1", "20251228", "09:30", "10:00", "1", "Sato 08011112222");
    vendor.add_shift("20251228", "09:00", "18:00", "1");
    vendor.add_shift("20251228", "09:15", "17:00", "2");
    let service = service(&vendor);

    let first = service
        .fetch_slots(&credentials(), day(2025, 12, 28), day(2025, 12, 28), false)
        .await
        .unwrap()
        .value;
    let second = service
        .fetch_slots(&credentials(), day(2025, 12, 28), day(2025, 12, 28), false)
        .await
        .unwrap()
        .value;

    assert_eq!(first, second);
    let summary: Vec<(u32, u32, &str)> = first
        .iter()
        .map(|s| (s.start_time, s.duration_minutes, s.resource_name.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![(540, 30, "Stylist A"), (555, 15, "Stylist B")]
    );
}

#[tokio::test]
async fn long_ranges_are_walked_in_eight_day_windows() {
    let vendor = FakeVendor::new();
    vendor.add_cell("20251228", "09:00", "09:30", "1", &[]);
    vendor.add_cell("20260104", "11:00", "11:30", "1", &[]);
    vendor.add_cell("20260105", "09:00", "09:30", "1", &[]);
    vendor.add_cell("20260111", "09:00", "09:30", "1", &[]);
    let service = service(&vendor);

    let slots = service
        .fetch_slots(&credentials(), day(2025, 12, 28), day(2026, 1, 10), false)
        .await
        .unwrap()
        .value;

    assert!(vendor.logged("changeScheduleDate [\"20251228\"]"));
    assert!(vendor.logged("changeScheduleDate [\"20260105\"]"));
    let dates: Vec<NaiveDate> = slots.iter().map(|s| s.date).collect();
    assert_eq!(dates, vec![day(2025, 12, 28), day(2026, 1, 4), day(2026, 1, 5)]);

    let exported = service
        .export_slots(&credentials(), day(2025, 12, 28), day(2026, 1, 10))
        .await
        .unwrap();
    assert_eq!(exported.value, slots);
    assert_eq!(vendor.launches(), 1);
}

#[tokio::test]
async fn reversed_range_is_rejected_before_touching_the_browser() {
    let vendor = FakeVendor::new();
    let service = service(&vendor);

    let failure = service
        .fetch_slots(&credentials(), day(2026, 1, 2), day(2026, 1, 1), false)
        .await
        .unwrap_err();

    assert_eq!(failure.error.code(), ErrorCode::SystemError);
    assert_eq!(vendor.launches(), 0);
}

#[tokio::test]
async fn diagnostics_capture_a_screenshot_under_the_same_lock() {
    let vendor = FakeVendor::new();
    let service = service(&vendor);

    let outcome = service
        .fetch_slots(&credentials(), day(2025, 12, 28), day(2025, 12, 28), true)
        .await
        .unwrap();

    assert_eq!(outcome.screenshot.as_deref(), Some(&[0x89, b'P', b'N', b'G'][..]));
}

#[tokio::test]
async fn search_matches_reservations_by_phone_digits() {
    let vendor = FakeVendor::new();
    vendor.add_resource("1", "Stylist A");
    vendor.add_reservation("R1", "20251228", "10:00", "11:00", "1", "Yamada Taro 090-1234-5678");
    vendor.add_reservation("R2", "20251228", "12:00", "12:30", "1", "Sato Jiro 080-1111-2222");
    vendor.add_reservation("R3", "20251230", "09:00", "09:30", "1", "Yamada Taro 09012345678");
    let service = service(&vendor);

    let found = service
        .search_reservations(
            &credentials(),
            "09012345678",
            day(2025, 12, 28),
            day(2025, 12, 29),
            false,
        )
        .await
        .unwrap()
        .value;

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].external_id.as_deref(), Some("R1"));
    assert_eq!(found[0].duration_minutes(), 60);
    assert_eq!(found[0].resource_name, "Stylist A");
}

#[tokio::test]
async fn actor_lost_mid_discovery_fails_the_caller_and_recovers() {
    let vendor = FakeVendor::new();
    vendor.add_cell("20251228", "09:00", "09:30", "1", &[]);
    let service = service(&vendor);
    service
        .fetch_slots(&credentials(), day(2025, 12, 28), day(2025, 12, 28), false)
        .await
        .unwrap();

    vendor.state().lose_actor_on = Some(".schedule-cell".to_string());
    let failure = service
        .fetch_slots(&credentials(), day(2025, 12, 28), day(2025, 12, 28), true)
        .await
        .unwrap_err();
    assert!(failure.error.is_actor_lost());
    assert!(failure.screenshot.is_none());

    let slots = service
        .fetch_slots(&credentials(), day(2025, 12, 28), day(2025, 12, 28), false)
        .await
        .unwrap()
        .value;
    assert_eq!(slots.len(), 1);
    assert_eq!(service.status().state, SessionState::Ready);
    assert_eq!(vendor.launches(), 2);
}

#[tokio::test(start_paused = true)]
async fn hung_render_times_out_and_next_request_succeeds() {
    let vendor = FakeVendor::new();
    vendor.add_cell("20251228", "09:00", "09:30", "1", &[]);
    let config = SessionConfig {
        request_timeout: Duration::from_secs(5),
        ..SessionConfig::new(BASE_URL)
    };
    let service = service_with(&vendor, config);
    vendor.state().hang_on = Some("changeScheduleDate".to_string());

    let failure = service
        .fetch_slots(&credentials(), day(2025, 12, 28), day(2025, 12, 28), false)
        .await
        .unwrap_err();
    assert_eq!(failure.error.code(), ErrorCode::Timeout);

    let slots = service
        .fetch_slots(&credentials(), day(2025, 12, 28), day(2025, 12, 28), false)
        .await
        .unwrap()
        .value;
    assert_eq!(slots.len(), 1);
    assert_eq!(vendor.launches(), 2);
}

//=========================================================================================
// Reservations
//=========================================================================================

#[tokio::test]
async fn create_fills_the_detail_form_and_resolves_the_new_id() {
    let vendor = FakeVendor::new();
    vendor.add_cell("20251228", "09:00", "09:30", "1", &[]);
    vendor.add_menu("M01", "Cut + Color");
    vendor.add_menu("M02", "Perm");
    let service = service(&vendor);

    let mut create = request(
        ReservationOperation::Create,
        day(2025, 12, 28),
        "09:00",
        "Yamada Taro",
        "090-1234-5678",
    );
    create.menu_name = Some("Cut".to_string());
    create.notes = Some("first visit".to_string());

    let result = service
        .submit(&credentials(), create.clone(), false)
        .await
        .unwrap()
        .value;

    assert_eq!(result.request_id, create.request_id);
    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(result.external_reservation_id.as_deref(), Some("R101"));
    assert!(vendor.logged("invoke openNewReservation [\"202512280900\",\"1\",1,1]"));
    assert!(vendor.logged("select #menuSelect M01"));
    assert!(vendor.logged("fill #customerLastName Yamada"));
    assert!(vendor.logged("fill #customerFirstName Taro"));
    assert!(vendor.logged("fill #reserveDuration 30"));
    assert!(vendor.logged("fill #reserveMemo Cut + Color\nfirst visit"));
}

#[tokio::test]
async fn accepted_create_stays_successful_when_the_popup_lingers() {
    let vendor = FakeVendor::new();
    vendor.add_cell("20251228", "09:00", "09:30", "1", &[]);
    vendor.state().sticky_popup = true;
    let service = service(&vendor);

    let result = service
        .submit(
            &credentials(),
            request(
                ReservationOperation::Create,
                day(2025, 12, 28),
                "09:00",
                "Yamada Taro",
                "090-1234-5678",
            ),
            false,
        )
        .await
        .unwrap()
        .value;

    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(result.error_code, None);
    assert_eq!(result.external_reservation_id, None);
    assert_eq!(vendor.reservation_ids(), vec!["R101".to_string()]);
    // The page is put back into a known state for the next caller.
    assert!(vendor.logged("reload"));
}

#[tokio::test]
async fn create_running_past_midnight_is_refused_without_touching_the_page() {
    let vendor = FakeVendor::new();
    let service = service(&vendor);
    service.session().start(credentials()).await.unwrap();
    vendor.clear_log();

    let mut create = request(
        ReservationOperation::Create,
        day(2025, 12, 28),
        "23:30",
        "Yamada Taro",
        "090-1234-5678",
    );
    create.duration_minutes = u32::MAX;

    let result = service
        .submit(&credentials(), create, false)
        .await
        .unwrap()
        .value;

    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(result.error_code, Some(ErrorCode::SlotNotAvailable));
    assert!(vendor.log().is_empty(), "{:?}", vendor.log());
    assert_eq!(service.status().state, SessionState::Ready);
}

#[tokio::test]
async fn phone_without_digits_never_matches_by_name_alone() {
    let vendor = FakeVendor::new();
    vendor.add_reservation("R1", "20251228", "10:00", "10:30", "1", "Yamada Taro 090-1111-2222");
    let service = service(&vendor);

    for operation in [ReservationOperation::Cancel, ReservationOperation::Delete] {
        let result = service
            .submit(
                &credentials(),
                request(operation, day(2025, 12, 28), "10:00", "Yamada Taro", "n/a"),
                false,
            )
            .await
            .unwrap()
            .value;

        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.error_code, Some(ErrorCode::ReservationNotFound));
    }
    assert!(!vendor.logged("openEditReservation"));
    assert_eq!(vendor.reservation_ids(), vec!["R1".to_string()]);
}

#[tokio::test]
async fn unknown_menu_is_kept_in_notes_without_selecting() {
    let vendor = FakeVendor::new();
    vendor.add_cell("20251228", "09:00", "09:30", "1", &[]);
    vendor.add_menu("M01", "Cut + Color");
    let service = service(&vendor);

    let mut create = request(
        ReservationOperation::Create,
        day(2025, 12, 28),
        "09:00",
        "Yamada Taro",
        "09012345678",
    );
    create.menu_name = Some("Head spa".to_string());

    let result = service
        .submit(&credentials(), create, false)
        .await
        .unwrap()
        .value;

    assert!(result.is_success());
    assert!(!vendor.logged("select "));
    assert!(vendor.logged("fill #reserveMemo Head spa"));
}

#[tokio::test]
async fn duplicate_booking_is_reported_as_conflict() {
    let vendor = FakeVendor::new();
    vendor.add_resource("1", "Stylist A");
    vendor.add_cell("20251228", "09:00", "09:30", "1", &[]);
    vendor.add_reservation("R1", "20251228", "09:00", "09:30", "1", "Sato Jiro 08011112222");
    vendor.respond(
        json!({ "result": false, "message": "The other reservation exists." }),
        None,
    );
    let service = service(&vendor);

    let result = service
        .submit(
            &credentials(),
            request(
                ReservationOperation::Create,
                day(2025, 12, 28),
                "09:00",
                "Yamada Taro",
                "09012345678",
            ),
            false,
        )
        .await
        .unwrap()
        .value;

    assert_eq!(result.status, ResultStatus::Conflict);
    assert_eq!(result.error_code, Some(ErrorCode::DuplicateReservation));
    assert!(result.external_reservation_id.is_none());
    assert!(vendor.logged("reload"));
    assert_eq!(vendor.reservation_ids(), vec!["R1".to_string()]);
}

#[tokio::test]
async fn alert_text_classifies_outside_hours_rejections() {
    let vendor = FakeVendor::new();
    vendor.add_cell("20251228", "09:00", "09:30", "1", &[]);
    vendor.respond(json!({ "result": false }), Some("営業時間外です"));
    let service = service(&vendor);

    let result = service
        .submit(
            &credentials(),
            request(
                ReservationOperation::Create,
                day(2025, 12, 28),
                "09:00",
                "Yamada Taro",
                "09012345678",
            ),
            false,
        )
        .await
        .unwrap()
        .value;

    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(result.error_code, Some(ErrorCode::SlotNotAvailable));
}

#[tokio::test]
async fn same_day_cancellation_uses_the_no_contact_reason() {
    let vendor = FakeVendor::new();
    vendor.add_reservation(
        "R1",
        "20251228",
        "10:00",
        "10:30",
        "1",
        "山田 太郎 様 090-1234-5678",
    );
    let service = service(&vendor);

    let result = service
        .submit(
            &credentials(),
            request(
                ReservationOperation::Cancel,
                day(2025, 12, 28),
                "10:00",
                "山田太郎",
                "09012345678",
            ),
            false,
        )
        .await
        .unwrap()
        .value;

    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(result.external_reservation_id.as_deref(), Some("R1"));
    assert!(vendor.logged("invoke openEditReservation [\"202512281000\",\"1\",1,1,\"R1\",true]"));
    assert!(vendor.logged("[value=\"noContact\"]"));
    assert!(vendor.logged("click #cancelConfirm"));
    assert!(vendor.reservation_ids().is_empty());
}

#[tokio::test]
async fn future_cancellation_uses_the_contacted_reason() {
    let vendor = FakeVendor::new();
    vendor.add_reservation("R7", "20251230", "10:00", "10:30", "1", "Yamada Taro 09012345678");
    let service = service(&vendor);

    let result = service
        .submit(
            &credentials(),
            request(
                ReservationOperation::Cancel,
                day(2025, 12, 30),
                "10:00",
                "Yamada Taro",
                "090-1234-5678",
            ),
            false,
        )
        .await
        .unwrap()
        .value;

    assert!(result.is_success());
    assert!(vendor.logged("[value=\"contacted\"]"));
    assert!(!vendor.logged("[value=\"noContact\"]"));
}

#[tokio::test]
async fn missing_reservation_fails_without_opening_a_popup() {
    let vendor = FakeVendor::new();
    vendor.add_reservation("R1", "20251228", "10:00", "10:30", "1", "Sato Jiro 08011112222");
    let service = service(&vendor);

    for (start, operation) in [
        ("10:00", ReservationOperation::Cancel),
        ("10:00", ReservationOperation::Update),
        ("11:00", ReservationOperation::Delete),
    ] {
        let result = service
            .submit(
                &credentials(),
                request(operation, day(2025, 12, 28), start, "Yamada Taro", "09012345678"),
                false,
            )
            .await
            .unwrap()
            .value;

        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.error_code, Some(ErrorCode::ReservationNotFound));
    }
    assert!(!vendor.logged("openEditReservation"));
    assert_eq!(vendor.reservation_ids(), vec!["R1".to_string()]);
}

#[tokio::test]
async fn delete_confirms_the_destructive_dialog() {
    let vendor = FakeVendor::new();
    vendor.add_reservation("R5", "20251229", "14:00", "15:00", "2", "Yamada Taro 09012345678");
    let service = service(&vendor);

    let result = service
        .submit(
            &credentials(),
            request(
                ReservationOperation::Delete,
                day(2025, 12, 29),
                "14:00",
                "Yamada Taro",
                "09012345678",
            ),
            false,
        )
        .await
        .unwrap()
        .value;

    assert!(result.is_success());
    assert!(vendor.logged("click #deleteReserve"));
    assert!(vendor.logged("click #deleteConfirm"));
    assert!(!vendor.logged("cancelReason"));
    assert!(vendor.reservation_ids().is_empty());
}

#[tokio::test]
async fn update_rewrites_notes_and_resubmits() {
    let vendor = FakeVendor::new();
    vendor.add_reservation("R9", "20251228", "10:00", "10:30", "1", "Yamada Taro 09012345678");
    vendor.add_menu("M02", "Perm");
    let service = service(&vendor);

    let mut update = request(
        ReservationOperation::Update,
        day(2025, 12, 28),
        "10:00",
        "Yamada Taro",
        "09012345678",
    );
    update.menu_name = Some("M02".to_string());
    update.notes = Some("bring photos".to_string());

    let result = service
        .submit(&credentials(), update, false)
        .await
        .unwrap()
        .value;

    assert!(result.is_success());
    assert_eq!(result.external_reservation_id.as_deref(), Some("R9"));
    assert!(vendor.logged("fill #reserveMemo Perm\nbring photos"));
    assert!(vendor.logged("click #reserveSubmit"));
    assert!(!vendor.logged("select "));
}

#[tokio::test]
async fn batch_isolates_failures_and_aggregates_status() {
    let vendor = FakeVendor::new();
    vendor.add_cell("20251228", "09:00", "09:30", "1", &[]);
    let service = service(&vendor);

    let ok = request(
        ReservationOperation::Create,
        day(2025, 12, 28),
        "09:00",
        "Yamada Taro",
        "09012345678",
    );
    let missing = request(
        ReservationOperation::Cancel,
        day(2025, 12, 28),
        "15:00",
        "Nobody",
        "0000",
    );

    let report = service
        .submit_batch(&credentials(), vec![missing.clone(), ok.clone()])
        .await
        .value;

    assert_eq!(report.status, JobStatus::PartialFailure);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].request_id, missing.request_id);
    assert_eq!(report.results[0].error_code, Some(ErrorCode::ReservationNotFound));
    assert_eq!(report.results[1].request_id, ok.request_id);
    assert!(report.results[1].is_success());

    let all_failed = service
        .submit_batch(&credentials(), vec![missing])
        .await
        .value;
    assert_eq!(all_failed.status, JobStatus::AllFailed);

    let empty = service.submit_batch(&credentials(), Vec::new()).await.value;
    assert_eq!(empty.status, JobStatus::Success);
}

#[tokio::test]
async fn restart_reuses_the_current_shop_and_relaunches() {
    let vendor = FakeVendor::new();
    let service = service(&vendor);
    service
        .fetch_slots(&credentials(), day(2025, 12, 28), day(2025, 12, 28), false)
        .await
        .unwrap();

    let outcome = service
        .restart(LOGIN_ID, LOGIN_SECRET, None, true)
        .await
        .unwrap();

    assert!(outcome.screenshot.is_some());
    assert_eq!(service.status().shop_id.as_deref(), Some(SHOP_ID));
    assert_eq!(vendor.launches(), 2);
}
