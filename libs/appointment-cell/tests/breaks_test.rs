use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::json;

use appointment_cell::models::{BookingError, BREAK_PATIENT_ID};
use appointment_cell::services::allocator::SlotAllocatorService;
use appointment_cell::services::breaks::{
    apply_break_offsets, AddBreakRequest, BreakService,
};
use doctor_cell::services::delay::BreakInterval;
use shared_store::{DocumentStore, Filter, MemoryStore, Query};
use shared_utils::clock::FixedClock;

const DATE: &str = "2026-01-05";

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    monday().and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

struct Setup {
    store: MemoryStore,
    breaks: BreakService,
    allocator: SlotAllocatorService,
}

async fn setup() -> Setup {
    let store = MemoryStore::new();
    store
        .seed(
            "clinics/clinic-1",
            json!({
                "id": "clinic-1",
                "name": "Kochi Family Clinic",
                "shortCode": "KQ-1001",
                "walkInTokenAllotment": 5,
                "tokenDistribution": "advanced",
            }),
        )
        .await;
    store
        .seed(
            "doctors/doc-1",
            json!({
                "id": "doc-1",
                "clinicId": "clinic-1",
                "name": "Dr Asha",
                "averageConsultationMinutes": 15,
                "weeklyAvailability": [
                    { "dayOfWeek": 1, "sessions": [ { "from": "10:00:00", "to": "11:00:00" } ] }
                ],
                "consultationStatus": "out",
            }),
        )
        .await;

    let clock = Arc::new(FixedClock::at(
        monday(),
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
    ));
    let store_arc: Arc<dyn DocumentStore> = Arc::new(store.clone());
    Setup {
        breaks: BreakService::new(store_arc.clone(), clock.clone()),
        allocator: SlotAllocatorService::new(store_arc, clock),
        store,
    }
}

async fn seed_advance(store: &MemoryStore, id: &str, patient: &str, slot: usize, time: &str) {
    store
        .seed(
            &format!("appointments/{}", id),
            json!({
                "id": id,
                "clinicId": "clinic-1",
                "doctorId": "doc-1",
                "patientId": patient,
                "date": DATE,
                "time": time,
                "bookedVia": "advance",
                "status": "confirmed",
                "slotIndex": slot,
                "sessionIndex": 0,
                "numericToken": slot + 1,
                "tokenNumber": format!("A1-{:03}", slot + 1),
            }),
        )
        .await;
}

fn break_request(slot_times: Vec<NaiveDateTime>) -> AddBreakRequest {
    AddBreakRequest {
        clinic_id: "clinic-1".into(),
        doctor_id: "doc-1".into(),
        date: monday(),
        session_index: 0,
        slot_times,
    }
}

#[tokio::test]
async fn empty_slots_absorb_a_break_without_extension() {
    let setup = setup().await;
    seed_advance(&setup.store, "a0", "p0", 0, "10:00 AM").await;
    seed_advance(&setup.store, "a3", "p3", 3, "10:45 AM").await;

    let outcome = setup
        .breaks
        .add_break(break_request(vec![at(10, 15), at(10, 30)]))
        .await
        .unwrap();

    assert_eq!(outcome.extension_minutes, 0);
    assert!(!outcome.rebalance_needed);
    assert_eq!(outcome.break_period.duration_minutes, 30);

    // Two dummies on the covered slots; the session end stays at 11:00.
    let blocks = setup
        .store
        .query(
            &Query::collection("appointments")
                .filter(Filter::Eq("patientId".into(), json!(BREAK_PATIENT_ID))),
        )
        .await
        .unwrap();
    assert_eq!(blocks.len(), 2);
    assert!(blocks.iter().all(|b| b.data["cancelledByBreak"] == true));

    let doctor = setup.store.get("doctors/doc-1").await.unwrap().unwrap();
    assert_eq!(
        doctor.data["availabilityExtensions"][DATE]["sessions"]["0"]["newEndTime"],
        "11:00:00"
    );
}

#[tokio::test]
async fn displaced_appointments_extend_the_session_and_shift_out() {
    let setup = setup().await;
    for (id, patient, slot, time) in [
        ("a0", "p0", 0usize, "10:00 AM"),
        ("a1", "p1", 1, "10:15 AM"),
        ("a2", "p2", 2, "10:30 AM"),
        ("a3", "p3", 3, "10:45 AM"),
    ] {
        seed_advance(&setup.store, id, patient, slot, time).await;
    }

    let outcome = setup
        .breaks
        .add_break(break_request(vec![at(10, 15), at(10, 30)]))
        .await
        .unwrap();

    // Two displaced appointments × 15 minutes.
    assert_eq!(outcome.extension_minutes, 30);
    assert!(outcome.rebalance_needed);

    let doctor = setup.store.get("doctors/doc-1").await.unwrap().unwrap();
    assert_eq!(
        doctor.data["availabilityExtensions"][DATE]["sessions"]["0"]["newEndTime"],
        "11:30:00"
    );

    setup
        .allocator
        .rebalance_walk_ins("clinic-1", "doc-1", monday())
        .await
        .unwrap();

    let row = |id: String| {
        let setup = &setup;
        async move {
            setup
                .store
                .get(&format!("appointments/{}", id))
                .await
                .unwrap()
                .unwrap()
                .data
        }
    };
    let a1 = row("a1".to_string()).await;
    assert_eq!(a1["slotIndex"], 4);
    assert_eq!(a1["time"], "11:00 AM");
    let a2 = row("a2".to_string()).await;
    assert_eq!(a2["slotIndex"], 5);
    assert_eq!(a2["time"], "11:15 AM");
    // Untouched neighbours and token strings stay put.
    let a3 = row("a3".to_string()).await;
    assert_eq!(a3["slotIndex"], 3);
    assert_eq!(a1["tokenNumber"], "A1-002");
}

#[tokio::test]
async fn break_validation_rejects_bad_shapes() {
    let setup = setup().await;

    // No slots.
    let err = setup.breaks.add_break(break_request(vec![])).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidBreak(_)));

    // Outside the session.
    let err = setup
        .breaks
        .add_break(break_request(vec![at(12, 0)]))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidBreak(_)));

    // Non-contiguous slots.
    let err = setup
        .breaks
        .add_break(break_request(vec![at(10, 0), at(10, 30)]))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidBreak(_)));
}

#[tokio::test]
async fn overlapping_breaks_are_rejected_and_adjacent_ones_merge() {
    let setup = setup().await;

    setup
        .breaks
        .add_break(break_request(vec![at(10, 15)]))
        .await
        .unwrap();

    // Overlap with the existing break.
    let err = setup
        .breaks
        .add_break(break_request(vec![at(10, 15)]))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidBreak(_)));

    // Adjacent break merges instead of creating a second record.
    let outcome = setup
        .breaks
        .add_break(break_request(vec![at(10, 30)]))
        .await
        .unwrap();
    assert_eq!(outcome.break_period.duration_minutes, 30);

    let doctor = setup.store.get("doctors/doc-1").await.unwrap().unwrap();
    let day_breaks = doctor.data["breakPeriods"][DATE].as_array().unwrap();
    assert_eq!(day_breaks.len(), 1);
    assert_eq!(day_breaks[0]["startTime"], "10:15:00");
    assert_eq!(day_breaks[0]["endTime"], "10:45:00");
}

#[tokio::test]
async fn a_session_allows_at_most_three_breaks() {
    let setup = setup().await;

    // Three non-adjacent single-slot breaks need more room than the default
    // one-hour session, so reseed the doctor with a longer one.
    setup
        .store
        .seed(
            "doctors/doc-1",
            json!({
                "id": "doc-1",
                "clinicId": "clinic-1",
                "name": "Dr Asha",
                "averageConsultationMinutes": 15,
                "weeklyAvailability": [
                    { "dayOfWeek": 1, "sessions": [ { "from": "10:00:00", "to": "13:00:00" } ] }
                ],
                "consultationStatus": "out",
            }),
        )
        .await;

    for start in [at(10, 0), at(10, 30), at(11, 0)] {
        setup.breaks.add_break(break_request(vec![start])).await.unwrap();
    }

    let err = setup
        .breaks
        .add_break(break_request(vec![at(11, 30)]))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidBreak(_)));

    // The cap bounds the record count, not the requests: a fourth request
    // adjacent to an existing break merges into it and is still accepted.
    let outcome = setup
        .breaks
        .add_break(break_request(vec![at(10, 15)]))
        .await
        .unwrap();
    assert_eq!(outcome.break_period.duration_minutes, 30);

    let doctor = setup.store.get("doctors/doc-1").await.unwrap().unwrap();
    let day_breaks = doctor.data["breakPeriods"][DATE].as_array().unwrap();
    assert_eq!(day_breaks.len(), 3);
    assert_eq!(day_breaks[0]["startTime"], "10:00:00");
    assert_eq!(day_breaks[0]["endTime"], "10:30:00");
}

#[tokio::test]
async fn removing_a_break_deletes_dummies_and_returns_the_extension() {
    let setup = setup().await;
    for (id, patient, slot, time) in [
        ("a0", "p0", 0usize, "10:00 AM"),
        ("a1", "p1", 1, "10:15 AM"),
        ("a2", "p2", 2, "10:30 AM"),
        ("a3", "p3", 3, "10:45 AM"),
    ] {
        seed_advance(&setup.store, id, patient, slot, time).await;
    }

    let added = setup
        .breaks
        .add_break(break_request(vec![at(10, 15), at(10, 30)]))
        .await
        .unwrap();

    let outcome = setup
        .breaks
        .remove_break("clinic-1", "doc-1", monday(), &added.break_period.id)
        .await
        .unwrap();
    assert_eq!(outcome.extension_minutes, 30);

    let blocks = setup
        .store
        .query(
            &Query::collection("appointments")
                .filter(Filter::Eq("patientId".into(), json!(BREAK_PATIENT_ID))),
        )
        .await
        .unwrap();
    assert!(blocks.is_empty());

    let doctor = setup.store.get("doctors/doc-1").await.unwrap().unwrap();
    assert_eq!(
        doctor.data["availabilityExtensions"][DATE]["sessions"]["0"]["newEndTime"],
        "11:00:00"
    );
    assert!(doctor.data["breakPeriods"][DATE].as_array().unwrap().is_empty());
}

#[test]
fn break_offsets_push_display_times_later() {
    let intervals = [
        BreakInterval { start: at(10, 0), end: at(10, 15) },
        BreakInterval { start: at(11, 0), end: at(11, 15) },
    ];

    // The 10:00 break has begun by 10:30; the 11:00 one has not.
    assert_eq!(apply_break_offsets(at(10, 30), &intervals), at(10, 45));
    // Pushing past 11:00 pulls the second interval in as well.
    assert_eq!(apply_break_offsets(at(10, 50), &intervals), at(11, 20));
}
