use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use notification_cell::NotificationDispatcher;
use shared_config::AppConfig;
use shared_store::{DocumentStore, MemoryStore};
use shared_utils::clock::{format_timestamp, Clock, FixedClock};

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
}

fn test_config(whatsapp_url: &str) -> AppConfig {
    AppConfig {
        clinic_timezone: "Asia/Kolkata".into(),
        push_gateway_url: String::new(),
        whatsapp_gateway_url: whatsapp_url.into(),
        base_url: String::new(),
        patient_app_url: String::new(),
        debug_walk_in: false,
    }
}

async fn seed_base(store: &MemoryStore) {
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
                    { "dayOfWeek": 1, "sessions": [ { "from": "10:00:00", "to": "13:00:00" } ] }
                ],
                "consultationStatus": "in",
            }),
        )
        .await;
}

async fn seed_row(store: &MemoryStore, id: &str, patient: &str, slot: usize, status: &str) {
    store
        .seed(
            &format!("appointments/{}", id),
            json!({
                "id": id,
                "clinicId": "clinic-1",
                "doctorId": "doc-1",
                "patientId": patient,
                "date": "2026-01-05",
                "time": "10:00 AM",
                "bookedVia": "advance",
                "status": status,
                "slotIndex": slot,
                "sessionIndex": 0,
                "numericToken": slot + 1,
                "tokenNumber": format!("A1-{:03}", slot + 1),
            }),
        )
        .await;
}

async fn seed_patient_with_open_window(
    store: &MemoryStore,
    clock: &FixedClock,
    patient: &str,
    phone: &str,
) {
    store
        .seed(
            &format!("patients/{}", patient),
            json!({ "id": patient, "phone": phone }),
        )
        .await;
    store
        .seed(
            &format!("whatsappSessions/{}", phone),
            json!({ "lastUserMessageAt": format_timestamp(clock.now() - Duration::hours(1)) }),
        )
        .await;
}

#[tokio::test]
async fn consultation_start_notifies_everyone_with_their_position() {
    let server = MockServer::start().await;
    let store = MemoryStore::new();
    let clock = Arc::new(FixedClock::at(
        monday(),
        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
    ));
    seed_base(&store).await;
    seed_row(&store, "a0", "p0", 0, "confirmed").await;
    seed_row(&store, "a1", "p1", 1, "pending").await;
    seed_patient_with_open_window(&store, &clock, "p0", "+911000000000").await;
    seed_patient_with_open_window(&store, &clock, "p1", "+911000000001").await;

    Mock::given(method("POST"))
        .and(path("/api/send-sms"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let dispatcher = NotificationDispatcher::new(
        &test_config(&server.uri()),
        Arc::new(store.clone()),
        clock,
    );
    let sent = dispatcher
        .consultation_started_fanout("clinic-1", "doc-1", 0)
        .await;
    assert_eq!(sent, 2);
}

#[tokio::test]
async fn completion_notifies_the_next_three_at_most() {
    let server = MockServer::start().await;
    let store = MemoryStore::new();
    let clock = Arc::new(FixedClock::at(
        monday(),
        NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
    ));
    seed_base(&store).await;
    seed_row(&store, "done", "p-done", 0, "completed").await;
    for i in 1..=5 {
        let id = format!("a{}", i);
        let patient = format!("p{}", i);
        seed_row(&store, &id, &patient, i, "confirmed").await;
        seed_patient_with_open_window(&store, &clock, &patient, &format!("+91100000000{}", i))
            .await;
    }

    Mock::given(method("POST"))
        .and(path("/api/send-sms"))
        .and(body_partial_json(json!({ "contentSid": "text_message" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let dispatcher = NotificationDispatcher::new(
        &test_config(&server.uri()),
        Arc::new(store.clone()),
        clock,
    );
    let sent = dispatcher
        .people_ahead_fanout("clinic-1", "doc-1", "done")
        .await;
    assert_eq!(sent, 3);
}
