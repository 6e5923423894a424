use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use notification_cell::NotificationDispatcher;
use shared_config::AppConfig;
use shared_store::{DocumentStore, MemoryStore};
use shared_utils::clock::FixedClock;

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

async fn seed_pending_appointment(store: &MemoryStore, id: &str, date: &str) {
    store
        .seed(
            &format!("appointments/{}", id),
            json!({
                "id": id,
                "clinicId": "clinic-1",
                "doctorId": "doc-1",
                "patientId": "p1",
                "date": date,
                "time": "10:45 AM",
                "arriveByTime": "10:45 AM",
                "bookedVia": "advance",
                "status": "pending",
                "slotIndex": 3,
                "sessionIndex": 0,
                "numericToken": 4,
                "tokenNumber": "A1-004",
            }),
        )
        .await;
}

async fn setup(hour: u32) -> (MemoryStore, NotificationDispatcher, MockServer) {
    let server = MockServer::start().await;
    let store = MemoryStore::new();
    store.seed("patients/p1", json!({ "id": "p1", "phone": "+911234567890" })).await;
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

    let clock = Arc::new(FixedClock::at(
        monday(),
        NaiveTime::from_hms_opt(hour, 30, 0).unwrap(),
    ));
    let dispatcher =
        NotificationDispatcher::new(&test_config(&server.uri()), Arc::new(store.clone()), clock);
    (store, dispatcher, server)
}

#[tokio::test]
async fn evening_window_reminds_tomorrows_bookings_once() {
    let (store, dispatcher, server) = setup(17).await;
    seed_pending_appointment(&store, "appt-tomorrow", "2026-01-06").await;
    seed_pending_appointment(&store, "appt-today", "2026-01-05").await;

    Mock::given(method("POST"))
        .and(path("/api/send-sms"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // Only tomorrow's booking qualifies in the evening window.
    let sent = dispatcher.run_reminder_batches("clinic-1", "doc-1").await;
    assert_eq!(sent, 1);

    let row = store.get("appointments/appt-tomorrow").await.unwrap().unwrap();
    assert_eq!(row.data["reminderEveningSent"], true);

    // Re-running inside the same window sends nothing more.
    let sent = dispatcher.run_reminder_batches("clinic-1", "doc-1").await;
    assert_eq!(sent, 0);
}

#[tokio::test]
async fn morning_window_reminds_todays_bookings() {
    let (store, dispatcher, server) = setup(7).await;
    seed_pending_appointment(&store, "appt-today", "2026-01-05").await;

    Mock::given(method("POST"))
        .and(path("/api/send-sms"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sent = dispatcher.run_reminder_batches("clinic-1", "doc-1").await;
    assert_eq!(sent, 1);

    let row = store.get("appointments/appt-today").await.unwrap().unwrap();
    assert_eq!(row.data["reminderMorningSent"], true);
}

#[tokio::test]
async fn outside_both_windows_nothing_happens() {
    let (store, dispatcher, server) = setup(12).await;
    seed_pending_appointment(&store, "appt-today", "2026-01-05").await;

    Mock::given(method("POST"))
        .and(path("/api/send-sms"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sent = dispatcher.run_reminder_batches("clinic-1", "doc-1").await;
    assert_eq!(sent, 0);
}

#[tokio::test]
async fn late_bookings_get_their_reminder_immediately() {
    let (store, dispatcher, server) = setup(18).await;
    seed_pending_appointment(&store, "appt-tomorrow", "2026-01-06").await;

    Mock::given(method("POST"))
        .and(path("/api/send-sms"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let doc = store.get("appointments/appt-tomorrow").await.unwrap().unwrap();
    let appointment: appointment_cell::models::Appointment =
        serde_json::from_value(doc.data).unwrap();

    assert!(dispatcher.send_reminder_immediately(&appointment).await);
}
