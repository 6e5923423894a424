//! Batch reminder windows.
//!
//! Two clinic-local windows per day: [17:00, 19:00) reminds tomorrow's
//! bookings, [07:00, 09:00) reminds today's. Each appointment carries one
//! boolean per window so a reminder goes out at most once, however often the
//! batch runs inside its window.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, Timelike};
use serde_json::json;
use tracing::{info, instrument, warn};

use shared_store::FieldValue;
use shared_utils::clock::iso_date;

use appointment_cell::models::{Appointment, AppointmentStatus};

use crate::models::{ClosedWindowPolicy, NotificationKind};
use crate::services::dispatcher::NotificationDispatcher;

const EVENING_WINDOW: (u32, u32) = (17, 19);
const MORNING_WINDOW: (u32, u32) = (7, 9);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReminderWindow {
    Evening,
    Morning,
}

impl ReminderWindow {
    fn flag_field(&self) -> &'static str {
        match self {
            ReminderWindow::Evening => "reminderEveningSent",
            ReminderWindow::Morning => "reminderMorningSent",
        }
    }

    fn already_sent(&self, appointment: &Appointment) -> bool {
        match self {
            ReminderWindow::Evening => appointment.reminder_evening_sent,
            ReminderWindow::Morning => appointment.reminder_morning_sent,
        }
    }
}

impl NotificationDispatcher {
    /// Run whichever batch window is open right now. Safe to call from a
    /// periodic trigger; the per-row flags keep sends at-most-once.
    #[instrument(skip(self))]
    pub async fn run_reminder_batches(&self, clinic_id: &str, doctor_id: &str) -> u32 {
        let now = self.now();
        let hour = now.time().hour();
        let mut sent = 0;

        if (EVENING_WINDOW.0..EVENING_WINDOW.1).contains(&hour) {
            let tomorrow = now.date() + Duration::days(1);
            sent += self
                .send_window_reminders(clinic_id, doctor_id, tomorrow, ReminderWindow::Evening)
                .await;
        }
        if (MORNING_WINDOW.0..MORNING_WINDOW.1).contains(&hour) {
            sent += self
                .send_window_reminders(clinic_id, doctor_id, now.date(), ReminderWindow::Morning)
                .await;
        }
        sent
    }

    /// A booking made after its batch window already passed still deserves
    /// its reminder; send it on the spot.
    pub async fn send_reminder_immediately(&self, appointment: &Appointment) -> bool {
        let now = self.now();
        let hour = now.time().hour();
        let today = iso_date(now.date());
        let tomorrow = iso_date(now.date() + Duration::days(1));

        let window = if appointment.date == today && hour >= MORNING_WINDOW.0 {
            ReminderWindow::Morning
        } else if appointment.date == tomorrow && hour >= EVENING_WINDOW.0 {
            ReminderWindow::Evening
        } else {
            return false;
        };

        self.send_one_reminder(appointment, window).await
    }

    async fn send_window_reminders(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        date: NaiveDate,
        window: ReminderWindow,
    ) -> u32 {
        let rows = self
            .rows_for_date(clinic_id, doctor_id, &iso_date(date))
            .await;
        let mut sent = 0;
        for appointment in rows.iter().filter(|a| {
            matches!(
                a.status,
                AppointmentStatus::Pending | AppointmentStatus::Confirmed
            ) && !a.is_break_block()
                && !window.already_sent(a)
        }) {
            if self.send_one_reminder(appointment, window).await {
                sent += 1;
            }
        }
        info!(sent, ?window, "reminder batch finished");
        sent
    }

    async fn send_one_reminder(&self, appointment: &Appointment, window: ReminderWindow) -> bool {
        let Some(phone) = self.patient_phone(&appointment.patient_id).await else {
            return false;
        };

        let mode = self.clinic_mode(&appointment.clinic_id).await;
        let reporting = Self::reporting_time(appointment).unwrap_or_else(|| appointment.time.clone());
        let token = Self::display_token(appointment, mode)
            .unwrap_or_else(|| appointment.token_number.clone());
        let body = format!(
            "Reminder: appointment {} on {}. Please report by {}.",
            token, appointment.date, reporting
        );
        let mut variables = BTreeMap::new();
        variables.insert("1".to_string(), token);
        variables.insert("2".to_string(), appointment.date.clone());
        variables.insert("3".to_string(), reporting);

        let sent = self
            .send_smart(
                NotificationKind::DailyReminder,
                &appointment.clinic_id,
                &phone,
                "daily_reminder",
                variables,
                &body,
                ClosedWindowPolicy::AlwaysSend,
            )
            .await;

        if sent {
            if let Err(e) = self.mark_flag(appointment, window.flag_field()).await {
                warn!(error = %e, appointment = %appointment.id, "failed to persist reminder flag");
            }
        }
        sent
    }

    async fn mark_flag(
        &self,
        appointment: &Appointment,
        field: &str,
    ) -> Result<(), shared_store::StoreError> {
        let mut tx = self.store.begin().await?;
        tx.update(
            &appointment.doc_path(),
            vec![(field.to_string(), FieldValue::Value(json!(true)))],
        );
        tx.commit().await
    }
}
