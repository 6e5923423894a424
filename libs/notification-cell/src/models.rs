use serde::{Deserialize, Serialize};

/// Every notification the system can emit. Each kind is gated per channel
/// through the persisted settings map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AppointmentBookedByStaff,
    ArrivalConfirmed,
    TokenCalled,
    AppointmentCancelled,
    DoctorRunningLate,
    BreakUpdate,
    AppointmentSkipped,
    PeopleAhead,
    DoctorConsultationStarted,
    DailyReminder,
    FreeFollowUpExpiry,
    ConsultationCompleted,
    AiFallback,
    BookingLink,
}

impl NotificationKind {
    pub fn key(&self) -> &'static str {
        match self {
            NotificationKind::AppointmentBookedByStaff => "appointment_booked_by_staff",
            NotificationKind::ArrivalConfirmed => "arrival_confirmed",
            NotificationKind::TokenCalled => "token_called",
            NotificationKind::AppointmentCancelled => "appointment_cancelled",
            NotificationKind::DoctorRunningLate => "doctor_running_late",
            NotificationKind::BreakUpdate => "break_update",
            NotificationKind::AppointmentSkipped => "appointment_skipped",
            NotificationKind::PeopleAhead => "people_ahead",
            NotificationKind::DoctorConsultationStarted => "doctor_consultation_started",
            NotificationKind::DailyReminder => "daily_reminder",
            NotificationKind::FreeFollowUpExpiry => "free_follow_up_expiry",
            NotificationKind::ConsultationCompleted => "consultation_completed",
            NotificationKind::AiFallback => "ai_fallback",
            NotificationKind::BookingLink => "booking_link",
        }
    }

    pub fn all() -> &'static [NotificationKind] {
        &[
            NotificationKind::AppointmentBookedByStaff,
            NotificationKind::ArrivalConfirmed,
            NotificationKind::TokenCalled,
            NotificationKind::AppointmentCancelled,
            NotificationKind::DoctorRunningLate,
            NotificationKind::BreakUpdate,
            NotificationKind::AppointmentSkipped,
            NotificationKind::PeopleAhead,
            NotificationKind::DoctorConsultationStarted,
            NotificationKind::DailyReminder,
            NotificationKind::FreeFollowUpExpiry,
            NotificationKind::ConsultationCompleted,
            NotificationKind::AiFallback,
            NotificationKind::BookingLink,
        ]
    }
}

/// Per-kind channel switches; both channels default on when the settings
/// document has no entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelToggles {
    pub whatsapp_enabled: bool,
    pub pwa_enabled: bool,
}

impl Default for ChannelToggles {
    fn default() -> Self {
        Self {
            whatsapp_enabled: true,
            pwa_enabled: true,
        }
    }
}

/// What to do with a WhatsApp send when the 24-hour free window is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedWindowPolicy {
    /// Pay for the template message.
    AlwaysSend,
    /// Drop the send; the next lifecycle event will carry the news.
    SkipIfClosed,
}

/// Conversation state for a patient phone number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppSession {
    #[serde(default)]
    pub last_user_message_at: Option<String>,
    #[serde(default)]
    pub booking_state: Option<String>,
    #[serde(default)]
    pub booking_data: Option<serde_json::Value>,
}

/// Append-only record of an outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSend {
    pub r#ref: String,
    pub campaign: String,
    pub medium: String,
    pub clinic: String,
    pub phone: String,
    pub sent_at: String,
}
