//! Channel selection and fan-out control for outbound notifications.
//!
//! Sends run outside the booking transactions and observe committed state.
//! Every send returns a boolean; a false result is logged and swallowed, and
//! the next lifecycle event re-carries the news.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_store::{DocumentStore, Filter, Query, SortDirection};
use shared_utils::clock::{format_time, format_timestamp, parse_time, parse_timestamp, Clock};

use appointment_cell::models::{Appointment, BookedVia};
use appointment_cell::services::tokens::is_position_token;
use doctor_cell::models::{Clinic, Doctor, TokenDistribution};
use queue_cell::{compare_queue, QueueOrdering};

use crate::models::{CampaignSend, ClosedWindowPolicy, NotificationKind, WhatsAppSession};
use crate::services::gateways::{PushGateway, WhatsAppGateway};
use crate::services::settings::NotificationSettingsService;

/// The free-message window counted from the patient's last inbound message.
const WHATSAPP_WINDOW_HOURS: i64 = 24;
/// How far before the slot a patient is told to report.
const REPORTING_LEAD_MINUTES: i64 = 15;
/// How many upcoming patients hear about a completed consultation.
const PEOPLE_AHEAD_FANOUT: usize = 3;

pub struct NotificationDispatcher {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: NotificationSettingsService,
    whatsapp: WhatsAppGateway,
    push: PushGateway,
}

impl NotificationDispatcher {
    pub fn new(config: &AppConfig, store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings: NotificationSettingsService::new(store.clone()),
            whatsapp: WhatsAppGateway::new(&config.whatsapp_gateway_url),
            push: PushGateway::new(&config.push_gateway_url),
            store,
            clock,
        }
    }

    // ==========================================================================
    // SMART CHANNEL SELECTION
    // ==========================================================================

    /// Drop the enablement cache so the next send re-reads settings.
    pub async fn reset_settings_cache(&self) {
        self.settings.reset().await;
    }

    /// The window is open iff the patient messaged us within 24 hours.
    pub async fn whatsapp_window_open(&self, phone: &str) -> bool {
        let session = match self.store.get(&format!("whatsappSessions/{}", phone)).await {
            Ok(Some(doc)) => {
                serde_json::from_value::<WhatsAppSession>(doc.data).unwrap_or_default()
            }
            _ => return false,
        };
        let Some(last) = session
            .last_user_message_at
            .as_deref()
            .and_then(|raw| parse_timestamp(raw).ok())
        else {
            return false;
        };
        self.clock.now() - last < Duration::hours(WHATSAPP_WINDOW_HOURS)
    }

    /// Open window → free text. Closed window → paid template when the policy
    /// says the message must go out, otherwise drop it.
    #[instrument(skip(self, template_variables, fallback_text), fields(kind = kind.key()))]
    pub async fn send_smart(
        &self,
        kind: NotificationKind,
        clinic_id: &str,
        phone: &str,
        template_sid: &str,
        template_variables: BTreeMap<String, String>,
        fallback_text: &str,
        policy: ClosedWindowPolicy,
    ) -> bool {
        if !self.settings.toggles_for(kind).await.whatsapp_enabled {
            debug!("whatsapp disabled for this kind");
            return false;
        }

        let sent = if self.whatsapp_window_open(phone).await {
            self.whatsapp.send_text(phone, fallback_text).await
        } else {
            match policy {
                ClosedWindowPolicy::AlwaysSend => {
                    self.whatsapp
                        .send_template(phone, template_sid, template_variables)
                        .await
                }
                ClosedWindowPolicy::SkipIfClosed => {
                    debug!("window closed; dropping send");
                    return false;
                }
            }
        };

        if sent {
            self.log_campaign_send(kind, clinic_id, phone, "whatsapp").await;
        } else {
            warn!(phone, "whatsapp send failed");
        }
        sent
    }

    pub async fn send_push(
        &self,
        kind: NotificationKind,
        clinic_id: &str,
        user_id: &str,
        fcm_token: &str,
        title: &str,
        body: &str,
        data: Value,
    ) -> bool {
        if !self.settings.toggles_for(kind).await.pwa_enabled {
            debug!(kind = kind.key(), "push disabled for this kind");
            return false;
        }
        let sent = self
            .push
            .send(user_id, fcm_token, title, body, data, "en")
            .await;
        if sent {
            self.log_campaign_send(kind, clinic_id, user_id, "push").await;
        }
        sent
    }

    // ==========================================================================
    // CONTENT POLICIES
    // ==========================================================================

    /// Which token string (if any) a message may show for this appointment.
    pub fn display_token(
        appointment: &Appointment,
        mode: TokenDistribution,
    ) -> Option<String> {
        match mode {
            TokenDistribution::Advanced => Some(appointment.token_number.clone()),
            TokenDistribution::Classic => {
                if let Some(classic) = &appointment.classic_token_number {
                    if !is_position_token(classic) {
                        return Some(classic.clone());
                    }
                }
                if appointment.booked_via == BookedVia::WalkIn {
                    return Some(appointment.token_number.clone());
                }
                None
            }
        }
    }

    /// The reporting time a patient is shown: fifteen minutes before the
    /// arrive-by time, except walk-ins who see their exact slot time.
    pub fn reporting_time(appointment: &Appointment) -> Option<String> {
        if appointment.booked_via == BookedVia::WalkIn {
            return Some(appointment.time.clone());
        }
        let raw = appointment
            .arrive_by_time
            .as_deref()
            .unwrap_or(&appointment.time);
        let time = parse_time(raw).ok()?;
        Some(format_time(time - Duration::minutes(REPORTING_LEAD_MINUTES)))
    }

    // ==========================================================================
    // FAN-OUTS
    // ==========================================================================

    /// Doctor went Out → In: every non-terminal appointment of the session
    /// hears that consultations started, with its queue position baked in so
    /// the classic estimate `now + position × avg` holds.
    #[instrument(skip(self))]
    pub async fn consultation_started_fanout(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        session_index: usize,
    ) -> u32 {
        let Some((clinic, doctor)) = self.load_clinic_doctor(clinic_id, doctor_id).await else {
            return 0;
        };
        let mut rows = self.today_session_rows(clinic_id, doctor_id, session_index).await;
        let ordering = QueueOrdering::from(clinic.token_distribution);
        rows.sort_by(|a, b| compare_queue(a, b, ordering));

        let now = self.clock.now();
        let mut sent = 0;
        for (position, appointment) in rows.iter().enumerate() {
            let Some(phone) = self.patient_phone(&appointment.patient_id).await else {
                continue;
            };
            let estimate = now + Duration::minutes(
                position as i64 * doctor.average_consultation_minutes as i64,
            );
            let token = Self::display_token(appointment, clinic.token_distribution);
            let body = match token {
                Some(token) => format!(
                    "{} has started consultations. Token {}: you are number {} in the queue, estimated {}.",
                    doctor.name,
                    token,
                    position + 1,
                    format_time(estimate.time()),
                ),
                None => format!(
                    "{} has started consultations. You are number {} in the queue, estimated {}.",
                    doctor.name,
                    position + 1,
                    format_time(estimate.time()),
                ),
            };
            let mut variables = BTreeMap::new();
            variables.insert("1".to_string(), doctor.name.clone());
            variables.insert("2".to_string(), (position + 1).to_string());
            if self
                .send_smart(
                    NotificationKind::DoctorConsultationStarted,
                    clinic_id,
                    &phone,
                    "doctor_consultation_started",
                    variables,
                    &body,
                    ClosedWindowPolicy::SkipIfClosed,
                )
                .await
            {
                sent += 1;
            }
        }
        info!(sent, "consultation-start fan-out complete");
        sent
    }

    /// A consultation completed: tell the next few patients how many people
    /// are still ahead of them, plus any break sitting between.
    #[instrument(skip(self))]
    pub async fn people_ahead_fanout(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        completed_appointment_id: &str,
    ) -> u32 {
        let Some((clinic, doctor)) = self.load_clinic_doctor(clinic_id, doctor_id).await else {
            return 0;
        };
        let completed = match self
            .store
            .get(&format!("appointments/{}", completed_appointment_id))
            .await
        {
            Ok(Some(doc)) => match serde_json::from_value::<Appointment>(doc.data) {
                Ok(appointment) => appointment,
                Err(_) => return 0,
            },
            _ => return 0,
        };

        let mut rows = self
            .today_session_rows(clinic_id, doctor_id, completed.session_index)
            .await;
        let ordering = QueueOrdering::from(clinic.token_distribution);
        rows.sort_by(|a, b| compare_queue(a, b, ordering));

        let break_slots: Vec<usize> = self
            .today_break_block_slots(clinic_id, doctor_id, completed.session_index)
            .await;

        let mut sent = 0;
        for (index, appointment) in rows
            .iter()
            .filter(|a| a.slot_index > completed.slot_index)
            .take(PEOPLE_AHEAD_FANOUT)
            .enumerate()
        {
            let Some(phone) = self.patient_phone(&appointment.patient_id).await else {
                continue;
            };
            let break_minutes = break_slots
                .iter()
                .filter(|&&slot| slot > completed.slot_index && slot < appointment.slot_index)
                .count() as i64
                * doctor.average_consultation_minutes as i64;
            let mut body = format!("{} people ahead of you in the queue.", index);
            if break_minutes > 0 {
                body.push_str(&format!(" The doctor has a {} minute break before your turn.", break_minutes));
            }
            let mut variables = BTreeMap::new();
            variables.insert("1".to_string(), index.to_string());
            if self
                .send_smart(
                    NotificationKind::PeopleAhead,
                    clinic_id,
                    &phone,
                    "people_ahead",
                    variables,
                    &body,
                    ClosedWindowPolicy::SkipIfClosed,
                )
                .await
            {
                sent += 1;
            }
        }
        sent
    }

    // ==========================================================================
    // SHARED LOOKUPS
    // ==========================================================================

    pub(crate) async fn load_clinic_doctor(
        &self,
        clinic_id: &str,
        doctor_id: &str,
    ) -> Option<(Clinic, Doctor)> {
        let clinic = match self.store.get(&format!("clinics/{}", clinic_id)).await {
            Ok(Some(doc)) => serde_json::from_value::<Clinic>(doc.data).ok()?,
            _ => return None,
        };
        let doctor = match self.store.get(&format!("doctors/{}", doctor_id)).await {
            Ok(Some(doc)) => serde_json::from_value::<Doctor>(doc.data).ok()?,
            _ => return None,
        };
        Some((clinic, doctor))
    }

    /// Non-terminal, non-break rows of today's session.
    async fn today_session_rows(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        session_index: usize,
    ) -> Vec<Appointment> {
        self.today_rows(clinic_id, doctor_id)
            .await
            .into_iter()
            .filter(|a| {
                a.session_index == session_index && a.is_active() && !a.is_break_block()
            })
            .collect()
    }

    async fn today_break_block_slots(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        session_index: usize,
    ) -> Vec<usize> {
        self.today_rows(clinic_id, doctor_id)
            .await
            .into_iter()
            .filter(|a| a.session_index == session_index && a.is_break_block())
            .map(|a| a.slot_index)
            .collect()
    }

    pub(crate) async fn today_rows(&self, clinic_id: &str, doctor_id: &str) -> Vec<Appointment> {
        self.rows_for_date(clinic_id, doctor_id, &self.clock.today_iso()).await
    }

    pub(crate) async fn rows_for_date(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        date_iso: &str,
    ) -> Vec<Appointment> {
        let query = Query::collection("appointments")
            .filter(Filter::Eq("clinicId".into(), json!(clinic_id)))
            .filter(Filter::Eq("doctorId".into(), json!(doctor_id)))
            .filter(Filter::Eq("date".into(), json!(date_iso)))
            .order("slotIndex", SortDirection::Asc);
        match self.store.query(&query).await {
            Ok(docs) => docs
                .into_iter()
                .filter_map(|doc| serde_json::from_value(doc.data).ok())
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to load appointment rows for dispatch");
                Vec::new()
            }
        }
    }

    pub(crate) async fn clinic_mode(&self, clinic_id: &str) -> TokenDistribution {
        match self.store.get(&format!("clinics/{}", clinic_id)).await {
            Ok(Some(doc)) => serde_json::from_value::<Clinic>(doc.data)
                .map(|clinic| clinic.token_distribution)
                .unwrap_or_default(),
            _ => TokenDistribution::default(),
        }
    }

    pub(crate) async fn patient_phone(&self, patient_id: &str) -> Option<String> {
        match self.store.get(&format!("patients/{}", patient_id)).await {
            Ok(Some(doc)) => doc
                .data
                .get("phone")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }

    async fn log_campaign_send(
        &self,
        kind: NotificationKind,
        clinic_id: &str,
        recipient: &str,
        medium: &str,
    ) {
        let send = CampaignSend {
            r#ref: Uuid::new_v4().to_string(),
            campaign: kind.key().to_string(),
            medium: medium.to_string(),
            clinic: clinic_id.to_string(),
            phone: recipient.to_string(),
            sent_at: format_timestamp(self.clock.now()),
        };
        let path = format!("campaignSends/{}", send.r#ref);
        match self.store.begin().await {
            Ok(mut tx) => {
                tx.set(&path, json!(send));
                if let Err(e) = tx.commit().await {
                    warn!(error = %e, "failed to log campaign send");
                }
            }
            Err(e) => warn!(error = %e, "failed to log campaign send"),
        }
    }

    pub(crate) fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }
}
