use std::env;
use tracing::warn;

pub const DEFAULT_CLINIC_TIMEZONE: &str = "Asia/Kolkata";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub clinic_timezone: String,
    pub push_gateway_url: String,
    pub whatsapp_gateway_url: String,
    pub base_url: String,
    pub patient_app_url: String,
    pub debug_walk_in: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            clinic_timezone: env::var("CLINIC_TIMEZONE")
                .unwrap_or_else(|_| DEFAULT_CLINIC_TIMEZONE.to_string()),
            push_gateway_url: env::var("PUSH_GATEWAY_URL").unwrap_or_else(|_| {
                warn!("PUSH_GATEWAY_URL not set, using empty value");
                String::new()
            }),
            whatsapp_gateway_url: env::var("WHATSAPP_GATEWAY_URL").unwrap_or_else(|_| {
                warn!("WHATSAPP_GATEWAY_URL not set, using empty value");
                String::new()
            }),
            base_url: env::var("NEXT_PUBLIC_BASE_URL").unwrap_or_default(),
            patient_app_url: env::var("NEXT_PUBLIC_PATIENT_APP_URL").unwrap_or_default(),
            debug_walk_in: env::var("NEXT_PUBLIC_DEBUG_WALK_IN")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing gateway environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.push_gateway_url.is_empty() && !self.whatsapp_gateway_url.is_empty()
    }
}
