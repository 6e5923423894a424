use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{debug, warn};

/// Free-form WhatsApp text goes out under this sentinel content sid.
pub const TEXT_MESSAGE_SID: &str = "text_message";

/// HTTP client for the push-notification gateway. Sends report success as a
/// boolean; a failed send is logged and never propagated.
pub struct PushGateway {
    client: reqwest::Client,
    base_url: String,
}

impl PushGateway {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn send(
        &self,
        user_id: &str,
        fcm_token: &str,
        title: &str,
        body: &str,
        data: Value,
        language: &str,
    ) -> bool {
        if self.base_url.is_empty() {
            debug!("push gateway not configured; dropping notification");
            return false;
        }
        let url = format!("{}/api/send-notification", self.base_url);
        let payload = json!({
            "userId": user_id,
            "fcmToken": fcm_token,
            "title": title,
            "body": body,
            "data": data,
            "language": language,
        });

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), user_id, "push gateway rejected notification");
                false
            }
            Err(e) => {
                warn!(error = %e, user_id, "push gateway unreachable");
                false
            }
        }
    }
}

/// HTTP client for the WhatsApp/Meta message gateway.
pub struct WhatsAppGateway {
    client: reqwest::Client,
    base_url: String,
}

impl WhatsAppGateway {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Free-form text; only valid inside the 24-hour window.
    pub async fn send_text(&self, to: &str, text: &str) -> bool {
        self.post(json!({
            "to": to,
            "channel": "whatsapp",
            "contentSid": TEXT_MESSAGE_SID,
            "contentVariables": { "text": text },
        }))
        .await
    }

    /// Paid template send; `variables` is the positional `{"1": …}` map.
    pub async fn send_template(
        &self,
        to: &str,
        content_sid: &str,
        variables: BTreeMap<String, String>,
    ) -> bool {
        self.post(json!({
            "to": to,
            "channel": "whatsapp",
            "contentSid": content_sid,
            "contentVariables": variables,
        }))
        .await
    }

    async fn post(&self, payload: Value) -> bool {
        if self.base_url.is_empty() {
            debug!("whatsapp gateway not configured; dropping message");
            return false;
        }
        let url = format!("{}/api/send-sms", self.base_url);
        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "whatsapp gateway rejected message");
                false
            }
            Err(e) => {
                warn!(error = %e, "whatsapp gateway unreachable");
                false
            }
        }
    }
}
