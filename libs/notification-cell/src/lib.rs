pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{ChannelToggles, ClosedWindowPolicy, NotificationKind, WhatsAppSession};
pub use services::dispatcher::NotificationDispatcher;
pub use services::settings::NotificationSettingsService;
