pub mod dispatcher;
pub mod gateways;
pub mod reminders;
pub mod settings;

pub use dispatcher::NotificationDispatcher;
pub use settings::NotificationSettingsService;
