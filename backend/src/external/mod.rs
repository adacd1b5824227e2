//! External collaborator adapters

pub mod reasoning;
pub mod warnings;
pub mod weather;
pub mod webhook;

pub use reasoning::ReasoningClient;
pub use warnings::WarningFeedClient;
pub use weather::OpenWeatherClient;
pub use webhook::WebhookNotifier;
