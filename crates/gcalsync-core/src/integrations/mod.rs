pub mod credentials;
pub mod google;
pub mod oauth;
pub mod traits;

pub use credentials::StoreTokenBroker;
pub use google::GoogleCalendarGateway;
pub use oauth::{OAuthConfig, OAuthTokens};
pub use traits::{CalendarGateway, CredentialBroker};
