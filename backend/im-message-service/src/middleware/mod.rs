pub mod auth;
pub mod error_handling;
pub mod guards;
pub mod internal_auth;
pub mod logging;

pub use auth::{JwtAuth, JwtKeys, UserId};
pub use guards::User;
pub use internal_auth::{InternalApiKey, INTERNAL_API_KEY_HEADER};
pub use logging::Logging;
