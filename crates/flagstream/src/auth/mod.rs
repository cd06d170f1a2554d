pub mod authenticator;
pub mod error;
pub mod jwt;

pub use authenticator::{AuthResult, PushTokenProvider, StreamAuthenticator};
pub use error::AuthError;
pub use jwt::AuthToken;
