use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid streaming token: {0}")]
    InvalidToken(&'static str),
    #[error("authentication endpoint rejected the credentials")]
    Denied,
    #[error("auth configuration error: {0}")]
    Config(String),
    #[error("auth endpoint error: {0}")]
    Endpoint(String),
    #[error("auth transport error: {0}")]
    Http(#[from] reqwest::Error),
}
