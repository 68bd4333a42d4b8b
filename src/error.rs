use crate::checks::CheckKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors (fatal at construction)
    #[error("configuration error: {0}")]
    Config(String),

    // Cookie codec errors
    #[error("invalid cookie attribute: {0}")]
    InvalidCookie(String),

    // Security check errors (surfaced as request-level errors)
    #[error("missing {0} check")]
    MissingCheck(CheckKind),
    #[error("invalid {0} check")]
    InvalidCheck(CheckKind),

    // Provider protocol errors
    #[error("provider error: {0}")]
    Provider(String),

    // Token cipher errors: callers treat this as "no session"
    #[error("token decode failed")]
    Decode,

    // Network errors
    #[error("network error: {0}")]
    Network(String),

    // Generic errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error means "the token was absent or unusable" rather
    /// than a protocol violation. Session decoding failures fall here.
    pub fn is_benign_decode(&self) -> bool {
        matches!(self, Error::Decode)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(e.to_string())
    }
}
