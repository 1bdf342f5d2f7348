//! Credential verification collaborator.
//!
//! The connection entry point resolves a bearer token to a user id before
//! starting a pump. How tokens are issued and checked is up to the
//! implementation.

use chatwire_protocol::UserId;
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("Missing token")]
    MissingToken,

    /// The token was rejected.
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Resolves a bearer token to a user id.
pub trait TokenValidator: Send + Sync {
    /// Validate `token`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if the token is not acceptable.
    fn validate_token(&self, token: &str) -> Result<UserId, AuthError>;
}
