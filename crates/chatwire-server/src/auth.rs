//! HS256 JWT token validation.
//!
//! Tokens carry `{user_id, exp}` claims. The core only needs
//! [`TokenValidator`]; issuing lives here for local tooling and tests.

use chatwire_core::{AuthError, TokenValidator};
use chatwire_protocol::UserId;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Lifetime of tokens created by [`JwtValidator::issue_token`].
pub const TOKEN_LIFETIME_HOURS: i64 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: UserId,
    exp: i64,
}

/// Validates (and issues) HS256 tokens signed with a shared secret.
#[derive(Clone)]
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Create a validator for `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Issue a token for `user_id` valid for [`TOKEN_LIFETIME_HOURS`].
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn issue_token(&self, user_id: UserId) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_token_with_ttl(user_id, Duration::hours(TOKEN_LIFETIME_HOURS))
    }

    /// Issue a token for `user_id` expiring after `ttl`. A negative `ttl`
    /// yields an already-expired token.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn issue_token_with_ttl(
        &self,
        user_id: UserId,
        ttl: Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            user_id,
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }
}

impl TokenValidator for JwtValidator {
    fn validate_token(&self, token: &str) -> Result<UserId, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims.user_id)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_validate() {
        let validator = JwtValidator::new("secret");
        let token = validator.issue_token(42).unwrap();
        assert_eq!(validator.validate_token(&token).unwrap(), 42);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = JwtValidator::new("one").issue_token(42).unwrap();
        let result = JwtValidator::new("two").validate_token(&token);
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let validator = JwtValidator::new("secret");
        let token = validator
            .issue_token_with_ttl(42, Duration::hours(-1))
            .unwrap();
        assert!(matches!(
            validator.validate_token(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_token_without_user_id_rejected() {
        #[derive(Serialize)]
        struct Partial {
            exp: i64,
        }

        let token = encode(
            &Header::new(Algorithm::HS256),
            &Partial {
                exp: (Utc::now() + Duration::hours(1)).timestamp(),
            },
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(JwtValidator::new("secret").validate_token(&token).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let validator = JwtValidator::new("secret");
        assert!(validator.validate_token("not-a-token").is_err());
        assert!(validator.validate_token("").is_err());
    }
}
