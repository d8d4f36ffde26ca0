//! Session token issue/verify for Nova services
//!
//! Tokens are HS256 JWTs signed with a secret shared with the identity
//! provider. The `sub` claim carries the user id; services never look at
//! anything else to decide who the caller is.
//!
//! ## Usage
//!
//! ```rust
//! use crypto_core::jwt::SessionTokens;
//! use uuid::Uuid;
//!
//! let tokens = SessionTokens::from_secret("a-long-shared-secret-value").unwrap();
//! let user_id = Uuid::new_v4();
//! let token = tokens.issue(user_id).unwrap();
//! assert_eq!(tokens.user_id(&token).unwrap(), user_id);
//! ```

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, TokenData,
    Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;
const MIN_SECRET_LEN: usize = 16;

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("signing secret is too short")]
    WeakSecret,

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("invalid subject claim: {0}")]
    MalformedSubject(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// JWT claims issued by the identity provider
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Signing and verification keys plus validation rules
#[derive(Clone)]
pub struct SessionTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    audience: Option<String>,
    ttl: Duration,
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("secret", &"[REDACTED]")
            .field("audience", &self.audience)
            .field("ttl_secs", &self.ttl.num_seconds())
            .finish()
    }
}

impl SessionTokens {
    pub fn from_secret(secret: &str) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::WeakSecret);
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            audience: None,
            ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        })
    }

    /// Require (and stamp) an `aud` claim
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a token for `user_id`, valid for the configured TTL
    pub fn issue(&self, user_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            aud: self.audience.clone(),
            role: Some("authenticated".to_string()),
        };
        self.encode_claims(&claims)
    }

    pub fn encode_claims(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(JWT_ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Validate signature, expiry and (if configured) audience
    pub fn validate(&self, token: &str) -> Result<TokenData<Claims>, TokenError> {
        let mut validation = Validation::new(JWT_ALGORITHM);
        match &self.audience {
            Some(aud) => {
                validation.set_audience(&[aud.as_str()]);
                // A token without `aud` would otherwise skip the audience check
                validation.set_required_spec_claims(&["exp", "aud"]);
            }
            None => validation.validate_aud = false,
        }

        decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e.to_string()),
        })
    }

    /// Validate `token` and return the user id in its subject
    pub fn user_id(&self, token: &str) -> Result<Uuid, TokenError> {
        let data = self.validate(token)?;
        Uuid::parse_str(&data.claims.sub).map_err(|e| TokenError::MalformedSubject(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret-0123456789";

    #[test]
    fn test_issue_and_validate() {
        let tokens = SessionTokens::from_secret(SECRET).unwrap();
        let user_id = Uuid::new_v4();

        let token = tokens.issue(user_id).unwrap();
        assert_eq!(tokens.user_id(&token).unwrap(), user_id);
    }

    #[test]
    fn test_rejects_short_secret() {
        assert_eq!(
            SessionTokens::from_secret("short").unwrap_err(),
            TokenError::WeakSecret
        );
    }

    #[test]
    fn test_rejects_other_secret() {
        let issuer = SessionTokens::from_secret(SECRET).unwrap();
        let verifier = SessionTokens::from_secret("another-secret-0123456789").unwrap();

        let token = issuer.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(verifier.validate(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_expired_token() {
        let tokens = SessionTokens::from_secret(SECRET).unwrap();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            iat: now - 7200,
            exp: now - 3600,
            aud: None,
            role: None,
        };

        let token = tokens.encode_claims(&claims).unwrap();
        assert_eq!(tokens.validate(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn test_audience_enforced() {
        let tokens = SessionTokens::from_secret(SECRET)
            .unwrap()
            .with_audience("authenticated");
        let plain = SessionTokens::from_secret(SECRET).unwrap();

        let good = tokens.issue(Uuid::new_v4()).unwrap();
        assert!(tokens.validate(&good).is_ok());

        let missing_aud = plain.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(
            tokens.validate(&missing_aud),
            Err(TokenError::Invalid(_))
        ));

        let other = SessionTokens::from_secret(SECRET)
            .unwrap()
            .with_audience("service-role");
        let wrong_aud = other.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(
            tokens.validate(&wrong_aud),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_subject() {
        let tokens = SessionTokens::from_secret(SECRET).unwrap();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "not-a-uuid".to_string(),
            iat: now,
            exp: now + 60,
            aud: None,
            role: None,
        };

        let token = tokens.encode_claims(&claims).unwrap();
        assert!(matches!(
            tokens.user_id(&token),
            Err(TokenError::MalformedSubject(_))
        ));
    }
}
