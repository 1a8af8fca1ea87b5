use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::TokenError;
use crate::store::{with_timeout, CredentialStore};

pub const TOKEN_SUBJECT: &str = "login";
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub jti: String,  // Random token id
    pub iat: i64,     // Issued at
    pub nbf: i64,     // Not before, equal to iat
    pub exp: i64,     // Expiration time
    pub aud: String,  // Username
    pub iss: String,
    pub sub: String,
}

/// Issues and verifies HS256 bearer tokens.
///
/// Tokens are not revocable; they stop verifying at expiry or as soon as
/// their audience no longer exists in the credential store.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
    store: Arc<dyn CredentialStore>,
    store_timeout: StdDuration,
}

impl TokenService {
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        ttl: Duration,
        store: Arc<dyn CredentialStore>,
        store_timeout: StdDuration,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl,
            store,
            store_timeout,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, username: &str) -> Result<String, TokenError> {
        self.issue_at(username, Utc::now())
    }

    pub fn issue_at(&self, username: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let issued = now.timestamp();
        let claims = Claims {
            jti: Uuid::new_v4().simple().to_string(),
            iat: issued,
            nbf: issued,
            exp: (now + self.ttl).timestamp(),
            aud: username.to_string(),
            iss: self.issuer.clone(),
            sub: TOKEN_SUBJECT.to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    pub async fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now()).await
    }

    /// Full verification: signature, validity window at `now`, then a
    /// liveness check of the audience against the credential store.
    pub async fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let claims = self.decode_at(token, now)?;

        let exists = with_timeout(self.store_timeout, self.store.user_exists(&claims.aud)).await?;
        if !exists {
            return Err(TokenError::UnknownAudience(claims.aud));
        }
        Ok(claims)
    }

    /// Signature and time checks only, without consulting the store.
    pub fn decode_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation()).map_err(|e| {
            debug!("token decoding failed: {}", e);
            match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::ImmatureSignature => TokenError::NotYetValid,
                _ => TokenError::MalformedToken(e.to_string()),
            }
        })?;
        let claims = data.claims;

        if claims.iss != self.issuer || claims.sub != TOKEN_SUBJECT {
            return Err(TokenError::MalformedToken("unexpected issuer or subject".into()));
        }
        if claims.exp <= claims.nbf || claims.nbf < claims.iat {
            return Err(TokenError::MalformedToken("inconsistent validity window".into()));
        }

        let now = now.timestamp();
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn validation(&self) -> Validation {
        // Only HS256 is accepted; the window is checked against the caller's clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "nbf", "aud", "iss", "sub"]);
        validation
    }
}
