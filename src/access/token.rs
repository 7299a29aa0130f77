//! Session tokens
//!
//! Stateless HS256 tokens carrying the user's identity. There is no revocation
//! list: a token stays valid until it expires.
//!
//! Security notes:
//! - Validity is fixed at 24 hours from issuance
//! - A bad signature and an expired token are reported the same way

use crate::config::TOKEN_VALIDITY;
use crate::Result;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Authenticated user, as carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            user_id: username.clone(),
            username,
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}

/// Payload stored in the token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
            avatar_url: claims.avatar_url,
        }
    }
}

/// Issues and verifies session tokens
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    validity: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            validity: TOKEN_VALIDITY,
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Sign a token for `identity`, valid from now
    pub fn issue_token(&self, identity: &Identity) -> Result<String> {
        self.issue_token_at(identity, Utc::now())
    }

    /// Sign a token as if issued at `issued_at`
    pub fn issue_token_at(&self, identity: &Identity, issued_at: DateTime<Utc>) -> Result<String> {
        let iat = issued_at.timestamp();
        let claims = Claims {
            sub: identity.user_id.clone(),
            username: identity.username.clone(),
            avatar_url: identity.avatar_url.clone(),
            iat,
            exp: iat + self.validity.as_secs() as i64,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Claims of a correctly signed token, expired or not
    pub fn decode_claims(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked by the caller against its own clock
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )?;
        Ok(data.claims)
    }

    /// Identity carried by `token`, or `None` if it is forged, malformed or expired
    pub fn verify_token(&self, token: &str) -> Option<Identity> {
        self.verify_token_at(token, Utc::now())
    }

    pub fn verify_token_at(&self, token: &str, now: DateTime<Utc>) -> Option<Identity> {
        let claims = match self.decode_claims(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!("Rejected session token: {}", e);
                return None;
            }
        };

        if claims.exp < now.timestamp() {
            tracing::debug!(username = %claims.username, "Session token expired");
            return None;
        }

        Some(claims.into())
    }
}
