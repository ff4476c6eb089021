//! Handshake authentication.
//!
//! Every WebSocket upgrade carries a bearer token (query `token` or an
//! `Authorization: Bearer` header). The token is an HS256 JWT issued by the
//! users service; the relay only verifies it. A connection that fails here
//! receives `SERVER:UNAUTHORIZED` and is closed before it touches the hub,
//! the session store or any room.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use murmur_shared::constants::DEFAULT_LOCALE;
use murmur_shared::UserId;

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Query parameters of the WebSocket upgrade request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Handshake {
    pub token: Option<String>,
    pub user_id: Option<UserId>,
    pub user_name: Option<String>,
    pub locale: Option<String>,
    pub brand_variation: Option<String>,
    pub platform: Option<String>,
}

impl Handshake {
    pub fn locale(&self) -> String {
        self.locale
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(DEFAULT_LOCALE)
            .to_string()
    }
}

/// Claims of a users-service token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub id: UserId,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub access_levels: Vec<String>,
    pub exp: u64,
}

/// Who is behind an authenticated connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: UserId,
    pub user_name: Option<String>,
    pub access_levels: Vec<String>,
    /// Raw bearer token, forwarded to collaborators.
    pub token: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("Missing bearer token")]
    Missing,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Malformed token: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Authenticator {
    key: DecodingKey,
    validation: Validation,
}

impl Authenticator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify the handshake token. `header` is the raw `Authorization`
    /// value, used when the query carries no token.
    pub fn authenticate(
        &self,
        handshake: &Handshake,
        header: Option<&str>,
    ) -> Result<Identity, AuthError> {
        let token = handshake
            .token
            .as_deref()
            .or_else(|| header.and_then(|h| h.strip_prefix("Bearer ")))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Missing)?;

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::Malformed(e.to_string()),
            }
        })?;
        let claims = data.claims;

        debug!(user = %claims.id, "Handshake token verified");

        Ok(Identity {
            user_id: claims.id,
            user_name: claims.user_name.or_else(|| handshake.user_name.clone()),
            access_levels: claims.access_levels,
            token: token.to_string(),
        })
    }
}
