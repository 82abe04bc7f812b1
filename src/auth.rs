// ABOUTME: Caller identity resolution from bearer tokens
// ABOUTME: Defines the IdentityProvider contract and the HS256 JWT implementation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Authentication
//!
//! The turn pipeline only needs `{ user_id, role }` for the caller. Where that
//! comes from is behind [`IdentityProvider`]; the shipped implementation
//! verifies HS256 bearer tokens signed with the server secret.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::{Identity, UserRole};

/// Audience claim of tokens issued by this server
const TOKEN_AUDIENCE: &str = "colloquy";

/// Resolves the caller of a request
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the `Authorization` header value into an identity
    ///
    /// # Errors
    ///
    /// Returns `AUTH_REQUIRED` when no credentials are present and
    /// `AUTH_INVALID`/`AUTH_EXPIRED` when they cannot be verified
    async fn authenticate(&self, authorization: Option<&str>) -> AppResult<Identity>;
}

/// `JWT` claims for chat callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User `ID`
    pub sub: String,
    /// Account role
    pub role: UserRole,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
    /// Audience
    pub aud: String,
}

/// HS256 bearer token verifier and issuer
pub struct JwtIdentityProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiry_hours: i64,
}

impl JwtIdentityProvider {
    /// Create a provider from a shared secret
    #[must_use]
    pub fn new(secret: &[u8], expiry_hours: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[TOKEN_AUDIENCE]);
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            expiry_hours,
        }
    }

    /// Issue a signed token for `identity`
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be signed
    pub fn issue_token(&self, identity: &Identity) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: identity.user_id.clone(),
            role: identity.role,
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.expiry_hours)).timestamp(),
            aud: TOKEN_AUDIENCE.to_owned(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to sign token: {e}")))
    }

    /// Verify a raw token and return its claims
    ///
    /// # Errors
    ///
    /// Returns `AUTH_EXPIRED` for expired tokens and `AUTH_INVALID` otherwise
    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| convert_jwt_error(&e))
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn authenticate(&self, authorization: Option<&str>) -> AppResult<Identity> {
        let header = authorization.ok_or_else(AppError::auth_required)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::auth_invalid("Authorization header must use Bearer scheme"))?;

        let claims = self.verify(token.trim())?;
        debug!(user.id = %claims.sub, "Bearer token verified");
        Ok(Identity::new(claims.sub, claims.role))
    }
}

fn convert_jwt_error(error: &JwtError) -> AppError {
    match error.kind() {
        ErrorKind::ExpiredSignature => AppError::auth_expired(),
        ErrorKind::InvalidSignature => {
            AppError::auth_invalid("Token signature verification failed")
        }
        ErrorKind::InvalidAudience => AppError::auth_invalid("Token audience mismatch"),
        _ => AppError::auth_invalid(format!("Token validation failed: {error}")),
    }
}
