//! # Authentication
//!
//! Sign up, login and OAuth live with the identity provider. It hands the browser an
//! HS256 access token signed with the shared `JWT_SECRET`, which the client sends either as
//! `Authorization: Bearer <token>` or in the `sb-access-token` cookie.
//!
//! This module only verifies that token and turns it into an [`AuthUser`].
use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{error::AppError, models::Role, state::State};

pub const ACCESS_COOKIE: &str = "sb-access-token";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: u64,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

impl Claims {
    /// Role the identity provider recorded at sign up, if it is one we know.
    pub fn metadata_role(&self) -> Option<Role> {
        self.user_metadata.role.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub claims: Claims,
}

pub struct Keys {
    decoding: DecodingKey,
    validation: Validation,
}

impl Keys {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Provider tokens carry `aud: authenticated`, nothing else to check it against.
        validation.validate_aud = false;

        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!("Rejected token: {e}");
            AppError::Unauthorized("Invalid or expired session".into())
        })?;

        let id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| AppError::Unauthorized("Invalid session subject".into()))?;

        Ok(AuthUser {
            id,
            email: data.claims.email.clone(),
            claims: data.claims,
        })
    }
}

/// Signs claims with the shared secret. Used by tooling and tests, production tokens come
/// from the identity provider.
pub fn issue_token(secret: &str, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Bearer header first, then the session cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, value)| *name == ACCESS_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub fn authenticate(state: &State, headers: &HeaderMap) -> Result<AuthUser, AppError> {
    let token = token_from_headers(headers)
        .ok_or_else(|| AppError::Unauthorized("Unauthorized - No active session".into()))?;

    state.keys.verify(&token)
}

impl FromRequestParts<Arc<State>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<State>,
    ) -> Result<Self, Self::Rejection> {
        authenticate(state, &parts.headers)
    }
}
