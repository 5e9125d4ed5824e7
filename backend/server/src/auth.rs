//! # Auth
//!
//! Argon2 password hashes and HS256 JWT pairs carried in `HttpOnly` cookies.
//!
//! - Access tokens are short lived and checked on every authenticated request
//! - Refresh tokens are rotated on use; the spent `jti` is parked in the cache until it would have expired
//! - A Bearer header is accepted in place of the access cookie
use std::{sync::Arc, time::Duration};

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use axum::{
    extract::FromRequestParts,
    http::{
        HeaderMap, HeaderValue,
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
};
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, models::UserId, state::State};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| AppError::internal(format!("Salt generation failed: {e}")))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::internal(format!("Password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub kind: TokenKind,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    /// Seconds left before expiry, never negative.
    pub fn remaining(&self) -> Duration {
        Duration::from_secs((self.exp - Utc::now().timestamp()).max(0) as u64)
    }
}

pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::internal(format!("Token signing failed: {e}")))
    }

    pub fn issue(&self, user: UserId, kind: TokenKind) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };

        self.sign(&Claims {
            sub: user,
            kind,
            jti: Uuid::new_v4().simple().to_string(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
        })
    }

    pub fn issue_pair(&self, user: UserId) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access: self.issue(user, TokenKind::Access)?,
            refresh: self.issue(user, TokenKind::Refresh)?,
        })
    }

    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::token_expired(),
                _ => AppError::invalid_token(),
            })?
            .claims;

        if claims.kind != kind {
            return Err(AppError::invalid_token());
        }

        Ok(claims)
    }

    /// `Set-Cookie` values for a freshly issued pair.
    pub fn session_cookies(&self, pair: &TokenPair) -> Result<[HeaderValue; 2], AppError> {
        Ok([
            cookie(ACCESS_COOKIE, &pair.access, self.access_ttl)?,
            cookie(REFRESH_COOKIE, &pair.refresh, self.refresh_ttl)?,
        ])
    }
}

fn cookie(name: &str, value: &str, max_age: Duration) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(&format!(
        "{name}={value}; Max-Age={}; Path=/; HttpOnly; Secure; SameSite=Lax",
        max_age.as_secs()
    ))
    .map_err(|e| AppError::internal(format!("Invalid cookie value: {e}")))
}

pub fn cleared_cookies() -> [HeaderValue; 2] {
    [ACCESS_COOKIE, REFRESH_COOKIE].map(|name| {
        HeaderValue::from_str(&format!(
            "{name}=; Max-Age=0; Path=/; HttpOnly; Secure; SameSite=Lax"
        ))
        .unwrap_or_else(|_| HeaderValue::from_static(""))
    })
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

/// Access token from the cookie, or from an `Authorization: Bearer` header.
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    read_cookie(headers, ACCESS_COOKIE).or_else(|| bearer(headers))
}

#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: UserId,
    pub is_staff: bool,
}

impl AuthUser {
    pub fn from_headers(headers: &HeaderMap, state: &State) -> Result<Self, AppError> {
        let token = access_token(headers).ok_or(AppError::Unauthorized {
            code: "not_authenticated",
            message: "Authentication credentials were not provided.",
        })?;
        let claims = state.jwt.verify(&token, TokenKind::Access)?;

        let tables = state.store.read();
        let user = tables.user(claims.sub).ok_or_else(AppError::invalid_token)?;

        Ok(Self {
            id: user.id,
            is_staff: user.is_staff,
        })
    }
}

impl FromRequestParts<Arc<State>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<State>) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers, state)
    }
}

/// The caller if they sent a valid access token, anonymous otherwise.
pub struct MaybeUser(pub Option<AuthUser>);

impl FromRequestParts<Arc<State>> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<State>) -> Result<Self, Self::Rejection> {
        Ok(Self(AuthUser::from_headers(&parts.headers, state).ok()))
    }
}
