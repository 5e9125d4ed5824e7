use std::num::NonZeroU32;

use axum::http::HeaderMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::info;

use crate::{auth::AuthUser, error::AppError, models::UserId};

fn per_minute(rate: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(rate).unwrap_or(NonZeroU32::MIN))
}

/// Keyed token buckets for the public catalog and for email confirmation.
pub struct Throttle {
    anonymous: DefaultKeyedRateLimiter<String>,
    users: DefaultKeyedRateLimiter<UserId>,
    email_confirmation: DefaultKeyedRateLimiter<String>,
}

impl Throttle {
    pub fn new(anon_per_minute: u32, user_per_minute: u32, email_per_minute: u32) -> Self {
        Self {
            anonymous: RateLimiter::keyed(per_minute(anon_per_minute)),
            users: RateLimiter::keyed(per_minute(user_per_minute)),
            email_confirmation: RateLimiter::keyed(per_minute(email_per_minute)),
        }
    }

    /// Authenticated callers spend their own bucket, everyone else shares one per client address.
    pub fn check_catalog(&self, user: Option<&AuthUser>, headers: &HeaderMap) -> Result<(), AppError> {
        let allowed = match user {
            Some(user) => self.users.check_key(&user.id).is_ok(),
            None => self.anonymous.check_key(&client_address(headers)).is_ok(),
        };

        if !allowed {
            info!("Catalog request throttled");
            return Err(AppError::Throttled);
        }

        Ok(())
    }

    pub fn check_email_confirmation(&self, email: &str) -> Result<(), AppError> {
        self.email_confirmation
            .check_key(&email.to_lowercase())
            .map_err(|_| {
                info!(email, "Email confirmation throttled");
                AppError::Throttled
            })
    }
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`.
pub fn client_address(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
