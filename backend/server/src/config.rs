use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

const DEV_JWT_SECRET: &str = "insecure-development-secret";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: Option<String>,
    pub meili_url: Option<String>,
    pub meili_key: Option<String>,
    pub jwt_secret: String,
    pub catalog_path: String,
    pub catalog_url: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub anon_rate_per_minute: u32,
    pub user_rate_per_minute: u32,
    pub email_confirmation_per_minute: u32,
    pub email_sender: String,
    pub ws_path: String,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let access_minutes: u64 = try_load("ACCESS_TOKEN_MINUTES", "3")?;
        let refresh_days: u64 = try_load("REFRESH_TOKEN_DAYS", "5")?;

        Ok(Self {
            port: try_load("RUST_PORT", "8000")?,
            redis_url: optional("REDIS_URL"),
            meili_url: optional("MEILI_URL"),
            meili_key: optional("MEILI_ADMIN_KEY").or_else(|| read_secret("MEILI_ADMIN_KEY")),
            jwt_secret: optional("JWT_SECRET")
                .or_else(|| read_secret("JWT_SECRET"))
                .unwrap_or_else(|| {
                    warn!("JWT_SECRET not configured, using an insecure development secret");
                    DEV_JWT_SECRET.to_string()
                }),
            catalog_path: try_load("CATALOG_PATH", "catalog.json")?,
            catalog_url: optional("CATALOG_URL"),
            cors_allowed_origins: optional("CORS_ALLOWED_ORIGINS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            access_token_ttl: Duration::from_secs(access_minutes * 60),
            refresh_token_ttl: Duration::from_secs(refresh_days * 24 * 60 * 60),
            anon_rate_per_minute: try_load("ANON_RATE_PER_MINUTE", "60")?,
            user_rate_per_minute: try_load("USER_RATE_PER_MINUTE", "120")?,
            email_confirmation_per_minute: try_load("EMAIL_CONFIRMATION_PER_MINUTE", "3")?,
            email_sender: try_load("EMAIL_HOST_USER", "no-reply@shop.local")?,
            ws_path: try_load::<String>("WS_PATH", "ws")?.trim_matches('/').to_string(),
        })
    }

    /// Defaults only, nothing read from the environment.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            redis_url: None,
            meili_url: None,
            meili_key: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            catalog_path: String::new(),
            catalog_url: None,
            cors_allowed_origins: Vec::new(),
            access_token_ttl: Duration::from_secs(3 * 60),
            refresh_token_ttl: Duration::from_secs(5 * 24 * 60 * 60),
            anon_rate_per_minute: 10_000,
            user_rate_per_minute: 10_000,
            email_confirmation_per_minute: 3,
            email_sender: "no-reply@shop.local".to_string(),
            ws_path: "ws".to_string(),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key,
                message: e.to_string(),
            }
        })
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            info!("No {secret_name} secret file: {e}");
        })
        .ok()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
