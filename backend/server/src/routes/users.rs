use std::sync::{Arc, LazyLock};

use axum::{
    Json,
    extract::{State as AxumState, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse},
};
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::{
    auth::{REFRESH_COOKIE, TokenKind, cleared_cookies, hash_password, read_cookie, verify_password},
    cache::{get_json, invalidate, keys, set_json},
    error::AppError,
    models::UserId,
    state::State,
    store::users::NewUser,
    tasks::Email,
};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());
static PHONE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+?[0-9]{9,15}$").unwrap());

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_AGE: i64 = 18;

pub(crate) fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    if !EMAIL.is_match(&email) {
        return Err(AppError::validation("Enter a valid email address."));
    }
    Ok(email)
}

pub(crate) fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation("Password must be at least 8 characters long."));
    }
    Ok(())
}

pub(crate) fn validate_age(age: i64) -> Result<u8, AppError> {
    if !(MIN_AGE..=150).contains(&age) {
        return Err(AppError::validation("Age must be 18 or above."));
    }
    Ok(age as u8)
}

pub(crate) fn normalize_phone(phone: &str) -> Result<String, AppError> {
    let phone: String = phone.chars().filter(|c| !matches!(c, ' ' | '-' | '(' | ')')).collect();
    if !PHONE.is_match(&phone) {
        return Err(AppError::validation("Enter a valid phone number."));
    }
    Ok(phone)
}

pub(crate) fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AppError::validation("Full name must be between 1 and 100 characters."));
    }
    Ok(name.to_string())
}

fn six_digit_code() -> String {
    rand::rng().random_range(100_000..=999_999).to_string()
}

fn mail_to(state: &State, to: &str, subject: &str, body: String) -> Email {
    Email {
        from: state.config.email_sender.clone(),
        to: to.to_string(),
        subject: subject.to_string(),
        body,
    }
}

/// Issues a fresh token pair and wraps `body` with the session cookies.
fn with_session(
    state: &State,
    user: UserId,
    status: StatusCode,
    body: Value,
) -> Result<impl IntoResponse + use<>, AppError> {
    let pair = state.jwt.issue_pair(user)?;
    let [access, refresh] = state.jwt.session_cookies(&pair)?;

    Ok((
        status,
        AppendHeaders([(SET_COOKIE, access), (SET_COOKIE, refresh)]),
        Json(body),
    ))
}

async fn revoke(state: &State, jti: &str, remaining: std::time::Duration) {
    set_json(state.cache.as_ref(), &keys::revoked_token(jti), &true, remaining).await;
}

#[derive(Deserialize)]
pub struct EmailConfirmationRequest {
    email: Option<String>,
    code: Option<String>,
}

pub async fn email_confirmation_handler(
    AxumState(state): AxumState<Arc<State>>,
    payload: Result<Json<EmailConfirmationRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(payload) = payload?;

    let Some(raw_email) = payload.email.filter(|e| !e.trim().is_empty()) else {
        warn!("Email is missing in email confirmation request");
        return Err(AppError::validation("Email is required."));
    };
    let email = normalize_email(&raw_email)?;

    state.throttle.check_email_confirmation(&email)?;

    if state.store.read().user_by_email(&email).is_some() {
        info!(email = %email, "Already registered email asked for a confirmation code");
        return Err(AppError::validation("You are already registered."));
    }

    let code_key = keys::email_code(&email);

    let Some(code) = payload.code.filter(|c| !c.trim().is_empty()) else {
        let generated = six_digit_code();
        let message = email_message(&state, &email, &generated);

        if let Err(e) = state.mailer.send(message).await {
            error!(email = %email, "Failed to send confirmation email: {e}");
            return Err(AppError::internal(e.to_string()));
        }

        set_json(state.cache.as_ref(), &code_key, &generated, keys::EMAIL_CODE_TTL).await;
        info!(email = %email, "Confirmation code sent");

        return Ok(Json(json!({ "detail": "Confirmation code sent to email." })));
    };

    let Some(cached) = get_json::<String>(state.cache.as_ref(), &code_key).await else {
        warn!(email = %email, "Expired or missing confirmation code");
        return Err(AppError::validation("Confirmation code expired. Please request a new one."));
    };

    if code.trim() != cached {
        warn!(email = %email, "Invalid confirmation code attempt");
        return Err(AppError::validation("Invalid confirmation code."));
    }

    set_json(
        state.cache.as_ref(),
        &keys::email_confirmed(&email),
        &true,
        keys::EMAIL_CONFIRMED_TTL,
    )
    .await;
    invalidate(state.cache.as_ref(), &code_key).await;
    info!(email = %email, "Email confirmed");

    Ok(Json(json!({ "detail": "Email confirmed." })))
}

fn email_message(state: &State, to: &str, code: &str) -> Email {
    mail_to(
        state,
        to,
        "Your Confirmation Code",
        format!(
            "Hello,\n\nYour confirmation code is: {code}\n\n\
             Please enter this code within the next 60 seconds to confirm your email.\n\
             If you did not request this, please ignore this email."
        ),
    )
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    email: String,
    password: String,
    full_username: String,
    age: i64,
    city: String,
    phone_number: String,
    avatar: Option<String>,
}

pub async fn register_handler(
    AxumState(state): AxumState<Arc<State>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;

    let email = normalize_email(&payload.email)?;
    let confirmed = get_json::<bool>(state.cache.as_ref(), &keys::email_confirmed(&email)).await;
    if confirmed != Some(true) {
        warn!(email = %email, "Registration attempt with unconfirmed email");
        return Err(AppError::validation(
            "Email not confirmed. Please confirm your email before registering.",
        ));
    }

    validate_password(&payload.password)?;
    let age = validate_age(payload.age)?;
    let phone_number = normalize_phone(&payload.phone_number)?;
    let full_username = validate_name(&payload.full_username)?;
    if payload.city.trim().is_empty() {
        return Err(AppError::validation("City is required."));
    }

    let user = state.store.create_user(NewUser {
        email: email.clone(),
        password_hash: hash_password(&payload.password)?,
        full_username,
        avatar: payload.avatar.filter(|a| !a.trim().is_empty()),
        age,
        city: payload.city.trim().to_string(),
        phone_number,
        is_staff: false,
    })?;

    invalidate(state.cache.as_ref(), &keys::email_confirmed(&email)).await;
    info!(user_id = %user.id, email = %email, "User registered");

    with_session(
        &state,
        user.id,
        StatusCode::CREATED,
        json!({ "message": "User registered successfully" }),
    )
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

pub async fn login_handler(
    AxumState(state): AxumState<Arc<State>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;

    let user_id = {
        let tables = state.store.read();
        let user = tables
            .user_by_email(&payload.email)
            .ok_or_else(AppError::invalid_credentials)?;

        let hash = user.password_hash.as_deref().ok_or_else(AppError::invalid_credentials)?;
        if !verify_password(&payload.password, hash) {
            return Err(AppError::invalid_credentials());
        }

        user.id
    };

    info!(user_id = %user_id, "User logged in");

    with_session(&state, user_id, StatusCode::OK, json!({ "detail": "Login successful." }))
}

pub async fn logout_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(token) = read_cookie(&headers, REFRESH_COOKIE) {
        if let Ok(claims) = state.jwt.verify(&token, TokenKind::Refresh) {
            revoke(&state, &claims.jti, claims.remaining()).await;
            info!(user_id = %claims.sub, "User logged out");
        }
    }

    let [access, refresh] = cleared_cookies();

    (
        StatusCode::OK,
        AppendHeaders([(SET_COOKIE, access), (SET_COOKIE, refresh)]),
        Json(json!({ "detail": "Logged out." })),
    )
}

pub async fn refresh_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = read_cookie(&headers, REFRESH_COOKIE).ok_or_else(AppError::invalid_token)?;
    let claims = state
        .jwt
        .verify(&token, TokenKind::Refresh)
        .map_err(|_| AppError::invalid_token())?;

    let revoked = get_json::<bool>(state.cache.as_ref(), &keys::revoked_token(&claims.jti)).await;
    if revoked.is_some() {
        warn!(user_id = %claims.sub, "Revoked refresh token presented");
        return Err(AppError::invalid_token());
    }
    if state.store.read().user(claims.sub).is_none() {
        return Err(AppError::invalid_token());
    }

    revoke(&state, &claims.jti, claims.remaining()).await;

    with_session(&state, claims.sub, StatusCode::OK, json!({ "detail": "Token refreshed." }))
}

#[derive(Deserialize)]
pub struct ResetRequest {
    email: String,
}

pub async fn reset_password_request_handler(
    AxumState(state): AxumState<Arc<State>>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(payload) = payload?;
    let email = payload.email.trim().to_lowercase();

    let known = state.store.read().user_by_email(&email).is_some();
    if known {
        let code = six_digit_code();
        set_json(state.cache.as_ref(), &keys::password_reset(&email), &code, keys::PASSWORD_RESET_TTL).await;

        let message = mail_to(
            &state,
            &email,
            "Password Reset Code",
            format!(
                "Hello,\n\nYour password reset code is: {code}\n\n\
                 It is valid for 10 minutes.\n\
                 If you did not request this, please ignore this email."
            ),
        );
        if let Err(e) = state.mailer.send(message).await {
            warn!(email = %email, "Failed to send password reset email: {e}");
        }
    }

    Ok(Json(json!({
        "detail": "If the email is registered, a reset code has been sent."
    })))
}

#[derive(Deserialize)]
pub struct ResetConfirm {
    email: String,
    code: String,
    new_password: String,
}

pub async fn reset_password_confirm_handler(
    AxumState(state): AxumState<Arc<State>>,
    payload: Result<Json<ResetConfirm>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(payload) = payload?;
    let email = payload.email.trim().to_lowercase();
    let key = keys::password_reset(&email);

    let cached = get_json::<String>(state.cache.as_ref(), &key).await;
    if cached.as_deref() != Some(payload.code.trim()) {
        return Err(AppError::validation("Invalid or expired reset code."));
    }

    validate_password(&payload.new_password)?;

    let user_id = state
        .store
        .read()
        .user_by_email(&email)
        .map(|u| u.id)
        .ok_or_else(|| AppError::validation("Invalid or expired reset code."))?;

    state
        .store
        .set_password(user_id, hash_password(&payload.new_password)?)?;
    invalidate(state.cache.as_ref(), &key).await;
    info!(user_id = %user_id, "Password reset");

    Ok(Json(json!({ "detail": "Password has been reset." })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_validation() {
        assert_eq!(normalize_email(" Ada@Example.COM ").unwrap(), "ada@example.com");
        assert!(normalize_email("not-an-email").is_err());

        assert_eq!(normalize_phone("+995 555-123-456").unwrap(), "+995555123456");
        assert!(normalize_phone("12ab").is_err());

        assert!(validate_age(17).is_err());
        assert_eq!(validate_age(18).unwrap(), 18);

        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }

    #[test]
    fn codes_have_six_digits() {
        for _ in 0..100 {
            let code = six_digit_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
