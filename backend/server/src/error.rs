use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Unauthorized { code: &'static str, message: &'static str },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Request was throttled. Try again later.")]
    Throttled,

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        let message: String = message.into();
        AppError::InternalError(message.into())
    }

    pub fn token_expired() -> Self {
        AppError::Unauthorized {
            code: "token_expired",
            message: "Access token expired. Please refresh your session.",
        }
    }

    pub fn invalid_token() -> Self {
        AppError::Unauthorized {
            code: "invalid_token",
            message: "Invalid or expired token. Please log in again.",
        }
    }

    pub fn invalid_credentials() -> Self {
        AppError::Unauthorized {
            code: "invalid_credentials",
            message: "Invalid email or password.",
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::MalformedPayload => "malformed_payload",
            AppError::Validation(_) => "invalid",
            AppError::Unauthorized { code, .. } => code,
            AppError::Forbidden(_) => "permission_denied",
            AppError::NotFound(_) => "not_found",
            AppError::Throttled => "throttled",
            AppError::InternalError(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MalformedPayload | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Throttled => StatusCode::TOO_MANY_REQUESTS,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let detail = match &self {
            AppError::InternalError(e) => {
                tracing::error!("Internal error: {e}");
                "An internal error occurred. Please try again later.".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "detail": detail, "code": self.code() }))).into_response()
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(_: axum::extract::rejection::JsonRejection) -> Self {
        AppError::MalformedPayload
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(_: axum::extract::rejection::QueryRejection) -> Self {
        AppError::MalformedPayload
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use serde_json::Value;

    use super::*;

    async fn render(error: AppError) -> (StatusCode, Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn every_variant_maps_to_status_and_code() {
        let cases = [
            (AppError::MalformedPayload, StatusCode::BAD_REQUEST, "malformed_payload"),
            (AppError::validation("Bad"), StatusCode::BAD_REQUEST, "invalid"),
            (AppError::token_expired(), StatusCode::UNAUTHORIZED, "token_expired"),
            (AppError::forbidden("No"), StatusCode::FORBIDDEN, "permission_denied"),
            (AppError::not_found("Gone"), StatusCode::NOT_FOUND, "not_found"),
            (AppError::Throttled, StatusCode::TOO_MANY_REQUESTS, "throttled"),
            (AppError::internal("db down"), StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        ];

        for (error, status, code) in cases {
            let (actual, body) = render(error).await;
            assert_eq!(actual, status);
            assert_eq!(body["code"], code);
        }
    }

    #[tokio::test]
    async fn internal_detail_is_not_leaked() {
        let (_, body) = render(AppError::internal("redis at 10.0.0.3 refused")).await;

        assert_eq!(body["detail"], "An internal error occurred. Please try again later.");
    }
}
