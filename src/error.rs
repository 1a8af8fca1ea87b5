use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;
use std::time::Duration;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Token error: {0}")]
    TokenError(#[from] TokenError),

    #[error("Credential store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = self.to_string();
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "message": message
            }
        });
        HttpResponse::build(status)
            .insert_header(("Cache-Control", "no-store"))
            .json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(e) => match e {
                AuthError::Blocked => StatusCode::UNAUTHORIZED,
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::Store(store) => store_status(store),
                AuthError::Token(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::TokenError(_) => StatusCode::BAD_REQUEST,
            AppError::StoreError(e) => store_status(e),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Failures of the login state machine.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("too many failed attempts")]
    Blocked,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("credential store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("failed to issue token: {0}")]
    Token(#[from] TokenError),
}

/// Reasons a bearer token is rejected. The verify endpoint collapses all of
/// them to a 400, they stay distinct for logs and tests.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("unknown audience: {0}")]
    UnknownAudience(String),

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("failed to sign token: {0}")]
    Encoding(String),

    #[error("audience lookup failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}
