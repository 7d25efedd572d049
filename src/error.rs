// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::{
    models::group::WordEditError,
    payments::PaymentError,
    services::{
        checkout::CheckoutError, dictionary::DictionaryError, entitlement::Blocked, grader::GradeError,
    },
    store::StoreError,
};

/// Global Application Error Enum.
/// Maps domain failures onto HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden (content gate, purchase preconditions)
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (busy flow, already graded attempt)
    Conflict(String),

    // 502 Bad Gateway (payment provider, dictionary)
    BadGateway(String),

    // 504 Gateway Timeout (payment link never arrived)
    GatewayTimeout(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::BadGateway(msg) => {
                tracing::warn!("Upstream failure: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            AppError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::InternalServerError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<Blocked> for AppError {
    fn from(blocked: Blocked) -> Self {
        match blocked {
            Blocked::SignedOut => AppError::AuthError(blocked.message().to_string()),
            _ => AppError::Forbidden(blocked.message().to_string()),
        }
    }
}

impl From<GradeError> for AppError {
    fn from(err: GradeError) -> Self {
        match err {
            GradeError::UnknownQuestion(_) => AppError::BadRequest(err.to_string()),
            GradeError::SubmissionInProgress | GradeError::AlreadyGraded => AppError::Conflict(err.to_string()),
            GradeError::NoQuestions | GradeError::MalformedQuestion(_) => {
                AppError::InternalServerError(err.to_string())
            }
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Busy | CheckoutError::AlreadyStarted => AppError::Conflict(err.to_string()),
            CheckoutError::LinkTimeout(_) => AppError::GatewayTimeout(err.to_string()),
            CheckoutError::Rejected(_) | CheckoutError::Redirect(_) | CheckoutError::Portal(_) => {
                AppError::BadGateway(err.to_string())
            }
            CheckoutError::CreateSession(_) | CheckoutError::Watch(_) | CheckoutError::WatchClosed => {
                AppError::InternalServerError(err.to_string())
            }
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        AppError::BadGateway(err.to_string())
    }
}

impl From<DictionaryError> for AppError {
    fn from(err: DictionaryError) -> Self {
        match err {
            DictionaryError::EmptyWord => AppError::BadRequest(err.to_string()),
            DictionaryError::NotFound(_) => AppError::NotFound(err.to_string()),
            DictionaryError::Url(_) => AppError::BadRequest(err.to_string()),
            DictionaryError::Http(_) | DictionaryError::Status(_) => AppError::BadGateway(err.to_string()),
        }
    }
}

impl From<WordEditError> for AppError {
    fn from(err: WordEditError) -> Self {
        match err {
            WordEditError::Blank => AppError::BadRequest(err.to_string()),
            WordEditError::AlreadyExists => AppError::Conflict(err.to_string()),
            WordEditError::Missing(_) => AppError::NotFound(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
