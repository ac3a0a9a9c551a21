use hyper::StatusCode;
use tracing::error;

use super::responses::json_response;
use super::HttpResponse;
use crate::auth::{CreateUserError, PasswordError};
use crate::metastore::StoreError;

pub const NOT_SIGNED_IN: &str = "You are not signed in.";
pub const INVALID_CREDENTIALS: &str = "Invalid credentials.";
pub const EMAIL_TAKEN: &str = "Email already used.";

/// Errors a request handler can end in
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation failed.")]
    Validation { details: String },
    #[error("{0}")]
    Conflict(&'static str),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("Not Found")]
    NotFound,
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("Request body too large.")]
    PayloadTooLarge,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Password(#[from] PasswordError),
}

impl ApiError {
    pub fn validation(details: impl Into<String>) -> Self {
        Self::Validation {
            details: details.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Store(_) | Self::Password(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Renders the error as a JSON body with a `message` field.
    ///
    /// Internal failures are logged here and reach the client only as a generic message.
    pub fn into_response(self) -> HttpResponse {
        let status = self.status();
        match self {
            Self::Validation { details } => json_response(
                status,
                &serde_json::json!({ "message": "Validation failed.", "details": details }),
            ),
            Self::Store(_) | Self::Password(_) => {
                error!(error = %self, "Request failed");
                json_response(status, &serde_json::json!({ "message": "Internal server error." }))
            }
            other => json_response(status, &serde_json::json!({ "message": other.to_string() })),
        }
    }
}

impl From<CreateUserError> for ApiError {
    fn from(err: CreateUserError) -> Self {
        match err {
            CreateUserError::EmailTaken(_) => Self::Conflict(EMAIL_TAKEN),
            CreateUserError::Store(e) => Self::Store(e),
        }
    }
}
