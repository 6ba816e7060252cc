use std::fmt;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    BadRequest,
    Forbidden,
    InternalServerError,
    ServiceUnavailable,
}

impl ErrorType {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorType::BadRequest => StatusCode::BAD_REQUEST,
            ErrorType::Forbidden => StatusCode::FORBIDDEN,
            ErrorType::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorType::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_name(&self) -> &'static str {
        match self {
            ErrorType::BadRequest => "BadRequest",
            ErrorType::Forbidden => "Forbidden",
            ErrorType::InternalServerError => "InternalServerError",
            ErrorType::ServiceUnavailable => "ServiceUnavailable",
        }
    }
}

/// Error returned by HTTP handlers, rendered as a JSON body.
#[derive(Debug, Clone)]
pub struct ApiError {
    error_type: ErrorType,
    message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorType::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Forbidden, message)
    }

    pub fn status_code(&self) -> StatusCode {
        self.error_type.status_code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({})",
            self.error_type.error_name(),
            self.message,
            self.status_code().as_u16()
        )
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorBody {
            error: self.message,
            status: status.as_u16(),
        });
        (status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => ApiError::bad_request(msg),
            Error::Forbidden => ApiError::forbidden(err.to_string()),
            Error::StoreUnavailable(e) => {
                tracing::error!(error = %e, "Store unavailable");
                ApiError::new(
                    ErrorType::ServiceUnavailable,
                    "Service temporarily unavailable",
                )
            }
            Error::ShuttingDown => {
                ApiError::new(ErrorType::ServiceUnavailable, err.to_string())
            }
            Error::TransientIo { .. } => {
                tracing::error!(error = %err, "Unexpected connection error");
                ApiError::new(ErrorType::InternalServerError, "Internal server error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{SinkError, StoreError};
    use crate::realtime::ConnectionId;

    #[test]
    fn test_domain_errors_map_to_status() {
        let cases = [
            (Error::validation("bad"), StatusCode::BAD_REQUEST),
            (Error::Forbidden, StatusCode::FORBIDDEN),
            (
                Error::StoreUnavailable(StoreError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::TransientIo {
                    connection: ConnectionId::from_raw(1),
                    source: SinkError::Closed,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_store_details_are_not_exposed() {
        let err = ApiError::from(Error::StoreUnavailable(StoreError::Unavailable(
            "password authentication failed".into(),
        )));
        assert!(!err.message().contains("password"));
    }
}
