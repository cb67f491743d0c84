use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use murmur_db::DbError;
use murmur_gateway::GatewayError;
use murmur_types::api::ErrorBody;
use murmur_types::events::ErrorCode;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Db(e) => Self::Db(e),
            GatewayError::Unauthorized(m) => Self::Unauthorized(m),
            GatewayError::Validation(m) => Self::Validation(m),
            GatewayError::Internal(m) => Self::Internal(m),
        }
    }
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Db(e) => e.code(),
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let message = if code == ErrorCode::Internal {
            error!("Request failed: {}", self);
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status_for(code), Json(ErrorBody { code, message })).into_response()
    }
}
