use std::sync::Arc;

use murmur_db::{Database, DbError};
use murmur_types::events::{ErrorCode, GatewayEvent};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Db(e) => e.code(),
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The error event reported back to the connection that sent `command`.
    /// Internal details are not leaked to clients.
    pub fn to_event(&self, command: Option<&str>) -> GatewayEvent {
        let message = match self.code() {
            ErrorCode::Internal => "internal server error".to_string(),
            _ => self.to_string(),
        };
        GatewayEvent::Error {
            code: self.code(),
            message,
            command: command.map(str::to_string),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Run a repository call on the blocking pool.
pub async fn blocking<T, F>(db: &Arc<Database>, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> murmur_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    match tokio::task::spawn_blocking(move || f(&db)).await {
        Ok(result) => result.map_err(GatewayError::from),
        Err(e) => {
            error!("Blocking database task failed: {}", e);
            Err(GatewayError::Internal(e.to_string()))
        }
    }
}
