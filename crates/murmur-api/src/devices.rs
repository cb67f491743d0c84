use axum::{Extension, Json, extract::State, http::StatusCode};
use murmur_types::api::{Claims, RegisterDeviceRequest};
use tracing::debug;

use crate::error::ApiError;
use crate::{AppState, blocking};

pub async fn register_device(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterDeviceRequest>,
) -> Result<StatusCode, ApiError> {
    let user_id = claims.sub;
    debug!("Registering device {} for {}", req.device_id, user_id);
    blocking(&state, move |db| {
        db.register_device(user_id, &req.device_id, &req.token)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
