use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use murmur_gateway::auth::verify_token;

use crate::AppState;
use crate::error::ApiError;

/// Validate the Bearer JWT and stash its `Claims` in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let claims = verify_token(bearer.token(), &state.jwt_secret)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
