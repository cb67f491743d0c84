use jsonwebtoken::{DecodingKey, Validation, decode};
use murmur_types::api::Claims;
use uuid::Uuid;

use crate::error::{GatewayError, Result};

/// Validate an HS256 token and return its claims.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| GatewayError::Unauthorized(format!("invalid token: {}", e)))?;

    Ok(token_data.claims)
}

/// A per-command token is optional, but when present it must belong to the
/// connection's user.
pub fn check_command_token(token: Option<&str>, secret: &str, user_id: Uuid) -> Result<()> {
    let Some(token) = token else {
        return Ok(());
    };
    let claims = verify_token(token, secret)?;
    if claims.sub != user_id {
        return Err(GatewayError::Unauthorized(
            "token does not belong to this connection".into(),
        ));
    }
    Ok(())
}
