//! Bearer token authentication for the `/api/v1` routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Courier,
    Admin,
}

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User or courier id
    pub sub: String,
    pub role: Role,
    /// Expiration (Unix timestamp seconds)
    pub exp: usize,
    /// Issued at (Unix timestamp seconds)
    pub iat: usize,
}

/// Authenticated caller, inserted into request extensions by [`require_auth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
    pub role: Role,
}

impl AuthUser {
    /// Admins pass every role check.
    pub fn require(&self, role: Role) -> AppResult<()> {
        if self.role == role || self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "this endpoint requires the {role:?} role"
            )))
        }
    }
}

pub fn create_token(
    id: i64,
    role: Role,
    secret: &str,
    ttl: chrono::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: id.to_string(),
        role,
        exp: (now + ttl).timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn verify_token(token: &str, secret: &str) -> AppResult<AuthUser> {
    let token_data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("JWT validation failed: {e}");
        AppError::Unauthorized("Invalid or expired token".into())
    })?;

    let id = token_data
        .claims
        .sub
        .parse()
        .map_err(|_| AppError::Unauthorized("Token subject is not a valid id".into()))?;

    Ok(AuthUser {
        id,
        role: token_data.claims.role,
    })
}

/// Middleware that verifies the bearer token and stores the caller as [`AuthUser`].
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization format".into()))?;

    let user = verify_token(token, &state.jwt_secret)?;
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
