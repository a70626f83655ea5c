use crate::errors::AppError;
use crate::models::User;
use crate::provider::ProviderError;
use crate::state::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use tracing::{debug, warn};

/// Caller identity resolved from the bearer token, handed to every protected handler.
#[derive(Debug, Clone)]
pub struct AuthenticatedRequest {
    pub user: User,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedRequest {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;

        let user = state.provider.user_for_token(token).await.map_err(|err| {
            match &err {
                ProviderError::InvalidToken => debug!("rejected bearer token"),
                other => warn!("token lookup failed: {other}"),
            }
            AppError::unauthorized("Invalid or expired token")
        })?;

        Ok(Self {
            user,
            token: token.to_string(),
        })
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::unauthorized("Invalid authorization header"))
}
