//! Bearer-token extraction.
//!
//! Handlers take [`CurrentActor`] to require a live session; the token is
//! resolved against the sessions table on every request.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use program_approval::{Actor, ApprovalError};
use tracing::debug;

use crate::api::ApiState;
use crate::errors::ApiError;

/// The raw bearer token of the request.
pub struct BearerToken(pub String);

/// The actor behind the request's session.
pub struct CurrentActor(pub Actor);

#[async_trait]
impl FromRequestParts<Arc<ApiState>> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".into()))?;
        let value = header
            .to_str()
            .map_err(|_| ApiError::Unauthorized("malformed Authorization header".into()))?;
        match value.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
                Ok(BearerToken(token.trim().to_string()))
            }
            _ => Err(ApiError::Unauthorized("expected a Bearer token".into())),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<ApiState>> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        match state.service.resolve_session(&token).await {
            Ok(actor) => {
                debug!("Request by actor {} ({})", actor.id, actor.role);
                Ok(CurrentActor(actor))
            }
            Err(ApprovalError::PermissionDenied(msg)) => Err(ApiError::Unauthorized(msg)),
            Err(e) => Err(e.into()),
        }
    }
}
