use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::Response,
};

use super::IdentityProvider;
use crate::engine::UserId;
use crate::state::AppState;

/// Identity provider stored in request extensions for the `AuthUser` extractor.
#[derive(Clone)]
pub struct Identity(pub Arc<dyn IdentityProvider>);

/// Authenticated caller, taken from `Authorization: Bearer <jwt>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let identity = parts
            .extensions
            .get::<Identity>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        identity
            .0
            .authenticated_user_id(token)
            .map(AuthUser)
            .map_err(|_| StatusCode::UNAUTHORIZED)
    }
}

/// Inject the identity provider so `AuthUser` can find it.
pub async fn inject_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    req.extensions_mut()
        .insert(Identity(state.identity.clone()));
    next.run(req).await
}
