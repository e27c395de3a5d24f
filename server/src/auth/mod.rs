//! Identity collaborator: turns a bearer token into an authenticated user.

pub mod jwt;
pub mod middleware;

use thiserror::Error;

use crate::engine::UserId;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid(err),
        }
    }
}

pub trait IdentityProvider: Send + Sync {
    fn authenticated_user_id(&self, token: &str) -> Result<UserId, AuthError>;
}

/// HS256 access tokens signed with the server secret.
pub struct JwtIdentity {
    secret: Vec<u8>,
}

impl JwtIdentity {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    pub fn issue(&self, user_id: &UserId) -> Result<String, jsonwebtoken::errors::Error> {
        jwt::issue_access_token(&self.secret, user_id)
    }
}

impl IdentityProvider for JwtIdentity {
    fn authenticated_user_id(&self, token: &str) -> Result<UserId, AuthError> {
        let claims = jwt::validate_access_token(&self.secret, token)?;
        Ok(UserId::new(claims.sub))
    }
}
