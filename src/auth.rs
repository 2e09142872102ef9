//! Identity resolution
//!
//! Token issuance happens elsewhere; this module only maps a bearer token
//! to an agent id and turns a missing or unknown token into `Unauthorized`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::store::Store;
use crate::AppState;

/// Resolve a bearer token to the agent it was issued to
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<Uuid>>;
}

#[async_trait]
impl IdentityResolver for Store {
    async fn resolve(&self, token: &str) -> Result<Option<Uuid>> {
        self.agent_for_token(token).await
    }
}

/// Token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The authenticated agent making a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthAgent(pub Uuid);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthAgent {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

        match state.identity.resolve(token).await? {
            Some(agent_id) => Ok(AuthAgent(agent_id)),
            None => {
                tracing::debug!("Rejected unknown bearer token");
                Err(AppError::Unauthorized("Unknown bearer token".to_string()))
            }
        }
    }
}
