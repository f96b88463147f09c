//! Request identity.
//!
//! Tokens are verified by an external claims issuer; the first verified
//! request for a subject creates the matching row in `users`.

mod userinfo;
pub mod users;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use sqlx::SqlitePool;

use crate::{AppError, AppResult};

pub use userinfo::UserinfoProvider;
pub use users::User;

/// What the identity provider vouches for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Claims {
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or(self.email.as_deref())
            .unwrap_or("Reader")
            .to_owned()
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fails with [`AppError::Unauthorized`] when the token is not accepted.
    async fn verify(&self, token: &str) -> AppResult<Claims>;
}

/// The signed-in user, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    SqlitePool: FromRef<S>,
    Arc<dyn IdentityProvider>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Missing or malformed bearer token".to_owned()))?;

        let identity = Arc::<dyn IdentityProvider>::from_ref(state);
        let claims = identity.verify(&token).await?;

        let db_pool = SqlitePool::from_ref(state);
        Ok(AuthUser(users::get_or_create(&db_pool, claims).await?))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_owned())
}
