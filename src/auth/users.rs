use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::{db, AppResult, Timestamp};

use super::Claims;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct User {
    pub id: String,
    #[serde(skip)]
    pub external_id: String,
    pub email: Option<String>,
    pub name: String,
    pub avatar_url: Option<String>,
    pub created_at: Timestamp,
}

async fn find_by_subject(db_pool: &SqlitePool, subject: &str) -> AppResult<Option<User>> {
    Ok(sqlx::query_as("SELECT * FROM users WHERE external_id=?")
        .bind(subject)
        .fetch_optional(db_pool)
        .await?)
}

/// The local user for a verified subject, created on first sight.
pub async fn get_or_create(db_pool: &SqlitePool, claims: Claims) -> AppResult<User> {
    if let Some(user) = find_by_subject(db_pool, &claims.subject).await? {
        return Ok(user);
    }

    let inserted = sqlx::query_as::<_, User>(
        "INSERT INTO users (id,external_id,email,name,avatar_url,created_at) \
         VALUES (?,?,?,?,?,?) RETURNING *",
    )
    .bind(db::new_id())
    .bind(&claims.subject)
    .bind(&claims.email)
    .bind(claims.display_name())
    .bind(&claims.avatar_url)
    .bind(Timestamp::now())
    .fetch_one(db_pool)
    .await;

    match inserted {
        Ok(user) => {
            info!(user_id = %user.id, "welcome new reader");
            Ok(user)
        }
        Err(err) if db::is_unique_violation(&err) => {
            debug!(subject = %claims.subject, "user created concurrently, using stored row");
            find_by_subject(db_pool, &claims.subject)
                .await?
                .ok_or_else(|| {
                    format!("user {} conflicted on insert but is not stored", claims.subject).into()
                })
        }
        Err(err) => Err(err.into()),
    }
}
