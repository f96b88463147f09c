mod manage;
mod membership;

use axum::{
    routing::{get, post},
    Router,
};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, FromRow, SqlitePool};

use crate::{pagination::Listable, AppError, AppResult, AppState, Timestamp};

const INVITE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const INVITE_LEN: usize = 9;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub topic_tags: SqlJson<Vec<String>>,
    pub created_by: String,
    /// Set exactly when the group is private.
    pub invite_code: Option<String>,
    pub member_limit: i64,
    pub avatar_url: Option<String>,
    pub created_at: Timestamp,
}

impl Group {
    /// Hides the invite code from anyone but a group admin.
    pub fn visible_to(mut self, role: Option<Role>) -> Group {
        if role != Some(Role::Admin) {
            self.invite_code = None;
        }
        self
    }
}

impl Listable for Group {
    const TABLE: &'static str = "reading_groups";
    const SORT_KEY: &'static str = "created_at";

    fn sort_key(&self) -> Timestamp {
        self.created_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Member {
    pub id: String,
    pub group_id: String,
    pub user_id: String,
    pub role: Role,
    pub joined_at: Timestamp,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(manage::list_groups).post(manage::create_group))
        .route(
            "/{id}",
            get(manage::group_details)
                .patch(manage::update_group)
                .delete(manage::delete_group),
        )
        .route("/{id}/join", post(membership::join_group))
        .route("/{id}/leave", post(membership::leave_group))
}

pub async fn find(db_pool: &SqlitePool, id: &str) -> AppResult<Option<Group>> {
    Ok(sqlx::query_as("SELECT * FROM reading_groups WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await?)
}

pub async fn find_or_404(db_pool: &SqlitePool, id: &str) -> AppResult<Group> {
    find(db_pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("group_not_found", "Group not found"))
}

pub async fn role_of(
    db_pool: &SqlitePool,
    group_id: &str,
    user_id: &str,
) -> AppResult<Option<Role>> {
    Ok(sqlx::query_scalar("SELECT role FROM group_members WHERE group_id=? AND user_id=?")
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(db_pool)
        .await?)
}

/// The caller's role in an existing group, or `Forbidden` for outsiders.
pub async fn require_member(
    db_pool: &SqlitePool,
    group_id: &str,
    user_id: &str,
) -> AppResult<Role> {
    find_or_404(db_pool, group_id).await?;
    role_of(db_pool, group_id, user_id)
        .await?
        .ok_or_else(|| {
            AppError::forbidden("not_a_member", "You are not a participant of this group")
        })
}

pub async fn require_admin(db_pool: &SqlitePool, group_id: &str, user_id: &str) -> AppResult<()> {
    match require_member(db_pool, group_id, user_id).await? {
        Role::Admin => Ok(()),
        Role::Member => Err(AppError::forbidden("not_an_admin", "Only group admins can do that")),
    }
}

pub async fn participant_count(db_pool: &SqlitePool, group_id: &str) -> AppResult<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM group_members WHERE group_id=?")
        .bind(group_id)
        .fetch_one(db_pool)
        .await?)
}

fn invite_code() -> String {
    let mut rng = rand::rng();
    (0..INVITE_LEN)
        .filter_map(|_| INVITE_ALPHABET.choose(&mut rng))
        .map(|&b| char::from(b))
        .collect()
}
