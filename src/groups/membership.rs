use axum::{debug_handler, extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    auth::AuthUser,
    db,
    extract::{ApiJson, ApiPath},
    realtime::{EventKind, Realtime, Topic},
    AppError, AppResult, AppState, Timestamp,
};

use super::{find_or_404, participant_count, require_member, role_of, Member, Role};

#[derive(Debug, Default, Deserialize)]
pub(super) struct JoinRequest {
    #[serde(default)]
    invite_code: Option<String>,
}

#[debug_handler(state = AppState)]
pub(super) async fn join_group(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<String>,
    body: Option<ApiJson<JoinRequest>>,
) -> AppResult<(StatusCode, Json<Member>)> {
    let JoinRequest { invite_code } = body.map(|ApiJson(body)| body).unwrap_or_default();
    let group = find_or_404(&db_pool, &id).await?;

    if !group.is_public {
        let presented = invite_code.as_deref().map(str::trim);
        if presented.is_none() || presented != group.invite_code.as_deref() {
            return Err(AppError::forbidden("invalid_invite_code", "Invalid invite code"));
        }
    }

    if role_of(&db_pool, &id, &user.id).await?.is_some() {
        return Err(already_member());
    }
    if participant_count(&db_pool, &id).await? >= group.member_limit {
        return Err(AppError::conflict("group_full", "This group has reached its member limit"));
    }

    let inserted = sqlx::query_as::<_, Member>(
        "INSERT INTO group_members (id,group_id,user_id,role,joined_at) \
         VALUES (?,?,?,?,?) RETURNING *",
    )
    .bind(db::new_id())
    .bind(&id)
    .bind(&user.id)
    .bind(Role::Member)
    .bind(Timestamp::now())
    .fetch_one(&db_pool)
    .await;

    let member = match inserted {
        Ok(member) => member,
        Err(err) if db::is_unique_violation(&err) => return Err(already_member()),
        Err(err) => return Err(err.into()),
    };

    info!(group_id = %id, user_id = %user.id, "joined group");
    realtime.publish(Topic::group_participants(&id), EventKind::Insert, &member);
    Ok((StatusCode::CREATED, Json(member)))
}

fn already_member() -> AppError {
    AppError::conflict("already_member", "You are already a participant of this group")
}

#[derive(Debug, Serialize)]
pub(super) struct Left {
    group_id: String,
    user_id: String,
}

#[debug_handler(state = AppState)]
pub(super) async fn leave_group(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> AppResult<Json<Left>> {
    if require_member(&db_pool, &id, &user.id).await? == Role::Admin {
        let admins: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM group_members WHERE group_id=? AND role='admin'",
        )
        .bind(&id)
        .fetch_one(&db_pool)
        .await?;
        if admins <= 1 {
            return Err(AppError::conflict("last_admin", "The last admin cannot leave the group"));
        }
    }

    sqlx::query("DELETE FROM group_members WHERE group_id=? AND user_id=?")
        .bind(&id)
        .bind(&user.id)
        .execute(&db_pool)
        .await?;

    let left = Left { group_id: id, user_id: user.id };
    realtime.publish(Topic::group_participants(&left.group_id), EventKind::Delete, &left);
    Ok(Json(left))
}
