//! Group chat messages. Every route requires group membership.

use axum::{
    debug_handler,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, FromRow, SqlitePool};

use crate::{
    auth::AuthUser,
    db,
    extract::{ApiJson, ApiPath, ApiQuery},
    groups,
    pagination::{self, Filters, Listable, Page, PageParams},
    realtime::{EventKind, Realtime, Topic},
    AppError, AppResult, AppState, Timestamp,
};

const MAX_CONTENT: usize = 2000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Link,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Message {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<String>,
    pub read_by: SqlJson<Vec<String>>,
    pub created_at: Timestamp,
    pub edited_at: Option<Timestamp>,
}

impl Listable for Message {
    const TABLE: &'static str = "messages";
    const SORT_KEY: &'static str = "created_at";

    fn sort_key(&self) -> Timestamp {
        self.created_at
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(send_message))
        .route("/group/{group_id}", get(list_messages))
        .route(
            "/{id}",
            get(message_details).patch(edit_message).delete(delete_message),
        )
        .route("/{id}/read", post(mark_read))
}

fn check_content(content: &str) -> AppResult<String> {
    let content = content.trim();
    if content.is_empty() || content.chars().count() > MAX_CONTENT {
        return Err(AppError::validation(
            "invalid_content",
            format!("Content must be 1 to {MAX_CONTENT} characters"),
        ));
    }
    Ok(content.to_owned())
}

async fn find(db_pool: &SqlitePool, id: &str) -> AppResult<Message> {
    sqlx::query_as("SELECT * FROM messages WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await?
        .ok_or_else(|| AppError::not_found("message_not_found", "Message not found"))
}

/// Loads a message the caller may see.
async fn find_visible(db_pool: &SqlitePool, id: &str, user_id: &str) -> AppResult<Message> {
    let message = find(db_pool, id).await?;
    groups::require_member(db_pool, &message.group_id, user_id).await?;
    Ok(message)
}

/// Loads a message the caller sent.
async fn find_own(db_pool: &SqlitePool, id: &str, user_id: &str) -> AppResult<Message> {
    let message = find_visible(db_pool, id, user_id).await?;
    if message.sender_id != user_id {
        return Err(AppError::forbidden(
            "not_the_sender",
            "Only the sender can change this message",
        ));
    }
    Ok(message)
}

#[derive(Debug, Deserialize)]
struct NewMessage {
    #[serde(alias = "groupId")]
    group_id: String,
    content: String,
    #[serde(default, alias = "messageType")]
    message_type: MessageType,
    #[serde(alias = "replyToId")]
    reply_to_id: Option<String>,
}

#[debug_handler(state = AppState)]
async fn send_message(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiJson(new_message): ApiJson<NewMessage>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let content = check_content(&new_message.content)?;
    groups::require_member(&db_pool, &new_message.group_id, &user.id).await?;

    if let Some(reply_to_id) = &new_message.reply_to_id {
        let same_group: Option<String> =
            sqlx::query_scalar("SELECT id FROM messages WHERE id=? AND group_id=?")
                .bind(reply_to_id)
                .bind(&new_message.group_id)
                .fetch_optional(&db_pool)
                .await?;
        if same_group.is_none() {
            return Err(AppError::validation(
                "invalid_reply_to",
                "reply_to_id must reference a message in the same group",
            ));
        }
    }

    let message: Message = sqlx::query_as(
        "INSERT INTO messages (id,group_id,sender_id,content,message_type,reply_to_id,created_at) \
         VALUES (?,?,?,?,?,?,?) RETURNING *",
    )
    .bind(db::new_id())
    .bind(&new_message.group_id)
    .bind(&user.id)
    .bind(&content)
    .bind(new_message.message_type)
    .bind(&new_message.reply_to_id)
    .bind(Timestamp::now())
    .fetch_one(&db_pool)
    .await?;

    realtime.publish(Topic::messages(&message.group_id), EventKind::Insert, &message);
    Ok((StatusCode::CREATED, Json(message)))
}

#[debug_handler(state = AppState)]
async fn message_details(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> AppResult<Json<Message>> {
    Ok(Json(find_visible(&db_pool, &id, &user.id).await?))
}

#[derive(Debug, Deserialize)]
struct MessageEdit {
    content: String,
}

#[debug_handler(state = AppState)]
async fn edit_message(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(MessageEdit { content }): ApiJson<MessageEdit>,
) -> AppResult<Json<Message>> {
    let content = check_content(&content)?;
    find_own(&db_pool, &id, &user.id).await?;

    let message: Message =
        sqlx::query_as("UPDATE messages SET content=?,edited_at=? WHERE id=? RETURNING *")
            .bind(&content)
            .bind(Timestamp::now())
            .bind(&id)
            .fetch_optional(&db_pool)
            .await?
            .ok_or_else(|| AppError::not_found("message_not_found", "Message not found"))?;

    realtime.publish(Topic::messages(&message.group_id), EventKind::Update, &message);
    Ok(Json(message))
}

#[derive(Debug, Serialize)]
struct Deleted {
    id: String,
}

#[debug_handler(state = AppState)]
async fn delete_message(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> AppResult<Json<Deleted>> {
    let message = find_own(&db_pool, &id, &user.id).await?;

    sqlx::query("DELETE FROM messages WHERE id=?")
        .bind(&id)
        .execute(&db_pool)
        .await?;

    let deleted = Deleted { id };
    realtime.publish(Topic::messages(&message.group_id), EventKind::Delete, &deleted);
    Ok(Json(deleted))
}

#[derive(Debug, Default, Deserialize)]
struct MessageFilters {
    #[serde(alias = "replyToId")]
    reply_to_id: Option<String>,
}

#[debug_handler(state = AppState)]
async fn list_messages(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
    ApiPath(group_id): ApiPath<String>,
    ApiQuery(MessageFilters { reply_to_id }): ApiQuery<MessageFilters>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> AppResult<Json<Page<Message>>> {
    let request = params.into_request()?;
    groups::require_member(&db_pool, &group_id, &user.id).await?;

    let filters = Filters::new().eq("group_id", group_id).eq_opt("reply_to_id", reply_to_id);
    Ok(Json(pagination::list(&db_pool, &filters, &request).await?))
}

/// Adds `user_id` to `read_by` unless it is already there, in one statement.
async fn add_reader(db_pool: &SqlitePool, id: &str, user_id: &str) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE messages SET read_by=json_insert(read_by,'$[#]',?) \
         WHERE id=? AND NOT EXISTS \
         (SELECT 1 FROM json_each(messages.read_by) WHERE json_each.value=?)",
    )
    .bind(user_id)
    .bind(id)
    .bind(user_id)
    .execute(db_pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[debug_handler(state = AppState)]
async fn mark_read(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> AppResult<Json<Message>> {
    find_visible(&db_pool, &id, &user.id).await?;

    let changed = add_reader(&db_pool, &id, &user.id).await?;
    let message = find(&db_pool, &id).await?;
    if changed {
        realtime.publish(Topic::messages(&message.group_id), EventKind::Update, &message);
    }
    Ok(Json(message))
}
