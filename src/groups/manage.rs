use axum::{debug_handler, extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, SqlitePool};

use crate::{
    auth::AuthUser,
    db,
    extract::{ApiJson, ApiPath, ApiQuery},
    pagination::{self, Filters, Page, PageParams},
    realtime::{EventKind, Realtime, Topic},
    AppError, AppResult, AppState, Timestamp,
};

use super::{find_or_404, invite_code, participant_count, require_admin, role_of, Group, Role};

const MAX_NAME: usize = 100;
const MAX_DESCRIPTION: usize = 1000;
const MAX_TAGS: usize = 5;
const MAX_TAG_LEN: usize = 30;
const DEFAULT_MEMBER_LIMIT: i64 = 100;
const MAX_MEMBER_LIMIT: i64 = 1000;

#[derive(Debug, Serialize)]
pub(super) struct GroupView {
    #[serde(flatten)]
    group: Group,
    participant_count: i64,
    my_role: Option<Role>,
}

async fn view(db_pool: &SqlitePool, group: Group, user_id: &str) -> AppResult<GroupView> {
    let my_role = role_of(db_pool, &group.id, user_id).await?;
    Ok(GroupView {
        participant_count: participant_count(db_pool, &group.id).await?,
        group: group.visible_to(my_role),
        my_role,
    })
}

fn check_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME {
        return Err(AppError::validation(
            "invalid_name",
            format!("Name must be 1 to {MAX_NAME} characters"),
        ));
    }
    Ok(name.to_owned())
}

fn check_description(description: Option<String>) -> AppResult<Option<String>> {
    match description {
        Some(text) if text.chars().count() > MAX_DESCRIPTION => Err(AppError::validation(
            "invalid_description",
            format!("Description must be at most {MAX_DESCRIPTION} characters"),
        )),
        other => Ok(other),
    }
}

fn check_tags(tags: Vec<String>) -> AppResult<Vec<String>> {
    if tags.len() > MAX_TAGS {
        return Err(AppError::validation(
            "invalid_topic_tags",
            format!("At most {MAX_TAGS} topic tags"),
        ));
    }
    tags.into_iter()
        .map(|tag| {
            let tag = tag.trim();
            if tag.is_empty() || tag.chars().count() > MAX_TAG_LEN {
                Err(AppError::validation(
                    "invalid_topic_tags",
                    format!("Topic tags must be 1 to {MAX_TAG_LEN} characters"),
                ))
            } else {
                Ok(tag.to_owned())
            }
        })
        .collect()
}

fn check_member_limit(limit: i64) -> AppResult<i64> {
    if !(1..=MAX_MEMBER_LIMIT).contains(&limit) {
        return Err(AppError::validation(
            "invalid_member_limit",
            format!("member_limit must be between 1 and {MAX_MEMBER_LIMIT}"),
        ));
    }
    Ok(limit)
}

#[derive(Debug, Deserialize)]
pub(super) struct NewGroup {
    name: String,
    description: Option<String>,
    is_public: Option<bool>,
    #[serde(default)]
    topic_tags: Vec<String>,
    member_limit: Option<i64>,
    avatar_url: Option<String>,
}

#[debug_handler(state = AppState)]
pub(super) async fn create_group(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiJson(new_group): ApiJson<NewGroup>,
) -> AppResult<(StatusCode, Json<GroupView>)> {
    let name = check_name(&new_group.name)?;
    let description = check_description(new_group.description)?;
    let topic_tags = check_tags(new_group.topic_tags)?;
    let member_limit = check_member_limit(new_group.member_limit.unwrap_or(DEFAULT_MEMBER_LIMIT))?;
    let is_public = new_group.is_public.unwrap_or(true);
    let now = Timestamp::now();

    // the creator's admin row lands with the group or not at all
    let mut tx = db_pool.begin().await?;
    let group: Group = sqlx::query_as(
        "INSERT INTO reading_groups (id,name,description,is_public,topic_tags,created_by,\
         invite_code,member_limit,avatar_url,created_at) \
         VALUES (?,?,?,?,?,?,?,?,?,?) RETURNING *",
    )
    .bind(db::new_id())
    .bind(&name)
    .bind(&description)
    .bind(is_public)
    .bind(SqlJson(&topic_tags))
    .bind(&user.id)
    .bind((!is_public).then(invite_code))
    .bind(member_limit)
    .bind(&new_group.avatar_url)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO group_members (id,group_id,user_id,role,joined_at) VALUES (?,?,?,?,?)")
        .bind(db::new_id())
        .bind(&group.id)
        .bind(&user.id)
        .bind(Role::Admin)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    realtime.publish(Topic::groups(&group.id), EventKind::Insert, &group.clone().visible_to(None));

    Ok((
        StatusCode::CREATED,
        Json(GroupView { group, participant_count: 1, my_role: Some(Role::Admin) }),
    ))
}

#[debug_handler(state = AppState)]
pub(super) async fn group_details(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> AppResult<Json<GroupView>> {
    let group = find_or_404(&db_pool, &id).await?;
    Ok(Json(view(&db_pool, group, &user.id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct GroupPatch {
    name: Option<String>,
    description: Option<String>,
    is_public: Option<bool>,
    topic_tags: Option<Vec<String>>,
    member_limit: Option<i64>,
    avatar_url: Option<String>,
}

/// Applies `patch`, keeping the invite code in step with visibility.
fn apply(mut group: Group, patch: GroupPatch) -> AppResult<Group> {
    if let Some(name) = patch.name {
        group.name = check_name(&name)?;
    }
    if let Some(description) = check_description(patch.description)? {
        group.description = Some(description);
    }
    if let Some(tags) = patch.topic_tags {
        group.topic_tags = SqlJson(check_tags(tags)?);
    }
    if let Some(limit) = patch.member_limit {
        group.member_limit = check_member_limit(limit)?;
    }
    if let Some(avatar_url) = patch.avatar_url {
        group.avatar_url = Some(avatar_url);
    }

    match (group.is_public, patch.is_public) {
        (true, Some(false)) => {
            group.is_public = false;
            group.invite_code = Some(invite_code());
        }
        (false, Some(true)) => {
            group.is_public = true;
            group.invite_code = None;
        }
        _ => {}
    }
    Ok(group)
}

#[debug_handler(state = AppState)]
pub(super) async fn update_group(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(patch): ApiJson<GroupPatch>,
) -> AppResult<Json<GroupView>> {
    require_admin(&db_pool, &id, &user.id).await?;
    let group = apply(find_or_404(&db_pool, &id).await?, patch)?;

    let group: Group = sqlx::query_as(
        "UPDATE reading_groups SET name=?,description=?,is_public=?,topic_tags=?,\
         invite_code=?,member_limit=?,avatar_url=? \
         WHERE id=? RETURNING *",
    )
    .bind(&group.name)
    .bind(&group.description)
    .bind(group.is_public)
    .bind(&group.topic_tags)
    .bind(&group.invite_code)
    .bind(group.member_limit)
    .bind(&group.avatar_url)
    .bind(&id)
    .fetch_optional(&db_pool)
    .await?
    .ok_or_else(|| AppError::not_found("group_not_found", "Group not found"))?;

    realtime.publish(Topic::groups(&id), EventKind::Update, &group.clone().visible_to(None));
    Ok(Json(view(&db_pool, group, &user.id).await?))
}

#[derive(Debug, Serialize)]
pub(super) struct Deleted {
    id: String,
}

#[debug_handler(state = AppState)]
pub(super) async fn delete_group(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> AppResult<Json<Deleted>> {
    let group = find_or_404(&db_pool, &id).await?;
    if group.created_by != user.id {
        return Err(AppError::forbidden("not_the_creator", "Only the creator can delete a group"));
    }

    sqlx::query("DELETE FROM reading_groups WHERE id=?")
        .bind(&id)
        .execute(&db_pool)
        .await?;

    realtime.publish(Topic::groups(&id), EventKind::Delete, &Deleted { id: id.clone() });
    Ok(Json(Deleted { id }))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct GroupFilters {
    q: Option<String>,
    is_public: Option<bool>,
    /// Comma separated; a group matches when it carries any of them.
    topic_tags: Option<String>,
    created_by: Option<String>,
}

impl GroupFilters {
    fn filters(&self) -> Filters {
        let tags: Vec<String> = self
            .topic_tags
            .iter()
            .flat_map(|tags| tags.split(','))
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_owned)
            .collect();

        Filters::new()
            .contains(&["name", "description"], self.q.as_deref())
            .eq_opt("is_public", self.is_public)
            .overlaps("topic_tags", &tags)
            .eq_opt("created_by", self.created_by.clone())
    }
}

#[debug_handler(state = AppState)]
pub(super) async fn list_groups(
    State(db_pool): State<SqlitePool>,
    AuthUser(_user): AuthUser,
    ApiQuery(filters): ApiQuery<GroupFilters>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> AppResult<Json<Page<Group>>> {
    let request = params.into_request()?;
    let page = pagination::list::<Group>(&db_pool, &filters.filters(), &request).await?;
    Ok(Json(page.map(|group| group.visible_to(None))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(is_public: bool) -> Group {
        Group {
            id: "g1".into(),
            name: "Sci-fi club".into(),
            description: None,
            is_public,
            topic_tags: SqlJson(vec![]),
            created_by: "u1".into(),
            invite_code: (!is_public).then(|| "abc123xyz".to_owned()),
            member_limit: 100,
            avatar_url: None,
            created_at: Timestamp::now(),
        }
    }

    #[test]
    fn going_private_issues_a_fresh_code() {
        let private = GroupPatch { is_public: Some(false), ..Default::default() };
        let patched = apply(group(true), private).unwrap();
        assert!(!patched.is_public);
        assert_eq!(patched.invite_code.as_ref().map(String::len), Some(9));
    }

    #[test]
    fn going_public_clears_the_code() {
        let public = GroupPatch { is_public: Some(true), ..Default::default() };
        let patched = apply(group(false), public).unwrap();
        assert!(patched.is_public);
        assert_eq!(patched.invite_code, None);
    }

    #[test]
    fn unchanged_visibility_keeps_the_code() {
        let renamed = GroupPatch { name: Some(" Book club ".into()), ..Default::default() };
        let patched = apply(group(false), renamed).unwrap();
        assert_eq!(patched.name, "Book club");
        assert_eq!(patched.invite_code.as_deref(), Some("abc123xyz"));
    }

    #[test]
    fn validates_tags_and_limits() {
        let six = (0..6).map(|i| format!("t{i}")).collect();
        assert!(check_tags(six).is_err());
        assert!(check_tags(vec!["x".repeat(31)]).is_err());
        assert_eq!(check_tags(vec![" horror ".into()]).unwrap(), vec!["horror".to_owned()]);
        assert!(check_member_limit(0).is_err());
        assert!(check_member_limit(1001).is_err());
        assert!(check_name("   ").is_err());
    }

    #[test]
    fn list_filters_split_tags() {
        let tags = Some("sci-fi, horror,".to_owned());
        let filters = GroupFilters { topic_tags: tags, ..Default::default() }.filters();
        assert_eq!(
            filters,
            Filters::new().overlaps("topic_tags", &["sci-fi".to_owned(), "horror".to_owned()])
        );
    }
}
