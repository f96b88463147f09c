use std::sync::Arc;

use axum::{
    debug_handler,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::{
    auth::AuthUser,
    books::{catalog::Catalog, ensure_book},
    config::CatalogSettings,
    db,
    extract::{ApiJson, ApiPath, ApiQuery},
    pagination::{self, Filters, Listable, Page, PageParams},
    realtime::{EventKind, Realtime, Topic},
    AppError, AppResult, AppState, Timestamp,
};

const MAX_CONTENT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Review {
    pub id: String,
    pub book_id: String,
    pub user_id: String,
    pub rating: Option<i64>,
    pub content: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
}

impl Listable for Review {
    const TABLE: &'static str = "reviews";
    const SORT_KEY: &'static str = "created_at";

    fn sort_key(&self) -> Timestamp {
        self.created_at
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_review))
        .route("/book/{book_id}", get(list_reviews))
        .route(
            "/{id}",
            get(review_details).patch(update_review).delete(delete_review),
        )
}

pub(crate) fn check_rating(rating: Option<i64>) -> AppResult<Option<i64>> {
    match rating {
        Some(r) if !(1..=5).contains(&r) => {
            Err(AppError::validation("invalid_rating", "Rating must be between 1 and 5"))
        }
        other => Ok(other),
    }
}

fn check_content(content: Option<String>) -> AppResult<Option<String>> {
    match content {
        Some(text) if text.chars().count() > MAX_CONTENT => Err(AppError::validation(
            "invalid_content",
            format!("Review must be at most {MAX_CONTENT} characters"),
        )),
        other => Ok(other),
    }
}

async fn find(db_pool: &SqlitePool, id: &str) -> AppResult<Review> {
    sqlx::query_as("SELECT * FROM reviews WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await?
        .ok_or_else(|| AppError::not_found("review_not_found", "Review not found"))
}

async fn find_own(db_pool: &SqlitePool, id: &str, user_id: &str) -> AppResult<Review> {
    let review = find(db_pool, id).await?;
    if review.user_id != user_id {
        return Err(AppError::forbidden("not_the_author", "You can only change your own reviews"));
    }
    Ok(review)
}

#[derive(Debug, Deserialize)]
struct NewReview {
    #[serde(alias = "bookId")]
    book_id: String,
    rating: Option<i64>,
    content: Option<String>,
}

#[debug_handler(state = AppState)]
async fn create_review(
    State(db_pool): State<SqlitePool>,
    State(catalog): State<Arc<dyn Catalog>>,
    State(settings): State<CatalogSettings>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiJson(new_review): ApiJson<NewReview>,
) -> AppResult<(StatusCode, Json<Review>)> {
    let rating = check_rating(new_review.rating)?;
    let content = check_content(new_review.content)?;
    let book = ensure_book(&db_pool, catalog.as_ref(), &settings, new_review.book_id.trim()).await?;

    let inserted = sqlx::query_as::<_, Review>(
        "INSERT INTO reviews (id,book_id,user_id,rating,content,created_at) \
         VALUES (?,?,?,?,?,?) RETURNING *",
    )
    .bind(db::new_id())
    .bind(&book.id)
    .bind(&user.id)
    .bind(rating)
    .bind(&content)
    .bind(Timestamp::now())
    .fetch_one(&db_pool)
    .await;

    let review = match inserted {
        Ok(review) => review,
        Err(err) if db::is_unique_violation(&err) => {
            return Err(AppError::conflict(
                "already_reviewed",
                "You have already reviewed this book",
            ));
        }
        Err(err) => return Err(err.into()),
    };

    realtime.publish(Topic::reviews(&review.book_id), EventKind::Insert, &review);
    Ok((StatusCode::CREATED, Json(review)))
}

#[debug_handler(state = AppState)]
async fn review_details(
    State(db_pool): State<SqlitePool>,
    ApiPath(id): ApiPath<String>,
) -> AppResult<Json<Review>> {
    Ok(Json(find(&db_pool, &id).await?))
}

#[derive(Debug, Deserialize)]
struct ReviewPatch {
    rating: Option<i64>,
    content: Option<String>,
}

#[debug_handler(state = AppState)]
async fn update_review(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(patch): ApiJson<ReviewPatch>,
) -> AppResult<Json<Review>> {
    let rating = check_rating(patch.rating)?;
    let content = check_content(patch.content)?;
    find_own(&db_pool, &id, &user.id).await?;

    let review: Review = sqlx::query_as(
        "UPDATE reviews SET rating=COALESCE(?,rating),content=COALESCE(?,content),updated_at=? \
         WHERE id=? RETURNING *",
    )
    .bind(rating)
    .bind(&content)
    .bind(Timestamp::now())
    .bind(&id)
    .fetch_optional(&db_pool)
    .await?
    .ok_or_else(|| AppError::not_found("review_not_found", "Review not found"))?;

    realtime.publish(Topic::reviews(&review.book_id), EventKind::Update, &review);
    Ok(Json(review))
}

#[derive(Debug, Serialize)]
struct Deleted {
    id: String,
}

#[debug_handler(state = AppState)]
async fn delete_review(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> AppResult<Json<Deleted>> {
    let review = find_own(&db_pool, &id, &user.id).await?;

    sqlx::query("DELETE FROM reviews WHERE id=?")
        .bind(&id)
        .execute(&db_pool)
        .await?;

    let deleted = Deleted { id };
    realtime.publish(Topic::reviews(&review.book_id), EventKind::Delete, &deleted);
    Ok(Json(deleted))
}

#[derive(Debug, Default, Deserialize)]
struct ReviewFilters {
    #[serde(alias = "userId")]
    user_id: Option<String>,
    rating: Option<i64>,
    min_rating: Option<i64>,
    max_rating: Option<i64>,
}

impl ReviewFilters {
    fn filters(self, book_id: String) -> AppResult<Filters> {
        for bound in [self.rating, self.min_rating, self.max_rating] {
            check_rating(bound)?;
        }
        Ok(Filters::new()
            .eq("book_id", book_id)
            .eq_opt("user_id", self.user_id)
            .eq_opt("rating", self.rating)
            .at_least("rating", self.min_rating)
            .at_most("rating", self.max_rating))
    }
}

#[debug_handler(state = AppState)]
async fn list_reviews(
    State(db_pool): State<SqlitePool>,
    ApiPath(book_id): ApiPath<String>,
    ApiQuery(filters): ApiQuery<ReviewFilters>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> AppResult<Json<Page<Review>>> {
    let request = params.into_request()?;
    let filters = filters.filters(book_id)?;
    Ok(Json(pagination::list(&db_pool, &filters, &request).await?))
}
