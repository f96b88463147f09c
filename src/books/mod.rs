pub mod catalog;
pub mod normalize;
pub mod search;
pub mod store;

use std::sync::Arc;

use axum::{debug_handler, extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, FromRow, SqlitePool};
use tracing::warn;

use crate::{
    config::CatalogSettings,
    extract::{ApiPath, ApiQuery},
    pagination::{Direction, Listable, Page, PageParams},
    AppError, AppResult, AppState, Timestamp,
};

use catalog::Catalog;
use search::SearchCriteria;

pub use store::ensure_book;

/// A cached catalog volume. `id` is the catalog's own id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub cover_image_url: Option<String>,
    pub genres: Option<SqlJson<Vec<String>>>,
    pub isbn: Option<String>,
    pub published_date: Option<String>,
    pub page_count: Option<i64>,
    pub language: String,
    pub created_at: Timestamp,
}

impl Listable for Book {
    const TABLE: &'static str = "books";
    const SORT_KEY: &'static str = "created_at";

    fn sort_key(&self) -> Timestamp {
        self.created_at
    }
}

/// A normalized volume that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBook {
    pub id: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub cover_image_url: Option<String>,
    pub genres: Option<Vec<String>>,
    pub isbn: Option<String>,
    pub published_date: Option<String>,
    pub page_count: Option<i64>,
    pub language: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/search", get(search_books))
        .route("/search/next", get(search_next))
        .route("/search/prev", get(search_prev))
        // older clients still call the advanced paths
        .route("/search/advanced", get(search_books))
        .route("/search/advanced/next", get(search_next))
        .route("/search/advanced/prev", get(search_prev))
        .route("/featured", get(featured))
        .route("/{id}", get(book_details))
}

#[debug_handler(state = AppState)]
async fn search_books(
    State(db_pool): State<SqlitePool>,
    State(catalog): State<Arc<dyn Catalog>>,
    State(settings): State<CatalogSettings>,
    ApiQuery(criteria): ApiQuery<SearchCriteria>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> AppResult<Json<Page<Book>>> {
    let request = params.into_request()?;
    let page = search::search(&db_pool, catalog.as_ref(), &settings, &criteria, &request).await?;
    Ok(Json(page))
}

#[debug_handler(state = AppState)]
async fn search_next(
    State(db_pool): State<SqlitePool>,
    State(catalog): State<Arc<dyn Catalog>>,
    State(settings): State<CatalogSettings>,
    ApiQuery(criteria): ApiQuery<SearchCriteria>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> AppResult<Json<Page<Book>>> {
    let request = params.with_direction(Direction::Next).into_request()?;
    let page = search::search(&db_pool, catalog.as_ref(), &settings, &criteria, &request).await?;
    Ok(Json(page))
}

#[debug_handler(state = AppState)]
async fn search_prev(
    State(db_pool): State<SqlitePool>,
    State(catalog): State<Arc<dyn Catalog>>,
    State(settings): State<CatalogSettings>,
    ApiQuery(criteria): ApiQuery<SearchCriteria>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> AppResult<Json<Page<Book>>> {
    let request = params.with_direction(Direction::Prev).into_request()?;
    let page = search::search(&db_pool, catalog.as_ref(), &settings, &criteria, &request).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
struct FeaturedQuery {
    query: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct Featured {
    data: Vec<Book>,
}

/// English catalog picks for the landing page, cached like search hits.
#[debug_handler(state = AppState)]
async fn featured(
    State(db_pool): State<SqlitePool>,
    State(catalog): State<Arc<dyn Catalog>>,
    State(settings): State<CatalogSettings>,
    ApiQuery(FeaturedQuery { query, limit }): ApiQuery<FeaturedQuery>,
) -> AppResult<Json<Featured>> {
    let query = query
        .map(|q| q.trim().to_owned())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| "fiction".to_owned());
    let limit = limit.unwrap_or(4);
    if !(1..=20).contains(&limit) {
        return Err(AppError::validation("invalid_limit", "limit must be between 1 and 20"));
    }

    let batch = settings.batch_size.max(limit as u32);
    let volumes = catalog::bounded(settings.timeout, catalog.search(&query, batch)).await?;

    let mut data = Vec::with_capacity(limit);
    for book in volumes
        .into_iter()
        .map(normalize::normalize)
        .filter(|book| book.language == normalize::DEFAULT_LANGUAGE)
    {
        if data.len() == limit {
            break;
        }
        let id = book.id.clone();
        match store::ensure_persisted(&db_pool, book).await {
            Ok(book) => data.push(book),
            Err(err) => {
                warn!(book_id = %id, error = %err, "dropping featured book that failed to persist")
            }
        }
    }

    Ok(Json(Featured { data }))
}

#[debug_handler(state = AppState)]
async fn book_details(
    State(db_pool): State<SqlitePool>,
    State(catalog): State<Arc<dyn Catalog>>,
    State(settings): State<CatalogSettings>,
    ApiPath(id): ApiPath<String>,
) -> AppResult<Json<Book>> {
    let id = id.trim();
    if id.chars().count() < 2 {
        return Err(AppError::validation("id_too_short", "ID must be at least 2 characters long"));
    }

    Ok(Json(ensure_book(&db_pool, catalog.as_ref(), &settings, id).await?))
}
