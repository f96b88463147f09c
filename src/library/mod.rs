//! The caller's personal shelf, keyed by book id.

use std::{collections::HashMap, sync::Arc};

use axum::{debug_handler, extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::{
    auth::AuthUser,
    books::{self, catalog::Catalog, ensure_book, Book},
    config::CatalogSettings,
    db,
    extract::{ApiJson, ApiPath, ApiQuery},
    pagination::{self, Filters, Listable, Page, PageParams},
    reviews::check_rating,
    AppError, AppResult, AppState, Timestamp,
};

const MAX_NOTES: usize = 2000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ReadingStatus {
    #[default]
    WantToRead,
    CurrentlyReading,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct LibraryEntry {
    pub id: String,
    pub user_id: String,
    pub book_id: String,
    pub status: ReadingStatus,
    pub rating: Option<i64>,
    pub notes: Option<String>,
    pub added_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Listable for LibraryEntry {
    const TABLE: &'static str = "user_library";
    const SORT_KEY: &'static str = "added_at";

    fn sort_key(&self) -> Timestamp {
        self.added_at
    }
}

#[derive(Debug, Serialize)]
struct LibraryItem {
    #[serde(flatten)]
    entry: LibraryEntry,
    book: Option<Book>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_library).post(save_to_library))
        .route(
            "/{book_id}",
            get(library_item).patch(update_item).delete(remove_item),
        )
}

fn check_notes(notes: Option<String>) -> AppResult<Option<String>> {
    match notes {
        Some(text) if text.chars().count() > MAX_NOTES => Err(AppError::validation(
            "invalid_notes",
            format!("Notes must be at most {MAX_NOTES} characters"),
        )),
        other => Ok(other),
    }
}

#[derive(Debug, Default, Deserialize)]
struct EntryChanges {
    status: Option<ReadingStatus>,
    rating: Option<i64>,
    notes: Option<String>,
}

impl EntryChanges {
    fn checked(self) -> AppResult<EntryChanges> {
        Ok(EntryChanges {
            status: self.status,
            rating: check_rating(self.rating)?,
            notes: check_notes(self.notes)?,
        })
    }
}

/// Inserts or updates the caller's entry; fields left out keep their value.
async fn upsert(
    db_pool: &SqlitePool,
    user_id: &str,
    book_id: &str,
    changes: &EntryChanges,
) -> AppResult<LibraryEntry> {
    let now = Timestamp::now();
    Ok(sqlx::query_as(
        "INSERT INTO user_library (id,user_id,book_id,status,rating,notes,added_at,updated_at) \
         VALUES (?,?,?,?,?,?,?,?) \
         ON CONFLICT (user_id,book_id) DO UPDATE SET \
         status=COALESCE(?,user_library.status),rating=COALESCE(?,user_library.rating),\
         notes=COALESCE(?,user_library.notes),updated_at=excluded.updated_at \
         RETURNING *",
    )
    .bind(db::new_id())
    .bind(user_id)
    .bind(book_id)
    .bind(changes.status.unwrap_or_default())
    .bind(changes.rating)
    .bind(&changes.notes)
    .bind(now)
    .bind(now)
    .bind(changes.status)
    .bind(changes.rating)
    .bind(&changes.notes)
    .fetch_one(db_pool)
    .await?)
}

async fn find(db_pool: &SqlitePool, user_id: &str, book_id: &str) -> AppResult<LibraryEntry> {
    sqlx::query_as("SELECT * FROM user_library WHERE user_id=? AND book_id=?")
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(db_pool)
        .await?
        .ok_or_else(|| AppError::not_found("library_item_not_found", "Book is not in your library"))
}

async fn with_books(
    db_pool: &SqlitePool,
    entries: Vec<LibraryEntry>,
) -> AppResult<Vec<LibraryItem>> {
    let mut books: HashMap<String, Book> = HashMap::new();
    if !entries.is_empty() {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM books WHERE id IN (");
        let mut ids = query.separated(", ");
        for entry in &entries {
            ids.push_bind(entry.book_id.clone());
        }
        query.push(")");

        for book in query.build_query_as::<Book>().fetch_all(db_pool).await? {
            books.insert(book.id.clone(), book);
        }
    }

    Ok(entries
        .into_iter()
        .map(|entry| LibraryItem { book: books.get(&entry.book_id).cloned(), entry })
        .collect())
}

#[derive(Debug, Deserialize)]
struct SaveRequest {
    #[serde(alias = "bookId")]
    book_id: String,
    #[serde(flatten)]
    changes: EntryChanges,
}

#[debug_handler(state = AppState)]
async fn save_to_library(
    State(db_pool): State<SqlitePool>,
    State(catalog): State<Arc<dyn Catalog>>,
    State(settings): State<CatalogSettings>,
    AuthUser(user): AuthUser,
    ApiJson(SaveRequest { book_id, changes }): ApiJson<SaveRequest>,
) -> AppResult<Json<LibraryItem>> {
    let changes = changes.checked()?;
    let book = ensure_book(&db_pool, catalog.as_ref(), &settings, book_id.trim()).await?;

    let entry = upsert(&db_pool, &user.id, &book.id, &changes).await?;
    Ok(Json(LibraryItem { entry, book: Some(book) }))
}

#[derive(Debug, Default, Deserialize)]
struct LibraryFilters {
    status: Option<ReadingStatus>,
}

#[debug_handler(state = AppState)]
async fn list_library(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
    ApiQuery(LibraryFilters { status }): ApiQuery<LibraryFilters>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> AppResult<Json<Page<LibraryItem>>> {
    let request = params.into_request()?;
    let filters = Filters::new()
        .eq("user_id", user.id)
        .eq_opt("status", status.map(status_text));

    let page = pagination::list::<LibraryEntry>(&db_pool, &filters, &request).await?;
    let data = with_books(&db_pool, page.data).await?;
    Ok(Json(Page { data, pagination: page.pagination }))
}

fn status_text(status: ReadingStatus) -> &'static str {
    match status {
        ReadingStatus::WantToRead => "want_to_read",
        ReadingStatus::CurrentlyReading => "currently_reading",
        ReadingStatus::Completed => "completed",
        ReadingStatus::Abandoned => "abandoned",
    }
}

#[debug_handler(state = AppState)]
async fn library_item(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
    ApiPath(book_id): ApiPath<String>,
) -> AppResult<Json<LibraryItem>> {
    let entry = find(&db_pool, &user.id, &book_id).await?;
    let book = books::store::find(&db_pool, &entry.book_id).await?;
    Ok(Json(LibraryItem { entry, book }))
}

#[debug_handler(state = AppState)]
async fn update_item(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
    ApiPath(book_id): ApiPath<String>,
    ApiJson(changes): ApiJson<EntryChanges>,
) -> AppResult<Json<LibraryItem>> {
    let changes = changes.checked()?;
    find(&db_pool, &user.id, &book_id).await?;

    let entry = upsert(&db_pool, &user.id, &book_id, &changes).await?;
    let book = books::store::find(&db_pool, &book_id).await?;
    Ok(Json(LibraryItem { entry, book }))
}

#[derive(Debug, Serialize)]
struct Removed {
    book_id: String,
}

#[debug_handler(state = AppState)]
async fn remove_item(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
    ApiPath(book_id): ApiPath<String>,
) -> AppResult<Json<Removed>> {
    let result = sqlx::query("DELETE FROM user_library WHERE user_id=? AND book_id=?")
        .bind(&user.id)
        .bind(&book_id)
        .execute(&db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("library_item_not_found", "Book is not in your library"));
    }
    Ok(Json(Removed { book_id }))
}
