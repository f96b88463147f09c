//! Write-once book cache keyed by catalog id.
//!
//! Nothing here locks. The primary key on `books.id` is the only arbiter between
//! concurrent writers; losing the insert race means someone else cached the row.

use sqlx::{types::Json, SqlitePool};
use tracing::debug;

use crate::{config::CatalogSettings, db, AppResult, Timestamp};

use super::{
    catalog::{self, Catalog},
    normalize::normalize,
    Book, NewBook,
};

pub async fn find(db_pool: &SqlitePool, id: &str) -> AppResult<Option<Book>> {
    Ok(sqlx::query_as("SELECT * FROM books WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await?)
}

/// Returns the cached row for `book.id`, inserting `book` if there is none.
///
/// An existing row is never overwritten.
pub async fn ensure_persisted(db_pool: &SqlitePool, book: NewBook) -> AppResult<Book> {
    if let Some(existing) = find(db_pool, &book.id).await? {
        return Ok(existing);
    }
    insert_or_refetch(db_pool, book).await
}

pub(crate) async fn insert_or_refetch(db_pool: &SqlitePool, book: NewBook) -> AppResult<Book> {
    let inserted = sqlx::query_as(
        "INSERT INTO books (id,title,author,description,cover_image_url,genres,isbn,\
         published_date,page_count,language,created_at) \
         VALUES (?,?,?,?,?,?,?,?,?,?,?) RETURNING *",
    )
    .bind(&book.id)
    .bind(&book.title)
    .bind(&book.author)
    .bind(&book.description)
    .bind(&book.cover_image_url)
    .bind(book.genres.as_ref().map(Json))
    .bind(&book.isbn)
    .bind(&book.published_date)
    .bind(book.page_count)
    .bind(&book.language)
    .bind(Timestamp::now())
    .fetch_one(db_pool)
    .await;

    match inserted {
        Ok(row) => Ok(row),
        Err(err) if db::is_unique_violation(&err) => {
            debug!(book_id = %book.id, "book cached concurrently, using stored row");
            find(db_pool, &book.id)
                .await?
                .ok_or_else(|| {
                    format!("book {} conflicted on insert but is not stored", book.id).into()
                })
        }
        Err(err) => Err(err.into()),
    }
}

/// Local row for `id`, fetched from the catalog and cached on a miss.
pub async fn ensure_book(
    db_pool: &SqlitePool,
    catalog: &dyn Catalog,
    settings: &CatalogSettings,
    id: &str,
) -> AppResult<Book> {
    if let Some(existing) = find(db_pool, id).await? {
        return Ok(existing);
    }

    let volume = catalog::bounded(settings.timeout, catalog.get_by_id(id)).await?;
    let mut book = normalize(volume);
    // the catalog may answer with a canonical id; cache under the requested one
    book.id = id.to_owned();
    insert_or_refetch(db_pool, book).await
}
