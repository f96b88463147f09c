use futures_util::future::join_all;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::{
    config::CatalogSettings,
    pagination::{self, Filters, Page, PageRequest, Pagination},
    AppError, AppResult,
};

use super::{
    catalog::{self, Catalog},
    normalize::normalize,
    store, Book,
};

pub const MIN_QUERY_LEN: usize = 2;

/// Book search filters, shared by the basic and advanced search routes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchCriteria {
    pub query: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub language: Option<String>,
}

impl SearchCriteria {
    /// The trimmed free-text query, required to be at least two characters.
    pub fn text(&self) -> AppResult<&str> {
        match self.query.as_deref().map(str::trim) {
            Some(text) if text.chars().count() >= MIN_QUERY_LEN => Ok(text),
            _ => Err(AppError::validation(
                "invalid_query",
                format!("Query must be at least {MIN_QUERY_LEN} characters long"),
            )),
        }
    }

    fn filters(&self, text: &str) -> Filters {
        let genres: Vec<String> = self.genre.iter().map(|genre| genre.trim().to_owned()).collect();
        Filters::new()
            .contains(&["title", "author", "description"], Some(text))
            .contains(&["author"], self.author.as_deref())
            .overlaps("genres", &genres)
            .eq_opt("language", self.language.clone())
    }
}

/// Local search first; a search with nothing cached falls back to the catalog.
pub async fn search(
    db_pool: &SqlitePool,
    catalog: &dyn Catalog,
    settings: &CatalogSettings,
    criteria: &SearchCriteria,
    request: &PageRequest,
) -> AppResult<Page<Book>> {
    let text = criteria.text()?;
    let page = pagination::list::<Book>(db_pool, &criteria.filters(text), request).await?;
    if !local_miss(request, &page) {
        return Ok(page);
    }

    info!(query = text, "no cached books, asking the catalog");
    let data = fetch_and_persist(db_pool, catalog, settings, text).await?;
    Ok(Page {
        pagination: Pagination::single(request.limit(), data.len()),
        data,
    })
}

/// Whether the filtered local set is known to be empty, as opposed to the
/// caller having paged past its end.
fn local_miss<T>(request: &PageRequest, page: &Page<T>) -> bool {
    match request {
        PageRequest::Offset { .. } => page.pagination.total == Some(0),
        PageRequest::Cursor { after, .. } => after.is_none() && page.data.is_empty(),
    }
}

/// One bounded catalog search; each hit is normalized and cached.
///
/// Hits that fail to persist are left out of the result.
pub async fn fetch_and_persist(
    db_pool: &SqlitePool,
    catalog: &dyn Catalog,
    settings: &CatalogSettings,
    text: &str,
) -> AppResult<Vec<Book>> {
    let volumes =
        catalog::bounded(settings.timeout, catalog.search(text, settings.batch_size)).await?;

    let persisted = join_all(volumes.into_iter().map(|volume| async move {
        let book = normalize(volume);
        let id = book.id.clone();
        (id, store::ensure_persisted(db_pool, book).await)
    }))
    .await;

    Ok(persisted
        .into_iter()
        .filter_map(|(id, result)| match result {
            Ok(book) => Some(book),
            Err(err) => {
                warn!(book_id = %id, error = %err, "dropping catalog hit that failed to persist");
                None
            }
        })
        .collect())
}
