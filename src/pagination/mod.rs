//! Offset and cursor pagination over any listable table.
//!
//! Both modes compile the same [`Filters`] into the same `WHERE` clause, so the
//! mode only decides which window of the qualifying rows comes back.

pub mod cursor;
mod filter;

pub use filter::{Filters, Value};

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::{AppError, AppResult, Timestamp};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// A table whose rows are paged newest-first by a timestamp column.
pub trait Listable: for<'r> FromRow<'r, SqliteRow> + Send + Unpin {
    const TABLE: &'static str;
    const SORT_KEY: &'static str;

    fn sort_key(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Next,
    Prev,
}

/// Raw pagination query parameters shared by every list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    pub direction: Option<Direction>,
}

impl PageParams {
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Validates the parameters and decodes the cursor.
    ///
    /// Supplying a cursor or a direction selects cursor mode; mixing either
    /// with `page` is rejected.
    pub fn into_request(self) -> AppResult<PageRequest> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(AppError::validation(
                "invalid_limit",
                format!("limit must be between 1 and {MAX_LIMIT}"),
            ));
        }

        let cursor_mode = self.cursor.is_some() || self.direction.is_some();
        if cursor_mode && self.page.is_some() {
            return Err(AppError::validation(
                "mixed_pagination",
                "use either page or cursor/direction, not both",
            ));
        }

        if !cursor_mode {
            let page = self.page.unwrap_or(1);
            if page < 1 {
                return Err(AppError::validation("invalid_page", "page must be >= 1"));
            }
            return Ok(PageRequest::Offset { page, limit });
        }

        let after = match self.cursor.as_deref().filter(|token| !token.is_empty()) {
            Some(token) => Some(cursor::decode_timestamp(token)?),
            None => None,
        };
        Ok(PageRequest::Cursor {
            after,
            direction: self.direction.unwrap_or_default(),
            limit,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest {
    Offset {
        page: u32,
        limit: u32,
    },
    Cursor {
        /// Boundary decoded from the caller's cursor; `None` is the first page.
        after: Option<Timestamp>,
        direction: Direction,
        limit: u32,
    },
}

impl PageRequest {
    pub fn limit(&self) -> u32 {
        match *self {
            PageRequest::Offset { limit, .. } | PageRequest::Cursor { limit, .. } => limit,
        }
    }
}

/// Every field is always present; those that do not apply to the mode are null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: Option<u32>,
    pub limit: u32,
    pub total: Option<u64>,
    pub total_pages: Option<u64>,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
}

impl Pagination {
    fn offset(page: u32, limit: u32, total: u64) -> Self {
        let total_pages = total.div_ceil(u64::from(limit));
        Self {
            page: Some(page),
            limit,
            total: Some(total),
            total_pages: Some(total_pages),
            has_next: u64::from(page) < total_pages,
            has_prev: page > 1,
            next_cursor: None,
            prev_cursor: None,
        }
    }

    fn cursor(limit: u32, first: Option<Timestamp>, last: Option<Timestamp>) -> Self {
        let prev_cursor = first.map(cursor::encode);
        let next_cursor = last.map(cursor::encode);
        Self {
            page: None,
            limit,
            total: None,
            total_pages: None,
            has_next: next_cursor.is_some(),
            has_prev: prev_cursor.is_some(),
            next_cursor,
            prev_cursor,
        }
    }

    /// A complete result delivered as the first and only page.
    pub fn single(limit: u32, count: usize) -> Self {
        Self {
            page: Some(1),
            limit,
            total: Some(count as u64),
            total_pages: Some(1),
            has_next: false,
            has_prev: false,
            next_cursor: None,
            prev_cursor: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

/// Runs one windowed query (plus a count in offset mode).
///
/// Cursor pages come back newest-first in both directions, so `nextCursor`
/// always walks toward older rows and `prevCursor` toward newer ones.
pub async fn list<T: Listable>(
    db_pool: &SqlitePool,
    filters: &Filters,
    request: &PageRequest,
) -> AppResult<Page<T>> {
    match *request {
        PageRequest::Offset { page, limit } => {
            let mut count =
                QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) FROM {}", T::TABLE));
            filters.push_where(&mut count);
            let total: i64 = count.build_query_scalar::<i64>().fetch_one(db_pool).await?;

            let offset = u64::from(page - 1) * u64::from(limit);
            let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT * FROM {}", T::TABLE));
            filters.push_where(&mut query);
            query
                .push(format!(" ORDER BY {} DESC, rowid DESC LIMIT ", T::SORT_KEY))
                .push_bind(i64::from(limit))
                .push(" OFFSET ")
                .push_bind(i64::try_from(offset).unwrap_or(i64::MAX));
            let data = query.build_query_as::<T>().fetch_all(db_pool).await?;

            Ok(Page {
                data,
                pagination: Pagination::offset(page, limit, total.max(0) as u64),
            })
        }
        PageRequest::Cursor { after, direction, limit } => {
            let filters = match (after, direction) {
                (Some(at), Direction::Next) => filters.clone().before(T::SORT_KEY, at),
                (Some(at), Direction::Prev) => filters.clone().after(T::SORT_KEY, at),
                (None, _) => filters.clone(),
            };
            let order = match direction {
                Direction::Next => "DESC",
                Direction::Prev => "ASC",
            };

            let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT * FROM {}", T::TABLE));
            filters.push_where(&mut query);
            query
                .push(format!(" ORDER BY {key} {order}, rowid {order} LIMIT ", key = T::SORT_KEY))
                .push_bind(i64::from(limit));
            let mut data = query.build_query_as::<T>().fetch_all(db_pool).await?;
            if direction == Direction::Prev {
                data.reverse();
            }

            let pagination = Pagination::cursor(
                limit,
                data.first().map(|row| row.sort_key()),
                data.last().map(|row| row.sort_key()),
            );
            Ok(Page { data, pagination })
        }
    }
}
