pub mod appresult;
pub mod auth;
pub mod books;
pub mod config;
pub mod db;
pub mod extract;
pub mod groups;
pub mod health;
pub mod library;
pub mod messages;
pub mod pagination;
pub mod realtime;
pub mod reviews;
pub mod timestamp;

use std::sync::Arc;

use axum::{extract::FromRef, routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use appresult::{AppError, AppResult};
pub use timestamp::Timestamp;

use auth::IdentityProvider;
use books::catalog::Catalog;
use config::CatalogSettings;
use realtime::Realtime;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub catalog: Arc<dyn Catalog>,
    pub identity: Arc<dyn IdentityProvider>,
    pub realtime: Realtime,
    pub catalog_settings: CatalogSettings,
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(self
            .get(field)
            .ok_or(format!("expected {field} in {self}"))?
            .as_str()
            .ok_or(format!("expected {field} in {self} to be string"))?
            .to_owned())
    }
}

/// The whole HTTP surface, ready to serve.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health::health))
        .nest("/books", books::router())
        .nest("/groups", groups::router())
        .nest("/messages", messages::router())
        .nest("/reviews", reviews::router())
        .nest("/library", library::router())
        .nest("/realtime", realtime::router());

    Router::new()
        .nest("/api", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
