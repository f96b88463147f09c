use axum::{debug_handler, extract::State, http::StatusCode, Json};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct Health {
    ok: bool,
}

#[debug_handler(state = crate::AppState)]
pub async fn health(State(db_pool): State<SqlitePool>) -> (StatusCode, Json<Health>) {
    match sqlx::query("SELECT 1").execute(&db_pool).await {
        Ok(_) => (StatusCode::OK, Json(Health { ok: true })),
        Err(err) => {
            warn!(error = %err, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(Health { ok: false }))
        }
    }
}
