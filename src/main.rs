use std::sync::Arc;

use anyhow::Context;
use shelfmates::{
    auth::UserinfoProvider, books::catalog::GoogleBooks, config::Config, db, realtime::Realtime,
    AppState,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("shelfmates=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let db_pool = db::connect(&config.database_url, config.max_connections)
        .await
        .context("could not open the database")?;

    let app_state = AppState {
        db_pool,
        catalog: Arc::new(GoogleBooks::new(&config.catalog)?),
        identity: Arc::new(UserinfoProvider::new(&config.auth_userinfo_url)?),
        realtime: Realtime::default(),
        catalog_settings: config.catalog.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("could not bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, shelfmates::app(app_state)).await?;
    Ok(())
}
