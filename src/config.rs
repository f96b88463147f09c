use std::{str::FromStr, time::Duration};

use anyhow::Context;

const DEFAULT_CATALOG_URL: &str = "https://www.googleapis.com/books/v1";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub max_connections: u32,
    pub auth_userinfo_url: String,
    pub catalog: CatalogSettings,
}

/// How the service talks to the external book catalog.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Hits requested per fallback search.
    pub batch_size: u32,
    pub timeout: Duration,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CATALOG_URL.to_owned(),
            api_key: None,
            batch_size: 10,
            timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        // a missing .env file is fine, the process environment still applies
        let _ = dotenv::dotenv();

        let defaults = CatalogSettings::default();
        Ok(Config {
            database_url: dotenv::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:3000".to_owned())?,
            max_connections: var_or("DATABASE_MAX_CONNECTIONS", 16)?,
            auth_userinfo_url: dotenv::var("AUTH_USERINFO_URL")
                .context("AUTH_USERINFO_URL must be set")?,
            catalog: CatalogSettings {
                base_url: var_or("CATALOG_BASE_URL", defaults.base_url)?,
                api_key: dotenv::var("CATALOG_API_KEY").ok().filter(|key| !key.is_empty()),
                batch_size: var_or("CATALOG_BATCH_SIZE", defaults.batch_size)?,
                timeout: Duration::from_secs(var_or(
                    "CATALOG_TIMEOUT_SECS",
                    defaults.timeout.as_secs(),
                )?),
            },
        })
    }
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
