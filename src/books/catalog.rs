use std::{future::Future, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::{config::CatalogSettings, AppError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("volume {0} not found in the catalog")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => {
                AppError::not_found("book_not_found", format!("No book with id {id}"))
            }
            CatalogError::Unavailable(detail) => AppError::UpstreamUnavailable(detail),
        }
    }
}

/// External book metadata source.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<Volume>, CatalogError>;

    async fn get_by_id(&self, id: &str) -> Result<Volume, CatalogError>;
}

/// Bounds a catalog call; running out of time counts as an outage.
pub async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, CatalogError>>,
) -> Result<T, CatalogError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| CatalogError::Unavailable(format!("no answer within {timeout:?}")))?
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Volume {
    pub id: String,
    #[serde(rename = "volumeInfo", default)]
    pub volume_info: VolumeInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub title: Option<String>,
    pub authors: Option<Vec<String>>,
    pub description: Option<String>,
    pub image_links: Option<ImageLinks>,
    pub categories: Option<Vec<String>>,
    pub published_date: Option<String>,
    /// Kept loose; the catalog occasionally sends strings or floats here.
    pub page_count: Option<serde_json::Value>,
    pub language: Option<String>,
    pub industry_identifiers: Option<Vec<IndustryIdentifier>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLinks {
    pub thumbnail: Option<String>,
    pub small_thumbnail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndustryIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

/// Google Books volumes API.
pub struct GoogleBooks {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GoogleBooks {
    pub fn new(settings: &CatalogSettings) -> Result<GoogleBooks, reqwest::Error> {
        let http_client = reqwest::ClientBuilder::new()
            .timeout(settings.timeout)
            .build()?;

        Ok(GoogleBooks {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            api_key: settings.api_key.clone(),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.http_client.get(format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => request.query(&[("key", key)]),
            None => request,
        }
    }
}

fn unavailable(err: reqwest::Error) -> CatalogError {
    CatalogError::Unavailable(err.to_string())
}

#[async_trait]
impl Catalog for GoogleBooks {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<Volume>, CatalogError> {
        let response = self
            .request("/volumes")
            .query(&[("q", query.to_owned()), ("maxResults", max_results.min(40).to_string())])
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(CatalogError::Unavailable(format!("search returned {}", response.status())));
        }

        let body: SearchResponse = response.json().await.map_err(unavailable)?;
        Ok(body.items)
    }

    async fn get_by_id(&self, id: &str) -> Result<Volume, CatalogError> {
        let response = self
            .request(&format!("/volumes/{id}"))
            .send()
            .await
            .map_err(unavailable)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CatalogError::NotFound(id.to_owned())),
            status if !status.is_success() => {
                Err(CatalogError::Unavailable(format!("lookup of {id} returned {status}")))
            }
            _ => response.json().await.map_err(unavailable),
        }
    }
}
