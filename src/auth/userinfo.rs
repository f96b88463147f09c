use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use crate::{AppError, AppResult, GetField};

use super::{Claims, IdentityProvider};

/// Verifies tokens by presenting them to the issuer's userinfo endpoint.
pub struct UserinfoProvider {
    http_client: reqwest::Client,
    userinfo_url: String,
}

impl UserinfoProvider {
    pub fn new(userinfo_url: impl Into<String>) -> Result<UserinfoProvider, reqwest::Error> {
        let http_client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(UserinfoProvider { http_client, userinfo_url: userinfo_url.into() })
    }
}

#[async_trait]
impl IdentityProvider for UserinfoProvider {
    async fn verify(&self, token: &str) -> AppResult<Claims> {
        let response = self
            .http_client
            .get(&self.userinfo_url)
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AppError::Unauthorized("Invalid or expired token".to_owned()));
            }
            status if !status.is_success() => {
                return Err(format!("identity provider returned {status}").into());
            }
            _ => {}
        }

        let body: Value = response.json().await?;
        claims_from(&body)
    }
}

fn claims_from(body: &Value) -> AppResult<Claims> {
    let field = |name: &str| {
        body.get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    let name = [field("first_name"), field("last_name")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

    Ok(Claims {
        subject: body.get_str_field("sub")?,
        email: field("email"),
        name: Some(name).filter(|name| !name.is_empty()).or_else(|| field("name")),
        avatar_url: field("avatar_url").or_else(|| field("picture")),
    })
}
