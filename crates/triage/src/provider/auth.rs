//! Bearer token acquisition (OAuth 2.0 client credentials).

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{ProviderError, Result};
use crate::config::GraphSettings;

/// Refresh this long before the provider-reported expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Fixed token, for tests and for tokens minted outside the process
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Application token for the Graph API, cached until shortly before it expires
pub struct ClientCredentials {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentials {
    pub fn new(http: reqwest::Client, settings: &GraphSettings) -> Self {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            settings.authority_host.trim_end_matches('/'),
            settings.tenant_id
        );

        Self {
            http,
            token_url,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            scope: "https://graph.microsoft.com/.default".to_string(),
            cached: Mutex::new(None),
        }
    }

    async fn request_token(&self) -> Result<TokenResponse> {
        tracing::info!("No suitable token in cache, acquiring a new one");

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self.http.post(&self.token_url).form(&params).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<TokenResponse>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::error!("Token request failed ({}): {}", status, body);

        if status.is_server_error() {
            Err(ProviderError::Transient(format!("token endpoint returned {}", status)))
        } else {
            Err(ProviderError::Unauthorized(format!(
                "token endpoint returned {}: {}",
                status, body
            )))
        }
    }
}

#[async_trait]
impl AccessTokenSource for ClientCredentials {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.request_token().await?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: fresh.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(fresh.access_token)
    }
}
