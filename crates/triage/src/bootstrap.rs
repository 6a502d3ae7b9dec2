//! Startup: find the public webhook URL and register the subscription.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::config::EndpointSettings;
use crate::models::Subscription;
use crate::provider::Subscriptions;

/// Attempts and linear backoff step for the initial subscription
#[derive(Debug, Clone, Copy)]
pub struct SubscribeRetry {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for SubscribeRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Deserialize)]
struct NgrokTunnels {
    #[serde(default)]
    tunnels: Vec<NgrokTunnel>,
}

#[derive(Deserialize)]
struct NgrokTunnel {
    public_url: String,
    #[serde(default)]
    proto: String,
}

/// Notification URL to register, or None when subscription setup should be skipped
pub async fn resolve_notification_url(
    http: &reqwest::Client,
    endpoint: &EndpointSettings,
) -> Option<String> {
    if let Some(base) = &endpoint.webhook_url {
        tracing::info!("Using configured webhook URL: {}", base);
        return Some(webhook_path(base));
    }

    if endpoint.managed_runtime {
        tracing::warn!(
            "Running on a managed runtime but WEBHOOK_URL is not set, \
             skipping subscription creation"
        );
        return None;
    }

    match ngrok_public_url(http, &endpoint.ngrok_api_url).await {
        Ok(public_url) => {
            tracing::info!("Using ngrok tunnel {}", public_url);
            Some(webhook_path(&public_url))
        }
        Err(e) => {
            tracing::error!("Could not determine a public URL from ngrok: {:#}", e);
            None
        }
    }
}

fn webhook_path(base: &str) -> String {
    format!("{}/webhook", base.trim_end_matches('/'))
}

async fn ngrok_public_url(http: &reqwest::Client, api_url: &str) -> Result<String> {
    let url = format!("{}/api/tunnels", api_url.trim_end_matches('/'));

    let tunnels: NgrokTunnels = http
        .get(&url)
        .send()
        .await
        .with_context(|| format!("ngrok agent API not reachable at {}", url))?
        .error_for_status()
        .context("ngrok agent API returned an error")?
        .json()
        .await
        .context("Failed to parse ngrok tunnel list")?;

    tunnels
        .tunnels
        .into_iter()
        .find(|t| t.proto == "https" || t.public_url.starts_with("https://"))
        .map(|t| t.public_url)
        .context("ngrok has no https tunnel running")
}

/// Create the inbox subscription, retrying while the endpoint becomes reachable
pub async fn subscribe(
    subscriptions: &dyn Subscriptions,
    notification_url: &str,
    client_state: &str,
    retry: SubscribeRetry,
) -> Result<Subscription> {
    for attempt in 1..=retry.attempts {
        tracing::info!("Subscription attempt {}/{}", attempt, retry.attempts);

        match subscriptions
            .create_subscription(notification_url, client_state)
            .await
        {
            Ok(subscription) => {
                tracing::info!("Subscribed, subscription id {}", subscription.id);
                return Ok(subscription);
            }
            Err(e) => tracing::error!("Error creating subscription (attempt {}): {}", attempt, e),
        }

        if attempt < retry.attempts {
            let delay = retry.base_delay * attempt;
            tracing::info!("Retrying in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    bail!(
        "Failed to create subscription after {} attempts",
        retry.attempts
    )
}

/// Full bootstrap. Returns Ok when subscription setup is skipped.
pub async fn run(
    http: &reqwest::Client,
    endpoint: &EndpointSettings,
    subscriptions: &dyn Subscriptions,
    client_state: &str,
    retry: SubscribeRetry,
) -> Result<()> {
    let Some(url) = resolve_notification_url(http, endpoint).await else {
        tracing::info!("Skipping subscription creation (no notification URL)");
        return Ok(());
    };

    tracing::info!("Targeting notification URL: {}", url);
    subscribe(subscriptions, &url, client_state, retry).await?;
    Ok(())
}
