use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use triage::bootstrap::{self, SubscribeRetry};
use triage::classifier::LlmClassifier;
use triage::gate::NotificationGate;
use triage::provider::{AccessTokenSource, ClientCredentials, GraphClient};
use triage::services::{Pipeline, SpawnSink};
use triage::{build_router, AppConfig, AppState, TriageConfig};

/// Upper bound for any single outbound HTTP request
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "triage=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let triage_config = Arc::new(TriageConfig::load(&config.config_path)?);
    tracing::info!(
        "Loaded {} categories from {} (default '{}')",
        triage_config.categories.len(),
        config.config_path.display(),
        triage_config.default_category
    );

    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let tokens = Arc::new(ClientCredentials::new(http.clone(), &config.graph));
    tokens
        .access_token()
        .await
        .context("Failed to acquire a Graph access token")?;

    let graph = Arc::new(GraphClient::new(
        http.clone(),
        &config.graph.base_url,
        &config.target_email,
        tokens,
    ));

    if config.vision.is_none() {
        tracing::warn!("GOOGLE_API_KEY not set, image attachments will not be described");
    }
    let classifier = Arc::new(LlmClassifier::new(
        http.clone(),
        config.llm.clone(),
        config.vision.clone(),
        triage_config.clone(),
    ));

    let pipeline = Arc::new(Pipeline::new(graph.clone(), classifier, triage_config));
    let gate = Arc::new(NotificationGate::new(
        &config.client_state,
        config.dedup,
        Arc::new(SpawnSink::new(pipeline)),
    ));

    let state = AppState {
        gate,
        subscriptions: graph.clone(),
        client_state: Arc::from(config.client_state.as_str()),
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on {}", addr);

    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    bootstrap::run(
        &http,
        &config.endpoint,
        graph.as_ref(),
        &config.client_state,
        SubscribeRetry::default(),
    )
    .await
    .context("Bootstrap failed")?;

    server.await.context("Server task failed")??;
    Ok(())
}
