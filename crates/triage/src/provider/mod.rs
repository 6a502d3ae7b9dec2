//! Mail and task provider access.
//!
//! The pipeline and bootstrap only see the [`Mailbox`] and [`Subscriptions`]
//! traits; [`graph::GraphClient`] is the Microsoft Graph implementation.

pub mod auth;
pub mod graph;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{CreatedTask, EmailMessage, ImageAttachment, NewTask, Subscription};

pub use auth::{AccessTokenSource, ClientCredentials};
pub use graph::GraphClient;

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Failure kinds surfaced by provider calls
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Credential rejected or permission missing (401/403)
    #[error("Authorization failed: {0}")]
    Unauthorized(String),

    /// Resource does not exist (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Provider throttled the request (429)
    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Network failure or provider-side error (5xx)
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Any other status or an undecodable response
    #[error("Unexpected provider response: {0}")]
    Unexpected(String),
}

impl ProviderError {
    /// Whether this failure should eventually reach an operator
    pub fn needs_attention(&self) -> bool {
        matches!(self, ProviderError::Unauthorized(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Unexpected(err.to_string())
        } else {
            ProviderError::Transient(err.to_string())
        }
    }
}

/// Mailbox and To Do operations used by the processing pipeline
#[async_trait]
pub trait Mailbox: Send + Sync {
    async fn fetch_message(&self, message_id: &str) -> Result<EmailMessage>;

    /// Image file attachments of a message
    async fn list_image_attachments(&self, message_id: &str) -> Result<Vec<ImageAttachment>>;

    /// Move a message into a folder path, creating missing folders
    async fn move_message(&self, message_id: &str, folder_path: &str) -> Result<()>;

    async fn create_task(&self, task: &NewTask) -> Result<CreatedTask>;
}

/// Webhook subscription management
#[async_trait]
pub trait Subscriptions: Send + Sync {
    async fn create_subscription(
        &self,
        notification_url: &str,
        client_state: &str,
    ) -> Result<Subscription>;

    /// Extend every active subscription; returns how many were renewed
    async fn renew_all_subscriptions(&self) -> Result<usize>;
}
