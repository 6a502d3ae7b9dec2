use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Email message fetched from the mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub id: String,
    pub subject: String,
    pub from: Option<String>,
    pub body: String,
    pub has_attachments: bool,
}

/// Image file attached to a message, content still base64-encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub name: String,
    pub content_type: String,
    pub content_base64: String,
}

/// Task to create in a To Do list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub list_name: String,
    pub title: String,
    pub body: String,
    pub due_date: Option<NaiveDate>,
    /// Source message, recorded in the task body so redeliveries are idempotent
    pub message_id: String,
}

/// Task as returned by the To Do service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTask {
    pub id: String,
    pub title: String,
    /// False when an existing task for the same message was reused
    pub newly_created: bool,
}

/// Webhook subscription as returned by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub expiration_date_time: Option<String>,
}
