//! Microsoft Graph client for mail, To Do and webhook subscriptions.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, SecondsFormat, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{AccessTokenSource, Mailbox, ProviderError, Result, Subscriptions};
use crate::models::{CreatedTask, EmailMessage, ImageAttachment, NewTask, Subscription};

const MESSAGE_FIELDS: &str = "id,subject,body,from,receivedDateTime,hasAttachments";
const FILE_ATTACHMENT_TYPE: &str = "#microsoft.graph.fileAttachment";
/// Root of the mailbox folder hierarchy
const FOLDER_ROOT: &str = "msgfolderroot";
/// Subscriptions on messages live at most ~3 days
const SUBSCRIPTION_LIFETIME_DAYS: i64 = 2;

/// Client for the Graph endpoints of a single mailbox
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    tokens: Arc<dyn AccessTokenSource>,
}

#[derive(Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    /// Absolute URL of the next page, when the result is paged
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<GraphBody>,
    #[serde(default)]
    from: Option<GraphRecipient>,
    #[serde(default)]
    has_attachments: bool,
}

#[derive(Deserialize)]
struct GraphBody {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: GraphEmailAddress,
}

#[derive(Deserialize)]
struct GraphEmailAddress {
    #[serde(default)]
    address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment {
    #[serde(rename = "@odata.type", default)]
    odata_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    content_bytes: Option<String>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskList {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    wellknown_list_name: Option<String>,
}

#[derive(Deserialize)]
struct TodoTask {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<GraphBody>,
}

impl GraphClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        user: &str,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            tokens,
        }
    }

    fn user_url(&self, tail: &str) -> String {
        format!(
            "{}/users/{}/{}",
            self.base_url,
            urlencoding::encode(&self.user),
            tail
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let token = self.tokens.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = response.text().await.unwrap_or_default();

        Err(error_for_status(status, retry_after_secs, body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        response.json::<T>().await.map_err(ProviderError::from)
    }

    async fn find_child_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>> {
        let url = self.user_url(&format!(
            "mailFolders/{}/childFolders",
            urlencoding::encode(parent_id)
        ));
        let filter = format!("displayName eq '{}'", odata_quote(name));

        let folders: Collection<IdOnly> = self
            .send_json(
                self.http
                    .get(url)
                    .query(&[("$filter", filter.as_str()), ("$select", "id")]),
            )
            .await?;

        Ok(folders.value.into_iter().next().map(|f| f.id))
    }

    async fn create_child_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let url = self.user_url(&format!(
            "mailFolders/{}/childFolders",
            urlencoding::encode(parent_id)
        ));

        let folder: IdOnly = self
            .send_json(self.http.post(url).json(&json!({ "displayName": name })))
            .await?;

        Ok(folder.id)
    }

    /// Resolve a folder path like `Inbox/Invoices` to a folder id,
    /// creating any missing segment on the way down.
    pub async fn resolve_folder(&self, folder_path: &str) -> Result<String> {
        let mut current = FOLDER_ROOT.to_string();

        for segment in folder_path.split('/').map(str::trim).filter(|s| !s.is_empty()) {
            current = match self.find_child_folder(&current, segment).await? {
                Some(id) => id,
                None => {
                    tracing::info!("Folder '{}' not found under '{}', creating", segment, current);
                    self.create_child_folder(&current, segment).await?
                }
            };
        }

        if current == FOLDER_ROOT {
            return Err(ProviderError::Unexpected(format!(
                "folder path '{}' has no segments",
                folder_path
            )));
        }

        Ok(current)
    }

    async fn task_lists(&self) -> Result<Vec<TaskList>> {
        let lists: Collection<TaskList> =
            self.send_json(self.http.get(self.user_url("todo/lists"))).await?;
        Ok(lists.value)
    }

    async fn get_or_create_task_list(&self, name: &str) -> Result<String> {
        let lists = self.task_lists().await?;
        if let Some(list) = lists
            .iter()
            .find(|l| l.display_name.as_deref() == Some(name))
        {
            return Ok(list.id.clone());
        }

        tracing::info!("Task list '{}' not found, creating", name);
        let created: IdOnly = self
            .send_json(
                self.http
                    .post(self.user_url("todo/lists"))
                    .json(&json!({ "displayName": name })),
            )
            .await?;
        Ok(created.id)
    }

    async fn default_task_list(&self) -> Result<String> {
        let lists = self.task_lists().await?;
        lists
            .iter()
            .find(|l| l.wellknown_list_name.as_deref() == Some("defaultList"))
            .or_else(|| {
                lists
                    .iter()
                    .find(|l| l.wellknown_list_name.as_deref() == Some("default"))
            })
            .or_else(|| lists.first())
            .map(|l| l.id.clone())
            .ok_or_else(|| ProviderError::NotFound("no To Do task list available".to_string()))
    }

    /// Task in the list whose body references `message_id`, following every page
    async fn find_task_for_message(
        &self,
        list_id: &str,
        message_id: &str,
    ) -> Result<Option<TodoTask>> {
        let url = self.user_url(&format!("todo/lists/{}/tasks", urlencoding::encode(list_id)));
        let marker = format!("MessageID: {}", message_id);
        let mut request = self.http.get(url).query(&[("$top", "100")]);

        loop {
            let page: Collection<TodoTask> = self.send_json(request).await?;

            let found = page.value.into_iter().find(|task| {
                task.body
                    .as_ref()
                    .is_some_and(|body| body.content.lines().any(|line| line.trim() == marker))
            });
            if found.is_some() {
                return Ok(found);
            }

            match page.next_link {
                Some(next) => request = self.http.get(next),
                None => return Ok(None),
            }
        }
    }
}

/// Map a non-success status to an error kind
pub(crate) fn error_for_status(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: String,
) -> ProviderError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(detail),
        StatusCode::NOT_FOUND => ProviderError::NotFound(detail),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after_secs },
        s if s.is_server_error() => ProviderError::Transient(detail),
        _ => ProviderError::Unexpected(detail),
    }
}

fn odata_quote(value: &str) -> String {
    value.replace('\'', "''")
}

fn message_marker(message_id: &str) -> String {
    format!("Metadata:\nMessageID: {}", message_id)
}

/// JSON body for a new To Do task
pub(crate) fn task_payload(task: &NewTask) -> Value {
    let mut payload = json!({
        "title": task.title,
        "body": {
            "content": format!("{}\n\n{}", task.body, message_marker(&task.message_id)),
            "contentType": "text"
        }
    });

    if let Some(due) = task.due_date {
        payload["dueDateTime"] = json!({
            "dateTime": format!("{}T12:00:00", due.format("%Y-%m-%d")),
            "timeZone": "UTC"
        });
        payload["reminderDateTime"] = json!({
            "dateTime": format!("{}T14:00:00", reminder_date(due).format("%Y-%m-%d")),
            "timeZone": "UTC"
        });
        payload["isReminderOn"] = json!(true);
    }

    payload
}

fn reminder_date(due: NaiveDate) -> NaiveDate {
    due - Duration::days(2)
}

fn subscription_expiry() -> String {
    (Utc::now() + Duration::days(SUBSCRIPTION_LIFETIME_DAYS))
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl Mailbox for GraphClient {
    async fn fetch_message(&self, message_id: &str) -> Result<EmailMessage> {
        let url = self.user_url(&format!("messages/{}", urlencoding::encode(message_id)));

        let message: GraphMessage = self
            .send_json(
                self.http
                    .get(url)
                    .query(&[("$select", MESSAGE_FIELDS)])
                    .header("Prefer", "outlook.body-content-type=\"text\""),
            )
            .await?;

        Ok(EmailMessage {
            id: message.id,
            subject: message
                .subject
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "No Subject".to_string()),
            from: message.from.and_then(|f| f.email_address.address),
            body: message.body.map(|b| b.content).unwrap_or_default(),
            has_attachments: message.has_attachments,
        })
    }

    async fn list_image_attachments(&self, message_id: &str) -> Result<Vec<ImageAttachment>> {
        let url = self.user_url(&format!(
            "messages/{}/attachments",
            urlencoding::encode(message_id)
        ));

        let attachments: Collection<GraphAttachment> = self.send_json(self.http.get(url)).await?;

        Ok(attachments
            .value
            .into_iter()
            .filter(|a| a.odata_type == FILE_ATTACHMENT_TYPE)
            .filter_map(|a| {
                let content_type = a.content_type?;
                if !content_type.starts_with("image/") {
                    return None;
                }
                Some(ImageAttachment {
                    name: a.name.unwrap_or_else(|| "attachment".to_string()),
                    content_type,
                    content_base64: a.content_bytes?,
                })
            })
            .collect())
    }

    async fn move_message(&self, message_id: &str, folder_path: &str) -> Result<()> {
        let folder_id = self.resolve_folder(folder_path).await?;
        let url = self.user_url(&format!("messages/{}/move", urlencoding::encode(message_id)));

        self.send(
            self.http
                .post(url)
                .json(&json!({ "destinationId": folder_id })),
        )
        .await?;

        tracing::info!("Moved message {} to {}", message_id, folder_path);
        Ok(())
    }

    async fn create_task(&self, task: &NewTask) -> Result<CreatedTask> {
        let list_id = match self.get_or_create_task_list(&task.list_name).await {
            Ok(id) => id,
            Err(ProviderError::Unauthorized(e)) => return Err(ProviderError::Unauthorized(e)),
            Err(e) => {
                tracing::warn!(
                    "Could not use list '{}' ({}), falling back to default",
                    task.list_name,
                    e
                );
                self.default_task_list().await?
            }
        };

        if let Some(existing) = self.find_task_for_message(&list_id, &task.message_id).await? {
            tracing::info!(
                "Task {} already exists for message {}, skipping",
                existing.id,
                task.message_id
            );
            return Ok(CreatedTask {
                id: existing.id,
                title: existing.title,
                newly_created: false,
            });
        }

        let url = self.user_url(&format!("todo/lists/{}/tasks", urlencoding::encode(&list_id)));
        let created: TodoTask = self
            .send_json(self.http.post(url).json(&task_payload(task)))
            .await?;

        tracing::info!("Created task '{}' in list {}", task.title, list_id);
        Ok(CreatedTask {
            id: created.id,
            title: created.title,
            newly_created: true,
        })
    }
}

#[async_trait]
impl Subscriptions for GraphClient {
    async fn create_subscription(
        &self,
        notification_url: &str,
        client_state: &str,
    ) -> Result<Subscription> {
        let payload = json!({
            "changeType": "created",
            "notificationUrl": notification_url,
            "resource": format!("users/{}/mailFolders/Inbox/messages", self.user),
            "expirationDateTime": subscription_expiry(),
            "clientState": client_state,
            "includeResourceData": false
        });

        tracing::debug!("Creating subscription for {} -> {}", self.user, notification_url);

        let url = format!("{}/subscriptions", self.base_url);
        self.send_json(self.http.post(url).json(&payload)).await
    }

    async fn renew_all_subscriptions(&self) -> Result<usize> {
        let url = format!("{}/subscriptions", self.base_url);
        let subscriptions: Collection<Subscription> = self.send_json(self.http.get(url)).await?;

        let expiry = subscription_expiry();
        let renewals = subscriptions.value.iter().map(|sub| {
            let url = format!(
                "{}/subscriptions/{}",
                self.base_url,
                urlencoding::encode(&sub.id)
            );
            let request = self
                .http
                .patch(url)
                .json(&json!({ "expirationDateTime": expiry }));
            async move {
                match self.send(request).await {
                    Ok(_) => {
                        tracing::info!("Subscription {} renewed", sub.id);
                        true
                    }
                    Err(e) => {
                        tracing::error!("Error renewing subscription {}: {}", sub.id, e);
                        false
                    }
                }
            }
        });

        let results = futures::future::join_all(renewals).await;
        Ok(results.into_iter().filter(|renewed| *renewed).count())
    }
}
