//! Per-message processing: fetch, classify, create task, file.

use std::sync::Arc;
use tracing::Instrument;

use crate::classifier::{prompt, ClassificationInput, Classifier, ClassifyError};
use crate::config::{CategoryConfig, TriageConfig};
use crate::gate::NotificationEvent;
use crate::models::{CreatedTask, EmailMessage, NewTask};
use crate::provider::{Mailbox, ProviderError};

/// Step at which processing stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    CreateTask,
    Move,
}

#[derive(Debug)]
pub enum Outcome {
    Filed {
        category: String,
        folder: String,
        task: Option<CreatedTask>,
    },
    Abandoned {
        stage: Stage,
        error: ProviderError,
    },
    /// Neither the suggested nor the default category is configured
    Unroutable,
}

pub struct Pipeline {
    mailbox: Arc<dyn Mailbox>,
    classifier: Arc<dyn Classifier>,
    config: Arc<TriageConfig>,
}

impl Pipeline {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        classifier: Arc<dyn Classifier>,
        config: Arc<TriageConfig>,
    ) -> Self {
        Self {
            mailbox,
            classifier,
            config,
        }
    }

    /// Run one event to completion. Failures are logged here and reported
    /// in the returned outcome; nothing is retried.
    pub async fn process(&self, event: NotificationEvent) -> Outcome {
        let span = tracing::info_span!(
            "pipeline",
            message_id = %event.message_id,
            subscription_id = event.subscription_id.as_deref().unwrap_or("-"),
            change_type = event.change_type.as_deref().unwrap_or("-"),
            correlation_id = %uuid::Uuid::new_v4()
        );

        self.run(&event.message_id).instrument(span).await
    }

    async fn run(&self, message_id: &str) -> Outcome {
        let message = match self.mailbox.fetch_message(message_id).await {
            Ok(message) => message,
            Err(error) => {
                match &error {
                    ProviderError::NotFound(_) => {
                        tracing::info!("Message no longer exists, skipping: {}", error)
                    }
                    e if e.needs_attention() => {
                        tracing::error!("Cannot fetch message, check credentials: {}", error)
                    }
                    _ => tracing::warn!("Failed to fetch message: {}", error),
                }
                return Outcome::Abandoned {
                    stage: Stage::Fetch,
                    error,
                };
            }
        };

        tracing::info!("Processing '{}'", message.subject);

        let image_descriptions = self.describe_images(&message).await;
        let input = ClassificationInput {
            subject: message.subject.clone(),
            body: message.body.clone(),
            image_descriptions,
        };

        let classification = match self.classifier.classify(&input).await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::error!("Classification failed, using default category: {}", e);
                None
            }
        };

        let suggested = classification.as_ref().and_then(|c| c.category.as_deref());
        let Some(category) = self.config.resolve(suggested) else {
            tracing::error!(
                "Default category '{}' is not configured, leaving message in place",
                self.config.default_category
            );
            return Outcome::Unroutable;
        };
        if suggested.map_or(true, |name| self.config.find(name).is_none()) {
            tracing::info!(
                "No configured category for {:?}, using default '{}'",
                suggested,
                category.name
            );
        }

        if let Some(c) = &classification {
            tracing::info!(
                category = %category.name,
                confidence = c.confidence,
                actionable = c.is_actionable,
                "Classified"
            );
        }

        // Only a successful classification can mark a message as not actionable
        let actionable = classification.as_ref().map_or(true, |c| c.is_actionable);

        let task = if category.create_task && actionable {
            let new_task = build_task(&message, category, classification.as_ref());
            match self.mailbox.create_task(&new_task).await {
                Ok(created) => Some(created),
                Err(error) => {
                    tracing::error!("Failed to create task: {}", error);
                    return Outcome::Abandoned {
                        stage: Stage::CreateTask,
                        error,
                    };
                }
            }
        } else {
            tracing::debug!(
                create_task = category.create_task,
                actionable,
                "No task for this message"
            );
            None
        };

        if let Err(error) = self.mailbox.move_message(&message.id, &category.folder).await {
            tracing::error!("Failed to move message to {}: {}", category.folder, error);
            return Outcome::Abandoned {
                stage: Stage::Move,
                error,
            };
        }

        tracing::info!("Filed into {}", category.folder);
        Outcome::Filed {
            category: category.name.clone(),
            folder: category.folder.clone(),
            task,
        }
    }

    async fn describe_images(&self, message: &EmailMessage) -> Vec<String> {
        if !message.has_attachments {
            return Vec::new();
        }

        let images = match self.mailbox.list_image_attachments(&message.id).await {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!("Could not list attachments, continuing without images: {}", e);
                return Vec::new();
            }
        };

        if !images.is_empty() {
            tracing::info!("Describing {} image attachment(s)", images.len());
        }

        let mut lines = Vec::with_capacity(images.len());
        for image in &images {
            let line = match self.classifier.describe_image(image).await {
                Ok(text) => prompt::image_line(&image.name, Some(&text)),
                Err(ClassifyError::VisionDisabled) => prompt::image_name_only(&image.name),
                Err(e) => {
                    tracing::warn!("Error describing image {}: {}", image.name, e);
                    prompt::image_line(&image.name, None)
                }
            };
            lines.push(line);
        }
        lines
    }
}

fn build_task(
    message: &EmailMessage,
    category: &CategoryConfig,
    classification: Option<&crate::classifier::Classification>,
) -> NewTask {
    let suggestion = classification.map(|c| &c.task);

    let title = suggestion
        .and_then(|t| t.title.clone())
        .unwrap_or_else(|| format!("Follow up: {}", message.subject));
    let summary = suggestion
        .and_then(|t| t.summary.as_deref())
        .unwrap_or("No summary provided.");

    NewTask {
        list_name: category.todo_list_name().to_string(),
        title,
        body: format!("Source Email: {}\nSummary: {}", message.subject, summary),
        due_date: suggestion.and_then(|t| t.due_date),
        message_id: message.id.clone(),
    }
}
