//! Email classification with a language model.

pub mod llm;
pub mod prompt;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

use crate::models::ImageAttachment;

pub use llm::LlmClassifier;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Model returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed model response: {0}")]
    Malformed(String),

    #[error("Vision model is not configured")]
    VisionDisabled,
}

/// Everything the model sees about one email
#[derive(Debug, Clone, Default)]
pub struct ClassificationInput {
    pub subject: String,
    pub body: String,
    /// Already formatted `[Image: name] ...` lines
    pub image_descriptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestedTask {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Category named by the model; None when it declined to pick one
    pub category: Option<String>,
    pub confidence: f32,
    pub is_actionable: bool,
    pub task: SuggestedTask,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Describe an image attachment in plain text
    async fn describe_image(&self, image: &ImageAttachment) -> Result<String, ClassifyError>;

    async fn classify(&self, input: &ClassificationInput) -> Result<Classification, ClassifyError>;
}

#[derive(Deserialize)]
struct RawClassification {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    is_actionable: Option<bool>,
    #[serde(default)]
    task_title: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Parse the model's JSON answer, tolerating a fenced code block around it
pub fn parse_classification(content: &str) -> Result<Classification, ClassifyError> {
    let json = strip_code_fence(content);
    let raw: RawClassification = serde_json::from_str(json)
        .map_err(|e| ClassifyError::Malformed(format!("{}: {}", e, excerpt(content))))?;

    let due_date = raw
        .due_date
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("null"))
        .and_then(|d| match NaiveDate::parse_from_str(d, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                tracing::warn!("Ignoring unparsable due date '{}'", d);
                None
            }
        });

    Ok(Classification {
        category: non_empty(raw.category).filter(|c| !c.eq_ignore_ascii_case("null")),
        confidence: raw.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
        is_actionable: raw.is_actionable.unwrap_or(false),
        task: SuggestedTask {
            title: non_empty(raw.task_title),
            summary: non_empty(raw.summary),
            due_date,
        },
    })
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn excerpt(content: &str) -> String {
    content.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let result = parse_classification(
            r#"{"category": "Financial", "is_actionable": true, "task_title": "Pay invoice",
                "due_date": "2025-03-01", "summary": "Invoice 42 is due"}"#,
        )
        .unwrap();

        assert_eq!(result.category.as_deref(), Some("Financial"));
        assert_eq!(result.confidence, 1.0);
        assert!(result.is_actionable);
        assert_eq!(result.task.title.as_deref(), Some("Pay invoice"));
        assert_eq!(result.task.due_date, NaiveDate::from_ymd_opt(2025, 3, 1));
    }

    #[test]
    fn test_parse_fenced_json_with_null_category() {
        let result = parse_classification(
            "```json\n{\"category\": null, \"confidence\": 1.7, \"due_date\": \"null\"}\n```",
        )
        .unwrap();

        assert_eq!(result.category, None);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.task.due_date, None);
    }

    #[test]
    fn test_parse_ignores_bad_due_date() {
        let result =
            parse_classification(r#"{"category": "Social", "due_date": "next Friday"}"#).unwrap();
        assert_eq!(result.category.as_deref(), Some("Social"));
        assert_eq!(result.task.due_date, None);
    }

    #[test]
    fn test_parse_null_actionable_keeps_category() {
        let result = parse_classification(
            r#"{"category": "Financial", "confidence": null, "is_actionable": null}"#,
        )
        .unwrap();
        assert_eq!(result.category.as_deref(), Some("Financial"));
        assert!(!result.is_actionable);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_parse_rejects_prose() {
        let err = parse_classification("I think this is an invoice.").unwrap_err();
        assert!(matches!(err, ClassifyError::Malformed(_)));
    }
}
