//! OpenAI-compatible text model plus Gemini vision model.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::prompt::{self, VISION_PROMPT};
use super::{parse_classification, Classification, ClassificationInput, Classifier, ClassifyError};
use crate::config::{LlmSettings, TriageConfig, VisionSettings};
use crate::models::ImageAttachment;

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 1000;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

pub struct LlmClassifier {
    http: reqwest::Client,
    llm: LlmSettings,
    vision: Option<VisionSettings>,
    system_prompt: String,
}

impl LlmClassifier {
    pub fn new(
        http: reqwest::Client,
        llm: LlmSettings,
        vision: Option<VisionSettings>,
        config: Arc<TriageConfig>,
    ) -> Self {
        Self {
            http,
            llm,
            vision,
            system_prompt: prompt::system_prompt(&config),
        }
    }

    async fn chat(&self, user_content: &str) -> Result<String, ClassifyError> {
        let url = format!("{}/chat/completions", self.llm.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.llm.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            response_format: json!({ "type": "json_object" }),
        };

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.llm.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClassifyError::Malformed("response has no message content".to_string()))
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn describe_image(&self, image: &ImageAttachment) -> Result<String, ClassifyError> {
        let vision = self.vision.as_ref().ok_or(ClassifyError::VisionDisabled)?;

        if STANDARD.decode(image.content_base64.as_bytes()).is_err() {
            return Err(ClassifyError::Malformed(format!(
                "attachment {} is not valid base64",
                image.name
            )));
        }

        let url = format!(
            "{}/models/{}:generateContent",
            vision.base_url.trim_end_matches('/'),
            vision.model
        );
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": VISION_PROMPT },
                    {
                        "inline_data": {
                            "mime_type": image.content_type,
                            "data": image.content_base64
                        }
                    }
                ]
            }]
        });

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &vision.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let generated: GenerateResponse = response.json().await?;
        let text = generated
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ClassifyError::Malformed("vision model returned no text".to_string()));
        }

        Ok(text.trim().to_string())
    }

    async fn classify(&self, input: &ClassificationInput) -> Result<Classification, ClassifyError> {
        let content = self.chat(&prompt::user_content(input)).await?;
        tracing::debug!("Model response: {}", content);
        parse_classification(&content)
    }
}
