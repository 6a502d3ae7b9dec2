//! Prompt assembly for the classification call.

use super::ClassificationInput;
use crate::config::TriageConfig;

const MAX_BODY_CHARS: usize = 15_000;
const MAX_TOTAL_CHARS: usize = 20_000;

pub const VISION_PROMPT: &str = "Describe this image in detail for the purpose of email \
context analysis. Focus on identifying text, people, objects, and the general mood.";

/// System prompt listing the configured categories and the expected JSON shape
pub fn system_prompt(config: &TriageConfig) -> String {
    let categories = config
        .categories
        .iter()
        .map(|c| format!("- {}: {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"{instructions}

Allowed Categories:
{categories}

Instructions:
- Analyze the email content and assign it to ONE of the allowed categories.
- If you are UNSURE or if the email does not fit any category clearly, set "category" to null.
  Do NOT guess.
- Determine if the email requires a manual action/task from the user.

Return ONLY valid JSON.
Structure:
{{
    "category": "category_name_or_null",
    "confidence": number between 0 and 1,
    "is_actionable": boolean,
    "task_title": "string or null",
    "due_date": "YYYY-MM-DD or null",
    "summary": "short summary including insight from images if relevant"
}}"#,
        instructions = config.llm_instructions.to_text(),
        categories = categories,
    )
}

/// User message for one email, truncated to keep the request within model limits
pub fn user_content(input: &ClassificationInput) -> String {
    let body = truncate(&input.body, MAX_BODY_CHARS, "\n...(truncated)...");
    let images = input.image_descriptions.join("\n\n");

    let content = format!(
        "Subject: {}\n\nBody:\n{}\n\nImage Descriptions:\n{}",
        input.subject, body, images
    );

    truncate(&content, MAX_TOTAL_CHARS, "\n...(truncated total)...")
}

/// Line merged into the classification context for one image
pub fn image_line(name: &str, description: Option<&str>) -> String {
    match description {
        Some(text) => format!("[Image: {}] Description: {}", name, text.trim()),
        None => format!("[Image: {}] (Error generating description)", name),
    }
}

/// Line for an image that was not sent to a vision model
pub fn image_name_only(name: &str) -> String {
    format!("[Image: {}]", name)
}

fn truncate(text: &str, max_chars: usize, marker: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], marker),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(body: String) -> ClassificationInput {
        ClassificationInput {
            subject: "Quarterly report".to_string(),
            body,
            image_descriptions: vec![image_line("chart.png", Some("A bar chart "))],
        }
    }

    #[test]
    fn test_system_prompt_lists_categories() {
        let prompt = system_prompt(&TriageConfig::example());
        assert!(prompt.starts_with("You are an assistant that triages a busy inbox."));
        assert!(prompt.contains("- Financial: Invoices, receipts and bank statements"));
        assert!(prompt.contains("\"due_date\": \"YYYY-MM-DD or null\""));
    }

    #[test]
    fn test_user_content_layout() {
        let content = user_content(&input("See attached.".to_string()));
        assert_eq!(
            content,
            "Subject: Quarterly report\n\nBody:\nSee attached.\n\nImage Descriptions:\n\
             [Image: chart.png] Description: A bar chart"
        );
    }

    #[test]
    fn test_long_body_is_truncated_with_marker() {
        let content = user_content(&input("é".repeat(MAX_BODY_CHARS + 50)));
        assert!(content.contains("\n...(truncated)...\n\nImage Descriptions:"));
        assert_eq!(content.matches('é').count(), MAX_BODY_CHARS);
    }

    #[test]
    fn test_total_is_truncated_after_images() {
        let mut long = input("short".to_string());
        long.image_descriptions = vec!["x".repeat(MAX_TOTAL_CHARS)];
        let content = user_content(&long);
        assert!(content.ends_with("\n...(truncated total)..."));
        assert_eq!(
            content.chars().count(),
            MAX_TOTAL_CHARS + "\n...(truncated total)...".chars().count()
        );
    }

    #[test]
    fn test_failed_image_line() {
        assert_eq!(
            image_line("scan.jpg", None),
            "[Image: scan.jpg] (Error generating description)"
        );
    }
}
