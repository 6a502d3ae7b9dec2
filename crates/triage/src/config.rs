//! Process configuration.
//!
//! Secrets and runtime knobs come from the environment ([`AppConfig`]); the
//! category routing table comes from a JSON or TOML file ([`TriageConfig`]).
//! Both are loaded once at startup and never change afterwards.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub config_path: PathBuf,
    /// Mailbox (UPN) whose inbox is triaged
    pub target_email: String,
    /// Shared secret echoed back in every notification
    pub client_state: String,
    pub graph: GraphSettings,
    pub llm: LlmSettings,
    pub vision: Option<VisionSettings>,
    pub endpoint: EndpointSettings,
    pub dedup: DedupSettings,
}

#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub base_url: String,
    pub authority_host: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// OpenAI-compatible API root, e.g. `https://api.groq.com/openai/v1`
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// Where the publicly reachable webhook URL comes from
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub webhook_url: Option<String>,
    /// Set when running on Cloud Run (`K_SERVICE`)
    pub managed_runtime: bool,
    pub ngrok_api_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupSettings {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300), // 5 minutes
            max_entries: 10_000,
        }
    }
}

impl DedupSettings {
    /// Load dedup policy from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ttl_secs = env::var("DEDUP_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.ttl.as_secs());

        let max_entries = env::var("DEDUP_MAX_ENTRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.max_entries);

        Self {
            ttl: Duration::from_secs(ttl_secs),
            max_entries,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let vision = match optional("GOOGLE_API_KEY") {
            Some(api_key) => Some(VisionSettings {
                base_url: optional("VISION_BASE_URL").unwrap_or_else(|| {
                    "https://generativelanguage.googleapis.com/v1beta".to_string()
                }),
                api_key,
                model: optional("VISION_MODEL")
                    .unwrap_or_else(|| "gemini-2.0-flash-lite".to_string()),
            }),
            None => None,
        };

        Ok(Self {
            port: optional("PORT")
                .unwrap_or_else(|| "8000".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            config_path: optional("CONFIG_PATH")
                .unwrap_or_else(|| "config.json".to_string())
                .into(),
            target_email: required("TARGET_EMAIL")?,
            client_state: required("CLIENT_STATE")?,
            graph: GraphSettings {
                base_url: optional("GRAPH_BASE_URL")
                    .unwrap_or_else(|| "https://graph.microsoft.com/v1.0".to_string()),
                authority_host: optional("AUTHORITY_HOST")
                    .unwrap_or_else(|| "https://login.microsoftonline.com".to_string()),
                tenant_id: required("TENANT_ID")?,
                client_id: required("CLIENT_ID")?,
                client_secret: required("CLIENT_SECRET")?,
            },
            llm: LlmSettings {
                base_url: optional("LLM_BASE_URL")
                    .unwrap_or_else(|| "https://api.groq.com/openai/v1".to_string()),
                api_key: required("GROQ_API_KEY")?,
                model: optional("TEXT_MODEL").unwrap_or_else(|| "openai/gpt-oss-120b".to_string()),
            },
            vision,
            endpoint: EndpointSettings {
                webhook_url: optional("WEBHOOK_URL"),
                managed_runtime: optional("K_SERVICE").is_some(),
                ngrok_api_url: optional("NGROK_API_URL")
                    .unwrap_or_else(|| "http://127.0.0.1:4040".to_string()),
            },
            dedup: DedupSettings::from_env(),
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String> {
    optional(name).with_context(|| format!("{} must be set", name))
}

// ============================================================================
// Category routing file
// ============================================================================

/// Free-form instructions prepended to the classification prompt.
///
/// Accepts either a single string or a list of lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Instructions {
    Lines(Vec<String>),
    Text(String),
}

impl Default for Instructions {
    fn default() -> Self {
        Instructions::Lines(Vec::new())
    }
}

impl Instructions {
    pub fn to_text(&self) -> String {
        match self {
            Instructions::Lines(lines) => lines.join("\n"),
            Instructions::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,

    /// What belongs in this category; shown to the model verbatim
    #[serde(default)]
    pub description: String,

    /// Mail folder path, e.g. `Inbox/Invoices`
    #[serde(alias = "folder_name")]
    pub folder: String,

    /// To Do list name; defaults to the last folder segment
    #[serde(default)]
    pub todo_list: Option<String>,

    /// Whether messages in this category produce a task
    #[serde(default = "default_create_task")]
    pub create_task: bool,
}

fn default_create_task() -> bool {
    true
}

impl CategoryConfig {
    pub fn todo_list_name(&self) -> &str {
        match self.todo_list.as_deref().map(str::trim) {
            Some(list) if !list.is_empty() => list,
            _ => self
                .folder
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(&self.folder),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default)]
    pub llm_instructions: Instructions,

    /// Category used whenever classification does not name a configured one
    pub default_category: String,

    pub categories: Vec<CategoryConfig>,
}

impl TriageConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let config: TriageConfig = if is_toml {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            bail!("at least one category must be configured");
        }

        let mut seen = HashSet::new();
        for category in &self.categories {
            let key = category.name.trim().to_lowercase();
            if key.is_empty() {
                bail!("category names cannot be empty");
            }
            if category.folder.trim().is_empty() {
                bail!("category '{}' has no folder", category.name);
            }
            if !seen.insert(key) {
                bail!("duplicate category '{}'", category.name);
            }
        }

        if self.find(&self.default_category).is_none() {
            bail!(
                "default_category '{}' is not one of the configured categories",
                self.default_category
            );
        }

        Ok(())
    }

    /// Case-insensitive lookup by category name
    pub fn find(&self, name: &str) -> Option<&CategoryConfig> {
        let name = name.trim();
        self.categories
            .iter()
            .find(|c| c.name.trim().eq_ignore_ascii_case(name))
    }

    /// Configured category for `name`, or the default category.
    ///
    /// Only None for a config that would fail [`TriageConfig::validate`].
    pub fn resolve(&self, name: Option<&str>) -> Option<&CategoryConfig> {
        name.and_then(|n| self.find(n))
            .or_else(|| self.find(&self.default_category))
    }

    pub fn example() -> Self {
        TriageConfig {
            llm_instructions: Instructions::Lines(vec![
                "You are an assistant that triages a busy inbox.".to_string(),
            ]),
            default_category: "Important".to_string(),
            categories: vec![
                CategoryConfig {
                    name: "Important".to_string(),
                    description: "Anything that needs a human decision".to_string(),
                    folder: "Inbox/Important".to_string(),
                    todo_list: None,
                    create_task: true,
                },
                CategoryConfig {
                    name: "Financial".to_string(),
                    description: "Invoices, receipts and bank statements".to_string(),
                    folder: "Inbox/Invoices".to_string(),
                    todo_list: Some("Finance".to_string()),
                    create_task: true,
                },
                CategoryConfig {
                    name: "Social".to_string(),
                    description: "Newsletters and social network updates".to_string(),
                    folder: "Inbox/Social".to_string(),
                    todo_list: None,
                    create_task: false,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_todo_list_defaults_to_last_folder_segment() {
        let config = TriageConfig::example();
        assert_eq!(config.find("important").unwrap().todo_list_name(), "Important");
        assert_eq!(config.find("Financial").unwrap().todo_list_name(), "Finance");
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let config = TriageConfig::example();
        assert_eq!(config.resolve(Some(" social ")).unwrap().name, "Social");
        assert_eq!(config.resolve(Some("Travel")).unwrap().name, "Important");
        assert_eq!(config.resolve(None).unwrap().name, "Important");
    }

    #[test]
    fn test_resolve_on_unvalidated_config_does_not_panic() {
        let config: TriageConfig =
            serde_json::from_str(r#"{"default_category": "Missing", "categories": []}"#).unwrap();
        assert!(config.resolve(Some("Anything")).is_none());
        assert!(config.resolve(None).is_none());
    }

    #[test]
    fn test_json_config_with_instruction_list() {
        let json = r#"{
            "llm_instructions": ["line one", "line two"],
            "default_category": "DIA",
            "categories": [
                {"name": "DIA", "description": "PhD work", "folder_name": "Reader/DIA"}
            ]
        }"#;
        let config: TriageConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.llm_instructions.to_text(), "line one\nline two");
        let dia = config.find("DIA").unwrap();
        assert_eq!(dia.folder, "Reader/DIA");
        assert!(dia.create_task);
    }

    #[test]
    fn test_toml_config_with_text_instructions() {
        let text = r#"
            llm_instructions = "Be terse."
            default_category = "Work"

            [[categories]]
            name = "Work"
            folder = "Inbox/Work"
            create_task = false
        "#;
        let config: TriageConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.llm_instructions.to_text(), "Be terse.");
        assert!(!config.categories[0].create_task);
    }

    #[test]
    fn test_validate_rejects_unknown_default() {
        let mut config = TriageConfig::example();
        config.default_category = "Missing".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default_category"));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut config = TriageConfig::example();
        let mut dup = config.categories[0].clone();
        dup.name = "IMPORTANT".to_string();
        config.categories.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_picks_format_from_extension() {
        let dir = std::env::temp_dir().join(format!("triage-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let json_path = dir.join("config.json");
        std::fs::write(
            &json_path,
            serde_json::to_string(&TriageConfig::example()).unwrap(),
        )
        .unwrap();
        assert_eq!(TriageConfig::load(&json_path).unwrap().categories.len(), 3);

        let toml_path = dir.join("config.toml");
        std::fs::write(&toml_path, toml::to_string(&TriageConfig::example()).unwrap()).unwrap();
        assert_eq!(TriageConfig::load(&toml_path).unwrap().default_category, "Important");

        std::fs::remove_dir_all(&dir).ok();
    }
}
