//! Text-generation backend.
//!
//! The pipeline only needs `generate_code(prompt) -> String`; the
//! [`CodeGenerator`] trait is that seam. [`OpenAiGenerator`] talks to any
//! OpenAI-compatible chat-completions endpoint and strips markdown fences
//! from the reply so the patch decoder sees bare file blocks.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::GenerationSettings;
use crate::errors::GenerationError;

/// Something that turns a prompt into generated source text.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate_code(&self, prompt: &str) -> Result<String, GenerationError>;
}

// Compile regexes once using LazyLock
static CODE_BLOCK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:\w+)?\n([\s\S]*?)\n```").unwrap());

/// Return the concatenated bodies of fenced code blocks, or `text` unchanged
/// when it has none.
pub fn strip_markdown(text: &str) -> String {
    let blocks: Vec<&str> = CODE_BLOCK_REGEX
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim())
        .filter(|body| !body.is_empty())
        .collect();

    if blocks.is_empty() {
        text.to_string()
    } else {
        blocks.join("\n")
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(settings: &GenerationSettings) -> Result<Self, GenerationError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(GenerationError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CodeGenerator for OpenAiGenerator {
    async fn generate_code(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "Requesting completion");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Generation backend returned error status");
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatResponse = resp.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)?;

        let extracted = strip_markdown(&content);
        debug!(chars = extracted.len(), "Extracted generated code");
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markdown_extracts_fenced_blocks() {
        let reply = "Sure!\n```ts\n~~a.ts\nconst a = 1;\n```\nand\n```\n~~b.ts\nconst b = 2;\n```\n";
        assert_eq!(strip_markdown(reply), "~~a.ts\nconst a = 1;\n~~b.ts\nconst b = 2;");
    }

    #[test]
    fn test_strip_markdown_passes_plain_text_through() {
        let reply = "~~a.ts\nconst a = 1;\n";
        assert_eq!(strip_markdown(reply), reply);
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let settings = GenerationSettings {
            api_key: None,
            ..GenerationSettings::default()
        };
        assert!(matches!(
            OpenAiGenerator::new(&settings),
            Err(GenerationError::MissingApiKey)
        ));
    }

    #[test]
    fn test_api_base_trailing_slash_is_trimmed() {
        let settings = GenerationSettings {
            api_key: Some("sk-test".into()),
            api_base: "http://localhost:8080/v1/".into(),
            ..GenerationSettings::default()
        };
        let generator = OpenAiGenerator::new(&settings).unwrap();
        assert_eq!(generator.api_base, "http://localhost:8080/v1");
        assert_eq!(generator.model(), "gpt-4o-mini");
    }
}
