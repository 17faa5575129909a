// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text generation providers used for cover letters.

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::embedding::provider::{bearer_headers, retry_backoff, run_json_command, should_retry};

/// A single generation call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Trait for text generation backends.
pub trait TextGenerator: Send {
    fn model_id(&self) -> &str;

    fn generate(&mut self, request: &GenerationRequest) -> Result<String>;
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: usize,
}

impl OpenAiGenerator {
    pub fn new(api_key: &str, base_url: &str, model: String, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing generation API key");
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(bearer_headers(api_key)?)
            .build()
            .context("failed to build generation HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            max_retries: 3,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
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

impl TextGenerator for OpenAiGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn generate(&mut self, request: &GenerationRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
        };

        let mut attempt = 0usize;
        loop {
            let resp = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .context("failed to call chat completions")?;
            let status = resp.status();
            if status.is_success() {
                let parsed: ChatResponse =
                    resp.json().context("failed to parse chat completion")?;
                return parsed
                    .choices
                    .into_iter()
                    .find_map(|choice| choice.message.content)
                    .ok_or_else(|| anyhow::anyhow!("chat completion returned no content"));
            }
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            if should_retry(status) && attempt + 1 < self.max_retries {
                attempt += 1;
                debug!("generation request failed ({}), retry {}", status, attempt);
                thread::sleep(retry_backoff(attempt));
                continue;
            }
            bail!("generation endpoint returned {}: {}", status, text);
        }
    }
}

/// Generator that shells out to an external process.
///
/// The process receives the request as JSON on stdin and prints the text
/// (or `{"text": ...}`) on stdout.
pub struct CommandGenerator {
    command: String,
    model: String,
}

impl CommandGenerator {
    pub fn new(command: String, model: String) -> Self {
        Self { command, model }
    }
}

impl TextGenerator for CommandGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn generate(&mut self, request: &GenerationRequest) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "system": request.system,
            "prompt": request.prompt,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        let stdout = run_json_command(&self.command, &payload)?;
        let trimmed = stdout.trim();
        if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str(trimmed) {
            if let Some(text) = obj.get("text").and_then(|v| v.as_str()) {
                return Ok(text.to_string());
            }
        }
        Ok(trimmed.to_string())
    }
}

/// Offline generator that fills a fixed cover-letter template.
///
/// The prompt is expected in the `key: value` line format built by
/// [`cover_letter_prompt`].
pub struct TemplateGenerator;

impl TextGenerator for TemplateGenerator {
    fn model_id(&self) -> &str {
        "template"
    }

    fn generate(&mut self, request: &GenerationRequest) -> Result<String> {
        let field = |key: &str| {
            request
                .prompt
                .lines()
                .find_map(|line| line.strip_prefix(key))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let name = field("Candidate:");
        let title = field("Role:");
        let company = field("Company:");

        let greeting = if company.is_empty() {
            "Dear Hiring Manager,".to_string()
        } else {
            format!("Dear {} Hiring Team,", company)
        };
        let signoff = if name.is_empty() {
            "Sincerely".to_string()
        } else {
            format!("Sincerely,\n{}", name)
        };
        Ok(format!(
            "{}\n\nI am excited to apply for the {} position. My experience described in my resume \
             aligns closely with the responsibilities of this role, and I would welcome the \
             chance to contribute.\n\n{}",
            greeting,
            if title.is_empty() { "open" } else { title.as_str() },
            signoff
        ))
    }
}

/// Builds the cover-letter prompt for a resume and posting.
pub fn cover_letter_prompt(
    candidate: Option<&str>,
    resume: &str,
    title: &str,
    company: Option<&str>,
    description: &str,
) -> String {
    format!(
        "Candidate: {}\nRole: {}\nCompany: {}\n\nJob description:\n{}\n\nResume:\n{}\n\n\
         Write a concise, professional cover letter for this candidate and role.",
        candidate.unwrap_or(""),
        title,
        company.unwrap_or(""),
        description.trim(),
        resume.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: String) -> GenerationRequest {
        GenerationRequest {
            system: "You write cover letters.".to_string(),
            prompt,
            max_tokens: 400,
            temperature: 0.2,
        }
    }

    #[test]
    fn test_template_generator_uses_prompt_fields() {
        let prompt = cover_letter_prompt(
            Some("Ada"),
            "Rust, SQL",
            "Rust Engineer",
            Some("Acme"),
            "Build things.",
        );
        let letter = TemplateGenerator.generate(&request(prompt)).unwrap();
        assert!(letter.starts_with("Dear Acme Hiring Team,"));
        assert!(letter.contains("Rust Engineer position"));
        assert!(letter.ends_with("Sincerely,\nAda"));
    }

    #[test]
    fn test_template_generator_without_company() {
        let prompt = cover_letter_prompt(None, "r", "Analyst", None, "d");
        let letter = TemplateGenerator.generate(&request(prompt)).unwrap();
        assert!(letter.starts_with("Dear Hiring Manager,"));
        assert!(letter.ends_with("Sincerely"));
    }

    #[test]
    fn test_command_generator_reads_text_field() {
        let mut generator = CommandGenerator::new(
            r#"cat > /dev/null; echo '{"text": "Hello there"}'"#.to_string(),
            "cmd".to_string(),
        );
        assert_eq!(
            generator.generate(&request("p".into())).unwrap(),
            "Hello there"
        );

        let mut plain =
            CommandGenerator::new("cat > /dev/null; echo plain output".to_string(), "cmd".into());
        assert_eq!(plain.generate(&request("p".into())).unwrap(), "plain output");
    }
}
