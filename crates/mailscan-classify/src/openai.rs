//! `OpenAI` chat-completions classifier.

use crate::classifier::{ClassifyOutcome, MailClassifier};
use crate::error::{ClassifyError, Result};
use async_trait::async_trait;
use mailscan_core::{JobMailStatus, MailAnalysis, MailMessage, TokenUsage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Message bodies are truncated before prompting; classification only
/// needs the opening of the message.
const MAX_BODY_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "You are a strict classifier for job application emails. \
Given an email, respond with a JSON object with exactly these fields: \
\"is_job_email\" (boolean), \"company\" (string or null), \
\"role\" (string or null), \"status\" (one of \"applied\", \"interview\", \
\"offer\", \"rejected\", \"unknown\", or null). \
Set \"is_job_email\" to true only for messages about the recipient's own \
job applications. Respond with JSON only.";

/// Classifier backed by `OpenAI`'s chat completions API in JSON mode.
pub struct OpenAiClassifier {
    api_key: String,
    model: String,
    max_tokens: u32,
    client: Client,
    base_url: String,
}

impl OpenAiClassifier {
    /// Create a classifier with the given API key and model.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
            client,
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }

    /// Point the classifier at a different API base (tests, proxies).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn build_prompt(message: &MailMessage) -> String {
        let body: String = message.body.chars().take(MAX_BODY_CHARS).collect();
        format!(
            "From: {}\nSubject: {}\n\n{}",
            message.from, message.subject, body
        )
    }

    fn to_api_request(&self, message: &MailMessage) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::build_prompt(message),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object".to_string(),
            },
        }
    }
}

#[async_trait]
impl MailClassifier for OpenAiClassifier {
    async fn classify(&self, message: &MailMessage) -> Result<ClassifyOutcome> {
        let api_request = self.to_api_request(message);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&api_request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClassifyError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::Parse(format!("response body: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ClassifyError::Parse("no choices in response".to_string()))?;

        let analysis = parse_analysis(&choice.message.content)?;
        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        debug!(
            message_id = %message.id,
            is_job_email = analysis.is_job_email,
            total_tokens = usage.total_tokens,
            "classified message"
        );

        Ok(ClassifyOutcome {
            analysis,
            usage,
            model: api_response.model,
        })
    }
}

/// Parse the model's JSON output into a [`MailAnalysis`].
///
/// Tolerates markdown code fences around the JSON object; anything else
/// malformed is a parse error.
///
/// # Errors
/// Returns `ClassifyError::Parse` when no JSON object can be extracted.
pub fn parse_analysis(content: &str) -> Result<MailAnalysis> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map_or(trimmed, str::trim);

    let raw: RawAnalysis = serde_json::from_str(stripped)
        .map_err(|e| ClassifyError::Parse(format!("analysis JSON: {e}")))?;

    let status = match raw.status.as_deref() {
        None | Some("") | Some("null") => None,
        Some("applied") => Some(JobMailStatus::Applied),
        Some("interview") => Some(JobMailStatus::Interview),
        Some("offer") => Some(JobMailStatus::Offer),
        Some("rejected") => Some(JobMailStatus::Rejected),
        Some(_) => Some(JobMailStatus::Unknown),
    };

    Ok(MailAnalysis {
        is_job_email: raw.is_job_email,
        company: raw.company.filter(|c| !c.is_empty()),
        role: raw.role.filter(|r| !r.is_empty()),
        status,
    })
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    is_job_email: bool,
    company: Option<String>,
    role: Option<String>,
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_analysis() {
        let analysis = parse_analysis(
            r#"{"is_job_email": true, "company": "Acme", "role": "Engineer", "status": "interview"}"#,
        )
        .expect("parse");

        assert!(analysis.is_job_email);
        assert_eq!(analysis.company.as_deref(), Some("Acme"));
        assert_eq!(analysis.role.as_deref(), Some("Engineer"));
        assert_eq!(analysis.status, Some(JobMailStatus::Interview));
    }

    #[test]
    fn test_parse_non_job_email() {
        let analysis = parse_analysis(
            r#"{"is_job_email": false, "company": null, "role": null, "status": null}"#,
        )
        .expect("parse");

        assert!(!analysis.is_job_email);
        assert!(analysis.company.is_none());
        assert!(analysis.status.is_none());
    }

    #[test]
    fn test_parse_tolerates_code_fences() {
        let analysis = parse_analysis(
            "```json\n{\"is_job_email\": true, \"company\": \"Acme\", \"role\": null, \"status\": \"applied\"}\n```",
        )
        .expect("parse");

        assert!(analysis.is_job_email);
        assert_eq!(analysis.status, Some(JobMailStatus::Applied));
    }

    #[test]
    fn test_unrecognized_status_maps_to_unknown() {
        let analysis = parse_analysis(
            r#"{"is_job_email": true, "company": null, "role": null, "status": "ghosted"}"#,
        )
        .expect("parse");

        assert_eq!(analysis.status, Some(JobMailStatus::Unknown));
    }

    #[test]
    fn test_empty_strings_become_none() {
        let analysis = parse_analysis(
            r#"{"is_job_email": true, "company": "", "role": "", "status": ""}"#,
        )
        .expect("parse");

        assert!(analysis.company.is_none());
        assert!(analysis.role.is_none());
        assert!(analysis.status.is_none());
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let out = parse_analysis("the model rambled instead of emitting JSON");
        assert!(matches!(out, Err(ClassifyError::Parse(_))));
    }

    #[test]
    fn test_prompt_truncates_long_bodies() {
        let message = MailMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            subject: "Hi".to_string(),
            from: "a@b.com".to_string(),
            body: "x".repeat(50_000),
            date_ts: 0,
        };

        let prompt = OpenAiClassifier::build_prompt(&message);
        assert!(prompt.len() < MAX_BODY_CHARS + 100);
    }
}
