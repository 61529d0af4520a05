//! Slide classification: one page image → `{title, content, type, links}`.
//!
//! [`SlideClassifier`] is the seam the orchestrator depends on; tests plug in
//! scripted fakes. [`VisionClassifier`] is the production implementation on
//! top of any `edgequake-llm` vision provider.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! avoids a thundering herd: with 500 ms base and 3 retries the wait sequence
//! is 500 ms → 1 s → 2 s. Credential errors and unparseable replies are not
//! retried.

use crate::config::PipelineConfig;
use crate::error::{ExtractionError, Pdf2SlidesError};
use crate::pipeline::encode::encode_page;
use crate::pipeline::normalize::RawContent;
use crate::pipeline::render::RasterPage;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Default vision model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Structured classifier reply, before normalisation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierOutput {
    pub title: Option<String>,
    pub content: RawContent,
    /// Raw `type` value; coerced to a [`crate::model::SlideKind`] downstream.
    pub kind: Option<String>,
    pub links: Vec<String>,
}

/// Opaque recognition collaborator: image in, structured fields out.
#[async_trait]
pub trait SlideClassifier: Send + Sync {
    async fn classify(&self, page: &RasterPage) -> Result<ClassifierOutput, ExtractionError>;
}

/// [`SlideClassifier`] backed by a vision LLM.
pub struct VisionClassifier {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
}

impl VisionClassifier {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    /// Resolve the provider from `config` and build a classifier around it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, Pdf2SlidesError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    async fn call_once(
        &self,
        messages: &[ChatMessage],
    ) -> Result<ClassifierOutput, ExtractionError> {
        let response = timeout(
            Duration::from_secs(self.api_timeout_secs),
            self.provider.chat(messages, Some(&self.options)),
        )
        .await
        .map_err(|_| ExtractionError::Timeout {
            secs: self.api_timeout_secs,
        })?
        .map_err(|e| classify_provider_error(&e.to_string()))?;

        debug!(
            "{} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        parse_reply(&response.content)
    }
}

#[async_trait]
impl SlideClassifier for VisionClassifier {
    async fn classify(&self, page: &RasterPage) -> Result<ClassifierOutput, ExtractionError> {
        let start = Instant::now();
        // The image carries all the content; the empty user text satisfies
        // APIs that require a user turn.
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images("", vec![encode_page(page)]),
        ];

        let mut last_err = ExtractionError::Api("no attempt made".into());
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page.index, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.call_once(&messages).await {
                Ok(output) => {
                    debug!("Page {}: classified in {:?}", page.index, start.elapsed());
                    return Ok(output);
                }
                Err(e) => {
                    warn!("Page {}: attempt {} failed: {}", page.index, attempt + 1, e);
                    let retryable = is_retryable(&e);
                    last_err = e;
                    if !retryable {
                        break;
                    }
                }
            }
        }
        Err(last_err)
    }
}

fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn is_retryable(e: &ExtractionError) -> bool {
    matches!(e, ExtractionError::Timeout { .. } | ExtractionError::Api(_))
}

fn classify_provider_error(msg: &str) -> ExtractionError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("api key")
        || lower.contains("authentication")
    {
        ExtractionError::Auth(msg.to_string())
    } else {
        ExtractionError::Api(msg.to_string())
    }
}

// ── Reply parsing ────────────────────────────────────────────────────────────

static RE_JSON_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n?(.*?)\n?```\s*$").unwrap());

/// Parse a classifier reply into a [`ClassifierOutput`].
///
/// Tolerates ```json fences and prose around the object. Anything that does
/// not contain a JSON object is [`ExtractionError::Malformed`].
pub fn parse_reply(reply: &str) -> Result<ClassifierOutput, ExtractionError> {
    let trimmed = reply.trim();
    let body = match RE_JSON_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => trimmed,
    };
    let object = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if end > start => &body[start..=end],
        _ => {
            return Err(ExtractionError::Malformed(format!(
                "no JSON object in reply: {}",
                preview(trimmed)
            )))
        }
    };

    let value: Value = serde_json::from_str(object)
        .map_err(|e| ExtractionError::Malformed(format!("{e}: {}", preview(object))))?;
    let Value::Object(mut map) = value else {
        return Err(ExtractionError::Malformed("reply is not a JSON object".into()));
    };

    let title = map.remove("title").and_then(scalar_text);
    let kind = map.remove("type").and_then(scalar_text);
    let content = map.remove("content").map(RawContent::from).unwrap_or_default();
    let links = match map.remove("links") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    Ok(ClassifierOutput {
        title,
        content,
        kind,
        links,
    })
}

fn scalar_text(v: Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn preview(s: &str) -> String {
    s.chars().take(120).collect()
}

// ── Provider resolution ──────────────────────────────────────────────────────

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Pdf2SlidesError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2SlidesError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the vision provider, from most-specific to least-specific:
///
/// 1. a pre-built `config.provider`;
/// 2. `config.provider_name` with `config.model`;
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set;
/// 4. OpenAI when `OPENAI_API_KEY` is set;
/// 5. `ProviderFactory::from_env` auto-detection.
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, Pdf2SlidesError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2SlidesError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&PipelineConfig::default());
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(2048));
    }

    #[test]
    fn parses_plain_object() {
        let out = parse_reply(
            r#"{"title": "Cell Biology", "content": "Cells are units", "type": "quiz", "links": ["https://a.example"]}"#,
        )
        .unwrap();
        assert_eq!(out.title.as_deref(), Some("Cell Biology"));
        assert_eq!(out.content, RawContent::Text("Cells are units".into()));
        assert_eq!(out.kind.as_deref(), Some("quiz"));
        assert_eq!(out.links, vec!["https://a.example"]);
    }

    #[test]
    fn parses_fenced_object_with_nested_content() {
        let reply = "```json\n{\"title\": \"T\", \"content\": {\"text\": \"body\"}}\n```";
        let out = parse_reply(reply).unwrap();
        assert_eq!(out.title.as_deref(), Some("T"));
        assert_eq!(out.content, RawContent::from(json!({"text": "body"})));
        assert_eq!(out.kind, None);
        assert!(out.links.is_empty());
    }

    #[test]
    fn tolerates_prose_around_object() {
        let out = parse_reply("Here you go: {\"title\": \"X\"} hope that helps").unwrap();
        assert_eq!(out.title.as_deref(), Some("X"));
        assert_eq!(out.content, RawContent::default());
    }

    #[test]
    fn non_object_replies_are_malformed() {
        assert!(matches!(parse_reply("sorry, I can't"), Err(ExtractionError::Malformed(_))));
        assert!(matches!(parse_reply("{not json}"), Err(ExtractionError::Malformed(_))));
        assert!(matches!(parse_reply(""), Err(ExtractionError::Malformed(_))));
    }

    #[test]
    fn non_string_links_are_dropped() {
        let out = parse_reply(r#"{"links": ["https://x.example", 3, null, "  "]}"#).unwrap();
        assert_eq!(out.links, vec!["https://x.example"]);
    }

    #[test]
    fn provider_errors_split_auth_from_transient() {
        assert!(matches!(
            classify_provider_error("HTTP 401 Unauthorized"),
            ExtractionError::Auth(_)
        ));
        assert!(matches!(
            classify_provider_error("HTTP 429 rate limited"),
            ExtractionError::Api(_)
        ));
        assert!(is_retryable(&ExtractionError::Timeout { secs: 1 }));
        assert!(!is_retryable(&ExtractionError::Auth("x".into())));
        assert!(!is_retryable(&ExtractionError::Malformed("x".into())));
    }
}
