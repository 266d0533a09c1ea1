//! Language-model seam and its OpenAI implementation.
//!
//! Everything that talks to a model goes through [`LanguageModel`], so the
//! agent pipeline and the cringe filter can be driven by scripted fakes in
//! tests. [`OpenAiClient`] speaks the Responses API; [`Throttled`] wraps any
//! model with a shared semaphore to cap simultaneous calls.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use crate::config::OpenAiSettings;
use crate::constants::DEFAULT_TEMPERATURE;

// ── Requests ─────────────────────────────────────────────────────────

/// One free-text completion: system instructions plus a user prompt.
#[derive(Clone, Debug)]
pub struct Completion<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
}

impl<'a> Completion<'a> {
    pub fn new(system: &'a str, prompt: &'a str) -> Self {
        Completion {
            system,
            prompt,
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: None,
        }
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }
}

/// A named JSON schema the structured variant must conform to.
#[derive(Clone, Debug)]
pub struct Schema {
    pub name: &'static str,
    pub schema: Value,
}

// ── Model seam ───────────────────────────────────────────────────────

/// A language model the simulation can call.
///
/// Implementations raise on transport or service errors; callers never get
/// an automatic retry.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-text completion.
    async fn complete(&self, request: Completion<'_>) -> Result<String>;

    /// Completion constrained to `schema`, returned as parsed JSON.
    async fn complete_structured(&self, prompt: &str, schema: &Schema) -> Result<Value>;
}

// ── OpenAI ───────────────────────────────────────────────────────────

/// Thin wrapper around the OpenAI HTTP API.
#[derive(Clone)]
pub struct OpenAiClient {
    pub model: String,
    pub base_url: String,
    api_key: String,
    http_client: HttpClient,
}

impl OpenAiClient {
    pub fn new(settings: &OpenAiSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("OpenAI key not configured (set OPENAI_API_KEY)"))?;
        Ok(OpenAiClient {
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            http_client: HttpClient::new(),
        })
    }

    async fn response(&self, body: Value) -> Result<String> {
        let response = self.request("responses", body).await?;
        let items = extract_output_items(&response);
        let text = extract_output_text(&items);
        if text.trim().is_empty() {
            return Err(anyhow!("OpenAI response contained no output text"));
        }
        Ok(text)
    }

    async fn request(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("send OpenAI request")?;
        let status = response.status();
        let text = response.text().await.context("read OpenAI response")?;
        let json: Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({"raw": text}));
        if !status.is_success() {
            return Err(anyhow!("OpenAI error {status}: {json}"));
        }
        Ok(json)
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, request: Completion<'_>) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "input": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": request.temperature,
        });
        if let Some(tokens) = request.max_output_tokens {
            body["max_output_tokens"] = json!(tokens);
        }
        self.response(body).await
    }

    async fn complete_structured(&self, prompt: &str, schema: &Schema) -> Result<Value> {
        let body = json!({
            "model": self.model,
            "input": [{"role": "user", "content": prompt}],
            "temperature": DEFAULT_TEMPERATURE,
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": true,
                }
            },
        });
        let text = self.response(body).await?;
        serde_json::from_str(&text)
            .with_context(|| format!("parse structured `{}` output", schema.name))
    }
}

/// Pull the top-level `output` array from an OpenAI response.
pub fn extract_output_items(response: &Value) -> Vec<Value> {
    response
        .get("output")
        .and_then(|value| value.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Concatenate all `output_text` blocks from the output items into a single string.
pub fn extract_output_text(output_items: &[Value]) -> String {
    let mut parts = Vec::new();
    for item in output_items {
        let item_type = item.get("type").and_then(|v| v.as_str());
        if item_type != Some("message") {
            continue;
        }
        let content = match item.get("content").and_then(|v| v.as_array()) {
            Some(content) => content,
            None => continue,
        };
        for block in content {
            if block.get("type").and_then(|v| v.as_str()) == Some("output_text") {
                if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                    parts.push(text.to_string());
                }
            }
        }
    }
    parts.join("\n")
}

// ── Concurrency cap ──────────────────────────────────────────────────

/// Shares one pool of permits between every agent's model calls.
pub struct Throttled {
    inner: Arc<dyn LanguageModel>,
    permits: Arc<Semaphore>,
}

impl Throttled {
    pub fn new(inner: Arc<dyn LanguageModel>, max_concurrent: usize) -> Self {
        Throttled {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl LanguageModel for Throttled {
    async fn complete(&self, request: Completion<'_>) -> Result<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("model call limiter closed")?;
        self.inner.complete(request).await
    }

    async fn complete_structured(&self, prompt: &str, schema: &Schema) -> Result<Value> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("model call limiter closed")?;
        self.inner.complete_structured(prompt, schema).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn output_text_joins_message_blocks_only() {
        let response = json!({
            "output": [
                {"type": "reasoning", "content": [{"type": "output_text", "text": "hidden"}]},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "first"},
                    {"type": "refusal", "refusal": "nope"},
                    {"type": "output_text", "text": "second"},
                ]},
            ]
        });
        let items = extract_output_items(&response);
        assert_eq!(extract_output_text(&items), "first\nsecond");
    }

    #[test]
    fn missing_output_yields_empty_text() {
        let items = extract_output_items(&json!({"id": "resp_1"}));
        assert!(items.is_empty());
        assert_eq!(extract_output_text(&items), "");
    }

    #[test]
    fn client_requires_api_key() {
        let settings = OpenAiSettings {
            model: "m".to_string(),
            base_url: "http://localhost/v1/".to_string(),
            api_key: None,
        };
        assert!(OpenAiClient::new(&settings).is_err());

        let settings = OpenAiSettings {
            api_key: Some("sk-test".to_string()),
            ..settings
        };
        let client = OpenAiClient::new(&settings).unwrap();
        assert_eq!(client.base_url, "http://localhost/v1");
    }

    struct Slow {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for Slow {
        async fn complete(&self, _request: Completion<'_>) -> Result<String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok("done".to_string())
        }

        async fn complete_structured(&self, _prompt: &str, _schema: &Schema) -> Result<Value> {
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn throttled_caps_simultaneous_calls() {
        let slow = Arc::new(Slow {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let throttled = Arc::new(Throttled::new(slow.clone(), 2));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let model = throttled.clone();
            handles.push(tokio::spawn(async move {
                model.complete(Completion::new("s", "p")).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "done");
        }
        assert_eq!(slow.peak.load(Ordering::SeqCst), 2);
    }
}
