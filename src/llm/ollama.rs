use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Result, TaxonFinderError};

use super::LlmClient;

pub struct OllamaClient {
    base_url: String,
    model: String,
    timeout: std::time::Duration,
    http: reqwest::Client,
    user_agent: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: f64, user_agent: impl Into<String>) -> Self {
        OllamaClient {
            base_url: base_url.into(),
            model: model.into(),
            timeout: std::time::Duration::from_secs_f64(timeout_secs),
            http: reqwest::Client::new(),
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, system_prompt: &str, user_content: &str, response_schema: Option<&Value>) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let mut payload = json!({
            "model": self.model,
            "prompt": user_content,
            "system": system_prompt,
            "stream": false,
        });
        if response_schema.is_some() {
            payload["format"] = json!("json");
        }

        let response = self
            .http
            .post(&url)
            .header("User-Agent", &self.user_agent)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TaxonFinderError::LlmError(format!("Ollama request failed: {e}")))?;

        if response.status().as_u16() >= 400 {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TaxonFinderError::LlmError(format!("Ollama request failed: {status} {body}")));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| TaxonFinderError::LlmError(format!("Ollama response not JSON: {e}")))?;
        data.get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TaxonFinderError::LlmError("Ollama response missing 'response' field".to_string()))
    }
}
