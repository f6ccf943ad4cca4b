use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Result, TaxonFinderError};

use super::LlmClient;

pub struct OpenAiClient {
    base_url: String,
    model: String,
    timeout: std::time::Duration,
    api_key: String,
    http: reqwest::Client,
    user_agent: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: f64,
        api_key: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        OpenAiClient {
            base_url: base_url.into(),
            model: model.into(),
            timeout: std::time::Duration::from_secs_f64(timeout_secs),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, system_prompt: &str, user_content: &str, response_schema: Option<&Value>) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let mut payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_content},
            ],
            "temperature": 0,
        });
        if let Some(schema) = response_schema {
            payload["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "schema": schema,
                    "strict": true,
                },
            });
        }

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("User-Agent", &self.user_agent)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TaxonFinderError::LlmError(format!("OpenAI request failed: {e}")))?;

        if response.status().as_u16() >= 400 {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TaxonFinderError::LlmError(format!("OpenAI request failed: {status} {body}")));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| TaxonFinderError::LlmError(format!("OpenAI response not JSON: {e}")))?;
        data.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TaxonFinderError::LlmError("OpenAI response missing content".to_string()))
    }
}
