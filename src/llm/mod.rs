//! LLM client contract and concrete provider implementations.

pub mod anthropic;
pub mod enricher;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A chat-style completion backend. Each implementation wraps one HTTP API;
/// `response_schema`, when given, asks the provider to constrain its output
/// to that JSON Schema (providers that don't support structured output
/// ignore it and the caller falls back to the fence-stripping JSON repair
/// in [`enricher`]/`crate::extractors::llm`).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_content: &str, response_schema: Option<&Value>) -> Result<String>;
}

/// Strips Markdown code fences and trailing commas before parsing, matching
/// the original client's two-pass JSON repair (most local models occasionally
/// wrap JSON in ```json fences or leave a dangling comma).
pub fn parse_json_repairing(text: &str) -> Result<Value> {
    let cleaned = strip_fences(text);
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Ok(value);
    }
    let repaired = strip_trailing_commas(&cleaned);
    serde_json::from_str(&repaired).map_err(|e| crate::error::TaxonFinderError::LlmError(format!("invalid JSON from LLM: {e}")))
}

fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let after_lang = rest.find('\n').map(|i| &rest[i + 1..]).unwrap_or(rest);
        after_lang.trim().trim_end_matches("```").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"a\": 1}\n```";
        let value = parse_json_repairing(raw).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn repairs_trailing_comma() {
        let raw = "{\"a\": [1, 2,], \"b\": 3,}";
        let value = parse_json_repairing(raw).unwrap();
        assert_eq!(value["a"][1], 2);
        assert_eq!(value["b"], 3);
    }
}
