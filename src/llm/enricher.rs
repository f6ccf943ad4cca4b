//! Phase 4: asks the LLM for alternative common/Latin names for a group that
//! failed to resolve, to retry the external search with.

use serde_json::Value;
use tracing::warn;

use crate::extractors::{line_context, SentenceSpan};
use crate::llm::{parse_json_repairing, LlmClient};
use crate::models::{CandidateGroup, LlmEnrichmentResponse};
use crate::normalizer::normalize;

pub struct LlmEnricherConfig {
    pub prompt_template: String,
}

pub struct LlmEnricherPhase<'a> {
    system_prompt: String,
    llm_client: &'a dyn LlmClient,
    max_retries: u32,
}

impl<'a> LlmEnricherPhase<'a> {
    pub fn new(config: LlmEnricherConfig, locale: &str, llm_client: &'a dyn LlmClient) -> Self {
        LlmEnricherPhase {
            system_prompt: config.prompt_template.replace("{{locale}}", locale),
            llm_client,
            max_retries: 2,
        }
    }

    pub async fn enrich(&self, text: &str, group: &CandidateGroup, sentences: &[SentenceSpan]) -> LlmEnrichmentResponse {
        let candidate = &group.normalized;
        let occurrence = group.occurrences.first();
        let needle = occurrence.map(|o| o.source_text.as_str()).unwrap_or(candidate);
        let (start, end) = find_span(text, needle);

        let context = expanded_context(text, start, end, sentences, occurrence.map(|o| o.source_context.as_str()));
        let user_content = format!("Candidate: {candidate}\nContext: {context}");
        let response = self.call_llm(&user_content).await;
        parse_response(&response, candidate)
    }

    async fn call_llm(&self, user_content: &str) -> Value {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.llm_client.complete(&self.system_prompt, user_content, Some(&response_schema())).await {
                Ok(raw) => match parse_json_repairing(&raw) {
                    Ok(value) => return value,
                    Err(e) => {
                        warn!(attempt = attempt + 1, error = %e, "llm_enricher_invalid_json");
                        last_error = Some(e);
                    }
                },
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "llm_enricher_invalid_json");
                    last_error = Some(e);
                }
            }
        }
        warn!(error = ?last_error, "llm_enricher_request_skipped");
        serde_json::json!({})
    }
}

fn response_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "common_names_loc": {"type": "array", "items": {"type": "string"}},
            "common_names_en": {"type": "array", "items": {"type": "string"}},
            "latin_names": {"type": "array", "items": {"type": "string"}},
        },
        "required": ["common_names_loc", "common_names_en", "latin_names"],
    })
}

fn parse_response(data: &Value, candidate: &str) -> LlmEnrichmentResponse {
    LlmEnrichmentResponse {
        common_names_loc: filter_names(data.get("common_names_loc"), Some(candidate)),
        common_names_en: filter_names(data.get("common_names_en"), Some(candidate)),
        latin_names: filter_names(data.get("latin_names"), Some(candidate)),
    }
}

fn filter_names(value: Option<&Value>, candidate: Option<&str>) -> Vec<String> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    let candidate_norm = candidate.map(normalize);
    let mut filtered = Vec::new();
    for item in items {
        let Some(name) = item.as_str() else { continue };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if let Some(norm) = &candidate_norm {
            if &normalize(name) == norm {
                continue;
            }
        }
        if !filtered.contains(&name.to_string()) {
            filtered.push(name.to_string());
        }
    }
    filtered
}

fn expanded_context(text: &str, start: usize, end: usize, spans: &[SentenceSpan], fallback_context: Option<&str>) -> String {
    if let Some(index) = sentence_index(spans, start, end) {
        let parts: Vec<&str> = [-1i64, 0, 1]
            .iter()
            .filter_map(|offset| {
                let idx = index as i64 + offset;
                if idx >= 0 && (idx as usize) < spans.len() {
                    Some(spans[idx as usize].text.as_str())
                } else {
                    None
                }
            })
            .collect();
        if !parts.is_empty() {
            return parts.join(" ");
        }
    }
    if let Some(ctx) = fallback_context {
        if !ctx.is_empty() {
            return ctx.to_string();
        }
    }
    line_context(text, start)
}

fn sentence_index(spans: &[SentenceSpan], start: usize, end: usize) -> Option<usize> {
    spans
        .iter()
        .position(|s| (s.start <= start && start < s.end) || (s.start < end && end <= s.end))
}

fn find_span(text: &str, needle: &str) -> (usize, usize) {
    if let Some(index) = text.find(needle) {
        return (index, index + needle.len());
    }
    let lower_text = text.to_lowercase();
    let lower_needle = needle.to_lowercase();
    if let Some(index) = lower_text.find(&lower_needle) {
        return (index, index + needle.len());
    }
    (0, needle.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_names_drops_the_candidate_itself() {
        let value = serde_json::json!(["Липа", "Дуб"]);
        let filtered = filter_names(Some(&value), Some("липа"));
        assert_eq!(filtered, vec!["Дуб".to_string()]);
    }

    #[test]
    fn filter_names_dedupes() {
        let value = serde_json::json!(["Дуб", "дуб", "Ива"]);
        let filtered = filter_names(Some(&value), None);
        assert_eq!(filtered, vec!["Дуб".to_string(), "дуб".to_string(), "Ива".to_string()]);
    }

    #[test]
    fn expanded_context_prefers_neighboring_sentences() {
        let text = "A. B. C.";
        let spans = vec![
            SentenceSpan { start: 0, end: 2, text: "A.".into() },
            SentenceSpan { start: 3, end: 5, text: "B.".into() },
            SentenceSpan { start: 6, end: 8, text: "C.".into() },
        ];
        let context = expanded_context(text, 3, 5, &spans, None);
        assert_eq!(context, "A. B. C.");
    }
}
