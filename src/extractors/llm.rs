//! LLM-based candidate extractor: chunks the input text, asks the configured
//! [`LlmClient`] for candidate mentions per chunk, and locates each returned
//! name back in the source text.

use serde_json::{json, Value};
use tracing::warn;

use crate::error::{Result, TaxonFinderError};
use crate::extractors::{line_context, line_number};
use crate::llm::{parse_json_repairing, LlmClient};
use crate::models::{Candidate, ExtractionMethod};
use crate::normalizer::{lemmatize, normalize, MorphAnalyzer};

pub struct LlmExtractorConfig {
    pub prompt_template: String,
    pub chunk_strategy: String,
    pub min_chunk_words: usize,
    pub max_chunk_words: usize,
}

pub struct LlmExtractorPhase<'a> {
    config: LlmExtractorConfig,
    system_prompt: String,
    llm_client: &'a dyn LlmClient,
    max_retries: u32,
}

impl<'a> LlmExtractorPhase<'a> {
    pub fn new(config: LlmExtractorConfig, locale: &str, llm_client: &'a dyn LlmClient) -> Self {
        let system_prompt = config.prompt_template.replace("{{locale}}", locale);
        LlmExtractorPhase {
            config,
            system_prompt,
            llm_client,
            max_retries: 2,
        }
    }

    pub async fn extract(&self, text: &str, sentences: &[String]) -> Result<Vec<Candidate>> {
        let chunks = chunk_text(
            text,
            &self.config.chunk_strategy,
            self.config.min_chunk_words,
            self.config.max_chunk_words,
            Some(sentences),
        )?;

        let mut candidates = Vec::new();
        for chunk in &chunks {
            let response = self.call_llm(chunk).await;
            let Some(items) = response.get("candidates").and_then(Value::as_array) else {
                continue;
            };
            for item in items {
                let name = item.get("name").and_then(Value::as_str).unwrap_or("").trim().to_string();
                let context = item.get("context").and_then(Value::as_str).unwrap_or("").trim().to_string();
                if name.is_empty() {
                    continue;
                }
                let (start, end) = find_span(text, &name);
                let morph = crate::normalizer::IdentityAnalyzer;
                candidates.push(Candidate {
                    source_text: name.clone(),
                    source_context: if context.is_empty() { line_context(text, start) } else { context },
                    line_number: line_number(text, start),
                    start_char: start,
                    end_char: end,
                    normalized: normalize(&name),
                    lemmatized: lemmatize(&name, &morph),
                    method: ExtractionMethod::Llm,
                    confidence: 0.6,
                    gazetteer_taxon_ids: Vec::new(),
                });
            }
        }
        Ok(candidates)
    }

    async fn call_llm(&self, chunk: &str) -> Value {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.llm_client.complete(&self.system_prompt, chunk, Some(&response_schema())).await {
                Ok(raw) => match parse_json_repairing(&raw) {
                    Ok(value) => return value,
                    Err(e) => {
                        warn!(attempt = attempt + 1, error = %e, "llm_extractor_invalid_json");
                        last_error = Some(e);
                    }
                },
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "llm_extractor_invalid_json");
                    last_error = Some(e);
                }
            }
        }
        warn!(error = ?last_error, "llm_extractor_chunk_skipped");
        json!({"candidates": []})
    }
}

fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "candidates": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "context": {"type": "string"},
                    },
                    "required": ["name", "context"],
                }
            }
        },
        "required": ["candidates"],
    })
}

/// Splits `text` into LLM-sized chunks. `paragraph` groups blank-line-
/// delimited paragraphs until `min_words` is reached, overflowing oversized
/// paragraphs by sentence (or word, if `sentences` is absent); `page` just
/// groups whole-text sentences/words up to `max_words`.
pub fn chunk_text(text: &str, strategy: &str, min_words: usize, max_words: usize, sentences: Option<&[String]>) -> Result<Vec<String>> {
    match strategy {
        "paragraph" => Ok(chunk_by_paragraph(text, min_words, max_words, sentences)),
        "page" => Ok(match sentences {
            Some(s) => split_by_sentences(s, max_words),
            None => split_by_words(text, max_words),
        }),
        other => Err(TaxonFinderError::ConfigError(format!("unknown chunk strategy: {other}"))),
    }
}

fn chunk_by_paragraph(text: &str, min_words: usize, max_words: usize, sentences: Option<&[String]>) -> Vec<String> {
    let paragraphs: Vec<&str> = text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()).collect();
    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut buffer_words = 0usize;

    for paragraph in paragraphs {
        let words = word_count(paragraph);
        if words > max_words {
            if !buffer.is_empty() {
                chunks.push(buffer.join("\n\n"));
                buffer.clear();
                buffer_words = 0;
            }
            match sentences {
                Some(s) => chunks.extend(split_by_sentences(s, max_words)),
                None => chunks.extend(split_by_words(paragraph, max_words)),
            }
            continue;
        }

        if buffer_words < min_words {
            buffer.push(paragraph);
            buffer_words += words;
            if buffer_words >= min_words {
                chunks.push(buffer.join("\n\n"));
                buffer.clear();
                buffer_words = 0;
            }
            continue;
        }

        chunks.push(paragraph.to_string());
    }
    if !buffer.is_empty() {
        chunks.push(buffer.join("\n\n"));
    }
    chunks
}

fn split_by_words(text: &str, max_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    words.chunks(max_words.max(1)).map(|c| c.join(" ")).collect()
}

fn split_by_sentences(sentences: &[String], max_words: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut buffer_words = 0usize;

    for sentence in sentences {
        let words = word_count(sentence);
        if words > max_words {
            if !buffer.is_empty() {
                chunks.push(buffer.join(" "));
                buffer.clear();
                buffer_words = 0;
            }
            chunks.extend(sliding_window(sentence, max_words, 50));
            continue;
        }
        if buffer_words + words <= max_words {
            buffer.push(sentence);
            buffer_words += words;
            continue;
        }
        chunks.push(buffer.join(" "));
        buffer = vec![sentence];
        buffer_words = words;
    }
    if !buffer.is_empty() {
        chunks.push(buffer.join(" "));
    }
    chunks
}

fn sliding_window(text: &str, max_words: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let step = max_words.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + max_words).min(words.len());
        chunks.push(words[start..end].join(" "));
        if start + max_words >= words.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn find_span(text: &str, name: &str) -> (usize, usize) {
    if let Some(index) = text.find(name) {
        return (index, index + name.len());
    }
    let lower_text = text.to_lowercase();
    let lower_name = name.to_lowercase();
    if let Some(index) = lower_text.find(&lower_name) {
        return (index, index + name.len());
    }
    (0, name.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraph_strategy_groups_short_paragraphs() {
        let text = "one two three\n\nfour five six";
        let chunks = chunk_text(text, "paragraph", 4, 100, None).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn oversized_paragraph_splits_by_words() {
        let text = (0..20).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let chunks = chunk_text(&text, "paragraph", 1, 5, None).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| word_count(c) <= 5));
    }

    #[test]
    fn unknown_strategy_is_a_config_error() {
        let err = chunk_text("text", "bogus", 1, 10, None).unwrap_err();
        assert!(matches!(err, TaxonFinderError::ConfigError(_)));
    }

    #[test]
    fn find_span_falls_back_to_case_insensitive() {
        let text = "We saw a Quercus robur nearby.";
        let (start, end) = find_span(text, "quercus robur");
        assert_eq!(&text[start..end], "Quercus robur");
    }
}
