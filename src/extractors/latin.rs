//! Latin binomial extractor: a capitalized-genus/lowercase-species regex
//! filtered by a stop-phrase list and a person-title heuristic.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::extractors::{line_context, line_number, SentenceSpan};
use crate::models::{Candidate, ExtractionMethod};
use crate::normalizer::{lemmatize, normalize, MorphAnalyzer};

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][a-z]+ [a-z]{2,}(?: [a-z]{2,})?\b").unwrap())
}

fn default_stop_phrases() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "et cetera",
            "ad libitum",
            "in situ",
            "ex vivo",
            "de facto",
            "pro rata",
            "per se",
            "ab initio",
            "status quo",
            "modus operandi",
            "alma mater",
            "anno domini",
        ]
        .into_iter()
        .collect()
    })
}

fn titles() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| ["mr", "dr", "prof", "von", "van"].into_iter().collect())
}

fn title_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\b\w+)[\s.]+$").unwrap())
}

pub struct LatinRegexExtractor<'a> {
    stop_phrases: HashSet<String>,
    is_known_name: Option<Box<dyn Fn(&str) -> bool + 'a>>,
}

impl<'a> LatinRegexExtractor<'a> {
    pub fn new() -> Self {
        LatinRegexExtractor {
            stop_phrases: default_stop_phrases().iter().map(|s| s.to_string()).collect(),
            is_known_name: None,
        }
    }

    pub fn with_known_name_check(mut self, check: impl Fn(&str) -> bool + 'a) -> Self {
        self.is_known_name = Some(Box::new(check));
        self
    }

    pub fn extract(&self, text: &str, sentences: &[SentenceSpan], morph: &dyn MorphAnalyzer) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for m in pattern().find_iter(text) {
            let source_text = m.as_str();
            let lower = source_text.to_lowercase();

            if !passes_length_filter(source_text) {
                continue;
            }
            if self.stop_phrases.contains(&lower) {
                continue;
            }
            if has_person_title(text, m.start()) {
                continue;
            }

            let known = self.is_known_name.as_ref().map(|f| f(&lower)).unwrap_or(false);
            let confidence = if known { 0.9 } else { 0.7 };
            let source_context = find_context(text, m.start(), sentences);

            candidates.push(Candidate {
                source_text: source_text.to_string(),
                source_context,
                line_number: line_number(text, m.start()),
                start_char: m.start(),
                end_char: m.end(),
                normalized: normalize(source_text),
                lemmatized: lemmatize(source_text, morph),
                method: ExtractionMethod::LatinRegex,
                confidence,
                gazetteer_taxon_ids: Vec::new(),
            });
        }
        candidates
    }
}

impl<'a> Default for LatinRegexExtractor<'a> {
    fn default() -> Self {
        Self::new()
    }
}

fn passes_length_filter(source_text: &str) -> bool {
    source_text.split_whitespace().all(|word| word.chars().count() >= 3)
}

fn has_person_title(text: &str, start: usize) -> bool {
    let prefix = text[..start].trim_end();
    match title_prefix_re().captures(prefix) {
        Some(caps) => titles().contains(caps[1].to_lowercase().as_str()),
        None => false,
    }
}

fn find_context(text: &str, start: usize, sentences: &[SentenceSpan]) -> String {
    for sentence in sentences {
        if sentence.start <= start && start < sentence.end {
            return sentence.text.clone();
        }
    }
    line_context(text, start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::IdentityAnalyzer;

    #[test]
    fn matches_latin_binomial() {
        let extractor = LatinRegexExtractor::new();
        let morph = IdentityAnalyzer;
        let text = "Found Quercus robur near the river.";
        let sentences = super::super::split_sentences(text);
        let candidates = extractor.extract(text, &sentences, &morph);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source_text, "Quercus robur");
    }

    #[test]
    fn stop_phrase_is_filtered_out() {
        let extractor = LatinRegexExtractor::new();
        let morph = IdentityAnalyzer;
        let text = "We observed this in situ yesterday.";
        let sentences = super::super::split_sentences(text);
        let candidates = extractor.extract(text, &sentences, &morph);
        assert!(candidates.is_empty());
    }

    #[test]
    fn person_title_is_filtered_out() {
        let extractor = LatinRegexExtractor::new();
        let morph = IdentityAnalyzer;
        let text = "According to Dr Ivan Petrov the site was surveyed.";
        let sentences = super::super::split_sentences(text);
        let candidates = extractor.extract(text, &sentences, &morph);
        assert!(candidates.iter().all(|c| c.source_text != "Ivan Petrov"));
    }

    #[test]
    fn known_name_gets_higher_confidence() {
        let extractor = LatinRegexExtractor::new().with_known_name_check(|name| name == "quercus robur");
        let morph = IdentityAnalyzer;
        let text = "Quercus robur grows here.";
        let sentences = super::super::split_sentences(text);
        let candidates = extractor.extract(text, &sentences, &morph);
        assert_eq!(candidates[0].confidence, 0.9);
    }
}
