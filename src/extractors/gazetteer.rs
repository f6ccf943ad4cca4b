//! Gazetteer phrase extractor: matches known common names against the input
//! text using an Aho-Corasick automaton built from the gazetteer's
//! normalized and lemmatized name keys.

use std::collections::HashMap;

use aho_corasick::{AhoCorasick, MatchKind};

use crate::error::Result;
use crate::extractors::{line_context, line_number};
use crate::gazetteer::storage::{GazetteerNameMappings, GazetteerStorage};
use crate::models::{Candidate, ExtractionMethod};
use crate::normalizer::{lemmatize, normalize, MorphAnalyzer};

use super::SentenceSpan;

pub struct GazetteerExtractor {
    mappings: GazetteerNameMappings,
    matcher: AhoCorasick,
}

impl GazetteerExtractor {
    pub fn new(storage: &GazetteerStorage, locale: &str) -> Result<Self> {
        let mappings = storage.load_name_mappings(locale)?;
        let mut patterns: Vec<&str> = mappings
            .normalized
            .keys()
            .chain(mappings.lemmatized.keys())
            .map(|s| s.as_str())
            .collect();
        patterns.sort_unstable();
        patterns.dedup();

        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .ascii_case_insensitive(true)
            .build(&patterns)
            .expect("gazetteer patterns always build a valid automaton");

        Ok(GazetteerExtractor { mappings, matcher })
    }

    /// Matching runs against a lowercased copy of `text`. Standard Cyrillic
    /// and ASCII letters lowercase byte-for-byte in Rust, so span offsets
    /// carry over to the original text unchanged; this is a deliberate
    /// simplification given the crate has no full NLP tokenizer.
    pub fn extract(&self, text: &str, sentences: &[SentenceSpan], morph: &dyn MorphAnalyzer) -> Vec<Candidate> {
        let lowered = text.to_lowercase();
        let mut by_span: HashMap<(usize, usize), (Candidate, Vec<i64>)> = HashMap::new();

        for m in self.matcher.find_overlapping_iter(&lowered) {
            let start = m.start();
            let end = m.end();
            if !is_word_boundary_match(&lowered, start, end) {
                continue;
            }
            let span_text = &text[start..end];
            let normalized = normalize(span_text);
            let lemmatized = lemmatize(span_text, morph);

            let (taxon_ids, exact_match) = match_taxon_ids(&self.mappings, &normalized, &lemmatized);
            if taxon_ids.is_empty() {
                continue;
            }

            let confidence = confidence(exact_match, taxon_ids.len());
            let source_context = sentence_context(text, start, end, sentences);
            let candidate = Candidate {
                source_text: span_text.to_string(),
                source_context,
                line_number: line_number(text, start),
                start_char: start,
                end_char: end,
                normalized,
                lemmatized,
                method: ExtractionMethod::Gazetteer,
                confidence,
                gazetteer_taxon_ids: taxon_ids.clone(),
            };

            by_span
                .entry((start, end))
                .and_modify(|(existing, ids)| {
                    let merged = merge_ids(ids, &taxon_ids);
                    *ids = merged.clone();
                    if candidate.confidence > existing.confidence {
                        *existing = candidate.clone();
                        existing.gazetteer_taxon_ids = merged;
                    } else {
                        existing.gazetteer_taxon_ids = merged;
                    }
                })
                .or_insert_with(|| (candidate, taxon_ids));
        }

        by_span.into_values().map(|(c, _)| c).collect()
    }
}

/// Mimics spaCy's `PhraseMatcher(attr="LOWER")`, which only ever matches
/// whole tokens: a hit is rejected if the character immediately before or
/// after the span is alphanumeric, i.e. the span is embedded in a longer
/// word rather than standing on its own.
fn is_word_boundary_match(lowered: &str, start: usize, end: usize) -> bool {
    let before_ok = lowered[..start].chars().next_back().map(|c| !c.is_alphanumeric()).unwrap_or(true);
    let after_ok = lowered[end..].chars().next().map(|c| !c.is_alphanumeric()).unwrap_or(true);
    before_ok && after_ok
}

fn merge_ids(a: &[i64], b: &[i64]) -> Vec<i64> {
    let mut merged: Vec<i64> = a.iter().chain(b.iter()).copied().collect();
    merged.sort_unstable();
    merged.dedup();
    merged
}

fn match_taxon_ids(mappings: &GazetteerNameMappings, normalized: &str, lemmatized: &str) -> (Vec<i64>, bool) {
    if let Some(ids) = mappings.normalized.get(normalized) {
        return (ids.clone(), true);
    }
    if let Some(ids) = mappings.lemmatized.get(lemmatized) {
        return (ids.clone(), false);
    }
    (Vec::new(), false)
}

fn confidence(exact_match: bool, taxon_count: usize) -> f64 {
    if exact_match {
        if taxon_count == 1 {
            1.0
        } else {
            0.8
        }
    } else if taxon_count == 1 {
        0.9
    } else {
        0.7
    }
}

fn sentence_context(text: &str, start: usize, end: usize, sentences: &[SentenceSpan]) -> String {
    for sentence in sentences {
        if sentence.start <= start && start < sentence.end {
            return sentence.text.clone();
        }
    }
    let _ = end;
    line_context(text, start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::IdentityAnalyzer;
    use rusqlite::Connection;

    fn seeded_storage() -> (tempfile::NamedTempFile, GazetteerStorage) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "PRAGMA user_version = 1;
             CREATE TABLE taxa (taxon_id INTEGER PRIMARY KEY, taxon_name TEXT, taxon_rank TEXT, ancestry TEXT);
             CREATE TABLE common_names (
                 taxon_id INTEGER, name TEXT, name_normalized TEXT, name_lemmatized TEXT,
                 locale TEXT, is_preferred INTEGER
             );
             INSERT INTO taxa VALUES (1, 'Tilia cordata', 'species', NULL);
             INSERT INTO common_names VALUES (1, 'липа', 'липа', 'липа', 'ru', 1);",
        )
        .unwrap();
        let storage = GazetteerStorage::open(file.path(), 1).unwrap();
        (file, storage)
    }

    #[test]
    fn exact_normalized_match_gets_full_confidence() {
        let (_file, storage) = seeded_storage();
        let extractor = GazetteerExtractor::new(&storage, "ru").unwrap();
        let morph = IdentityAnalyzer;
        let text = "Рядом растёт липа.";
        let sentences = super::super::split_sentences(text);
        let candidates = extractor.extract(text, &sentences, &morph);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].confidence, 1.0);
        assert_eq!(candidates[0].gazetteer_taxon_ids, vec![1]);
    }

    #[test]
    fn substring_inside_a_longer_word_is_not_a_match() {
        let (_file, storage) = seeded_storage();
        let extractor = GazetteerExtractor::new(&storage, "ru").unwrap();
        let morph = IdentityAnalyzer;
        let text = "Здесь растёт липария, а не то растение.";
        let sentences = super::super::split_sentences(text);
        assert!(extractor.extract(text, &sentences, &morph).is_empty());
    }

    #[test]
    fn no_match_yields_no_candidates() {
        let (_file, storage) = seeded_storage();
        let extractor = GazetteerExtractor::new(&storage, "ru").unwrap();
        let morph = IdentityAnalyzer;
        let text = "Ничего интересного здесь нет.";
        let sentences = super::super::split_sentences(text);
        assert!(extractor.extract(text, &sentences, &morph).is_empty());
    }
}
