//! Text normalization and lemmatization used to key candidates, gazetteer
//! entries, and merge groups onto a shared comparable form.

use regex::Regex;
use std::sync::OnceLock;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-zА-Яа-яЁё]+").unwrap())
}

fn cyrillic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[А-Яа-яЁё]").unwrap())
}

/// Morphological analyzer seam. Implementations resolve a surface token to
/// its dictionary (normal) form; the crate ships only [`IdentityAnalyzer`].
pub trait MorphAnalyzer: Send + Sync {
    fn normal_form(&self, word: &str) -> String;
}

/// No-op analyzer: returns the token unchanged, lowercased. Used when no
/// morphological backend is configured (non-Russian locales, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityAnalyzer;

impl MorphAnalyzer for IdentityAnalyzer {
    fn normal_form(&self, word: &str) -> String {
        word.to_lowercase()
    }
}

/// Lowercases and folds `ё` to `е`, matching the original gazetteer's key form.
pub fn normalize(text: &str) -> String {
    text.to_lowercase().replace('ё', "е")
}

/// Per-token normal form via `morph` for Cyrillic tokens; ASCII tokens are
/// just lowercased, since the only morphological backend targets Russian.
pub fn lemmatize(text: &str, morph: &dyn MorphAnalyzer) -> String {
    let tokens: Vec<&str> = token_re().find_iter(text).map(|m| m.as_str()).collect();
    let mut lemmas = Vec::with_capacity(tokens.len());
    for token in tokens {
        if cyrillic_re().is_match(token) {
            lemmas.push(normalize(&morph.normal_form(token)));
        } else {
            lemmas.push(token.to_lowercase());
        }
    }
    lemmas.join(" ")
}

/// All distinct lookup forms worth trying against the gazetteer for a span
/// of text: verbatim-lowercased, normalized, lemmatized, and normalized-lemma.
/// Order matters — callers try these in order and stop at the first hit.
pub fn search_variants(text: &str, morph: &dyn MorphAnalyzer) -> Vec<String> {
    let original = text.to_lowercase();
    let normalized = normalize(text);
    let lemmatized = lemmatize(text, morph);
    let lemmatized_normalized = normalize(&lemmatized);

    let mut variants = Vec::with_capacity(4);
    for value in [original, normalized, lemmatized, lemmatized_normalized] {
        if !value.is_empty() && !variants.contains(&value) {
            variants.push(value);
        }
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_yo_and_lowercases() {
        assert_eq!(normalize("Ёжик"), "ежик");
    }

    #[test]
    fn identity_analyzer_lowercases_cyrillic_tokens() {
        let morph = IdentityAnalyzer;
        assert_eq!(lemmatize("Липа европейская", &morph), "липа европейская");
    }

    #[test]
    fn search_variants_dedupes_and_skips_empty() {
        let morph = IdentityAnalyzer;
        let variants = search_variants("Липа", &morph);
        assert_eq!(variants, vec!["липа".to_string()]);
    }

    #[test]
    fn search_variants_keeps_distinct_forms() {
        struct UpperStrip;
        impl MorphAnalyzer for UpperStrip {
            fn normal_form(&self, word: &str) -> String {
                format!("{}X", word.to_lowercase())
            }
        }
        let variants = search_variants("Дуб", &UpperStrip);
        assert!(variants.contains(&"дуб".to_string()));
        assert!(variants.iter().any(|v| v.starts_with("дуб") && v != "дуб"));
    }
}
