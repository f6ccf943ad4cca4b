//! Candidate extraction: gazetteer phrase matching, Latin binomial regex,
//! and an optional LLM-based extractor.

pub mod gazetteer;
pub mod latin;
pub mod llm;

/// A sentence's character span within the source text, plus its text.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Deliberately simple sentence splitter: breaks after `.`, `!`, `?`, or `…`
/// when followed by whitespace and an uppercase/quote character. No
/// abbreviation handling — this crate has no NLP dependency to do better.
pub fn split_sentences(text: &str) -> Vec<SentenceSpan> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut spans = Vec::new();
    let mut start = 0usize;

    let mut i = 0;
    while i < chars.len() {
        let (byte_idx, ch) = chars[i];
        if matches!(ch, '.' | '!' | '?' | '…') {
            let boundary_byte = byte_idx + ch.len_utf8();
            let mut j = i + 1;
            while j < chars.len() && chars[j].1.is_whitespace() {
                j += 1;
            }
            let next_starts_sentence = j >= chars.len()
                || chars[j].1.is_uppercase()
                || matches!(chars[j].1, '"' | '«' | '“');
            if next_starts_sentence && boundary_byte > start {
                let piece = text[start..boundary_byte].trim();
                if !piece.is_empty() {
                    let trimmed_start = start + (text[start..boundary_byte].len() - text[start..boundary_byte].trim_start().len());
                    spans.push(SentenceSpan {
                        start: trimmed_start,
                        end: trimmed_start + piece.len(),
                        text: piece.to_string(),
                    });
                }
                start = boundary_byte;
            }
        }
        i += 1;
    }

    if start < text.len() {
        let piece = text[start..].trim();
        if !piece.is_empty() {
            let trimmed_start = start + (text[start..].len() - text[start..].trim_start().len());
            spans.push(SentenceSpan {
                start: trimmed_start,
                end: trimmed_start + piece.len(),
                text: piece.to_string(),
            });
        }
    }
    spans
}

/// Character range of the line containing `start`, matching the Python
/// implementation's `_line_context` helper used by every extractor.
pub fn line_context(text: &str, start: usize) -> String {
    let line_start = text[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[start..].find('\n').map(|i| start + i).unwrap_or(text.len());
    text[line_start..line_end].to_string()
}

pub fn line_number(text: &str, start: usize) -> usize {
    text[..start].matches('\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_period_before_uppercase() {
        let spans = split_sentences("Видел дуб. Потом липу.");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "Видел дуб.");
        assert_eq!(spans[1].text, "Потом липу.");
    }

    #[test]
    fn line_context_extracts_containing_line() {
        let text = "line one\nline two\nline three";
        let ctx = line_context(text, 12);
        assert_eq!(ctx, "line two");
    }

    #[test]
    fn line_number_counts_preceding_newlines() {
        let text = "a\nb\nc";
        assert_eq!(line_number(text, 4), 3);
    }
}
