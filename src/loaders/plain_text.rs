//! `.txt` loader: UTF-8 first, falling back to the Cyrillic encoding that
//! scores highest when UTF-8 decoding fails.

use std::path::Path;

use encoding_rs::{Encoding, ISO_8859_5, KOI8_R, WINDOWS_1251, X_MAC_CYRILLIC};

use crate::error::{Result, TaxonFinderError};

use super::TextLoader;

pub struct PlainTextLoader;

impl TextLoader for PlainTextLoader {
    fn supports(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("txt")).unwrap_or(false)
    }

    fn load(&self, path: &Path, max_file_size_mb: f64) -> Result<String> {
        if !path.exists() {
            return Err(TaxonFinderError::ConfigError(format!("input file not found: {}", path.display())));
        }

        let size_bytes = std::fs::metadata(path)
            .map_err(|e| TaxonFinderError::ConfigError(format!("stat {}: {e}", path.display())))?
            .len();
        let max_bytes = (max_file_size_mb * 1024.0 * 1024.0) as u64;
        if size_bytes > max_bytes {
            let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
            return Err(TaxonFinderError::ConfigError(format!(
                "input file exceeds maximum size ({max_file_size_mb:.1} MB). current: {size_mb:.1} MB"
            )));
        }

        let data = std::fs::read(path).map_err(|e| TaxonFinderError::ConfigError(format!("reading {}: {e}", path.display())))?;
        match std::str::from_utf8(&data) {
            Ok(text) => Ok(text.to_string()),
            Err(_) => decode_with_fallback(&data),
        }
    }
}

const FALLBACK_ENCODINGS: &[&Encoding] = &[WINDOWS_1251, KOI8_R, ISO_8859_5, X_MAC_CYRILLIC];

fn decode_with_fallback(data: &[u8]) -> Result<String> {
    let mut best_text: Option<String> = None;
    let mut best_score = 0u32;

    for encoding in FALLBACK_ENCODINGS {
        let (text, _, had_errors) = encoding.decode(data);
        if had_errors {
            continue;
        }
        let score = cyrillic_score(&text);
        if score > best_score {
            best_score = score;
            best_text = Some(text.into_owned());
        }
    }

    best_text.filter(|_| best_score > 0).ok_or_else(|| {
        TaxonFinderError::EncodingError("unable to detect input file encoding, please convert the file to utf-8".to_string())
    })
}

fn cyrillic_score(text: &str) -> u32 {
    let mut lower = 0u32;
    let mut upper = 0u32;
    for ch in text.chars() {
        if ('а'..='я').contains(&ch) || ch == 'ё' {
            lower += 1;
        } else if ('А'..='Я').contains(&ch) || ch == 'Ё' {
            upper += 1;
        }
    }
    lower * 2 + upper
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_txt_extension_case_insensitively() {
        let loader = PlainTextLoader;
        assert!(loader.supports(Path::new("notes.TXT")));
        assert!(!loader.supports(Path::new("notes.pdf")));
    }

    #[test]
    fn loads_valid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field.txt");
        std::fs::write(&path, "липа мелколистная".as_bytes()).unwrap();
        let loader = PlainTextLoader;
        let text = loader.load(&path, 2.0).unwrap();
        assert_eq!(text, "липа мелколистная");
    }

    #[test]
    fn rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, vec![b'a'; 2048]).unwrap();
        let loader = PlainTextLoader;
        let err = loader.load(&path, 0.001).unwrap_err();
        assert!(matches!(err, TaxonFinderError::ConfigError(_)));
    }

    #[test]
    fn falls_back_to_windows_1251_for_cyrillic_text() {
        let (bytes, _, had_errors) = WINDOWS_1251.encode("дуб черешчатый");
        assert!(!had_errors);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.txt");
        std::fs::write(&path, &bytes).unwrap();
        let loader = PlainTextLoader;
        let text = loader.load(&path, 2.0).unwrap();
        assert_eq!(text, "дуб черешчатый");
    }
}
