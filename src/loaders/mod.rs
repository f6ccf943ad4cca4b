//! Input file loading: format dispatch over a small set of [`TextLoader`]s.

pub mod plain_text;

use std::path::Path;

use crate::error::Result;

pub use plain_text::PlainTextLoader;

pub trait TextLoader: Send + Sync {
    fn supports(&self, path: &Path) -> bool;
    fn load(&self, path: &Path, max_file_size_mb: f64) -> Result<String>;
}

/// Tries each registered loader in turn and uses the first one whose
/// `supports` matches the path's extension.
pub fn load_text(path: &Path, max_file_size_mb: f64) -> Result<String> {
    let loaders: Vec<Box<dyn TextLoader>> = vec![Box::new(PlainTextLoader)];
    for loader in &loaders {
        if loader.supports(path) {
            return loader.load(path, max_file_size_mb);
        }
    }
    Err(crate::error::TaxonFinderError::ConfigError(format!(
        "unsupported file format: {}",
        path.extension().and_then(|e| e.to_str()).unwrap_or("")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.docx");
        std::fs::write(&path, b"hello").unwrap();
        assert!(load_text(&path, 2.0).is_err());
    }
}
