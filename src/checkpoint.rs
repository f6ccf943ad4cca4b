//! File-based checkpoint store, keyed by `sha256(text + "\n" + canonical config json)`.

use std::path::PathBuf;

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::{Result, TaxonFinderError};

pub struct FileCheckpoint {
    base_dir: PathBuf,
}

impl FileCheckpoint {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| TaxonFinderError::ConfigError(format!("creating checkpoint dir: {e}")))?;
        Ok(FileCheckpoint { base_dir })
    }

    /// Hashes the input text together with a canonical (sorted-key) JSON
    /// rendering of `config`, so any config change invalidates checkpoints.
    pub fn key(&self, text: &str, config: &Config) -> Result<String> {
        let config_json = canonical_json(config)?;
        let payload = format!("{text}\n{config_json}");
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn save<T: Serialize>(&self, key: &str, data: &T) -> Result<PathBuf> {
        let path = self.path_for(key);
        let json = serde_json::to_string(data)
            .map_err(|e| TaxonFinderError::ConfigError(format!("encoding checkpoint: {e}")))?;
        std::fs::write(&path, json).map_err(|e| TaxonFinderError::ConfigError(format!("writing checkpoint: {e}")))?;
        Ok(path)
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| TaxonFinderError::ConfigError(format!("reading checkpoint: {e}")))?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| TaxonFinderError::ConfigError(format!("decoding checkpoint: {e}")))
    }

    pub fn clear(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| TaxonFinderError::ConfigError(format!("removing checkpoint: {e}")))?;
        }
        Ok(())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }
}

/// Re-serializes `config` through a `BTreeMap` so object keys come out
/// sorted, matching Python's `json.dumps(..., sort_keys=True)`.
fn canonical_json(config: &Config) -> Result<String> {
    let value = serde_json::to_value(config).map_err(|e| TaxonFinderError::ConfigError(format!("encoding config: {e}")))?;
    let sorted = sort_keys(value);
    serde_json::to_string(&sorted).map_err(|e| TaxonFinderError::ConfigError(format!("encoding config: {e}")))
}

fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Value> = map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            serde_json::to_value(sorted).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InaturalistConfig;

    fn sample_config() -> Config {
        Config {
            confidence: 0.8,
            locale: "ru".into(),
            gazetteer_path: "data/gazetteer.db".into(),
            max_file_size_mb: 2.0,
            degraded_mode: false,
            user_agent: "TaxonFinder/0.1.0".into(),
            inaturalist: InaturalistConfig::default(),
            llm_extractor: None,
            llm_enricher: None,
        }
    }

    #[test]
    fn same_text_and_config_yield_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let cp = FileCheckpoint::new(dir.path()).unwrap();
        let config = sample_config();
        let a = cp.key("some text", &config).unwrap();
        let b = cp.key("some text", &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_text_yields_different_key() {
        let dir = tempfile::tempdir().unwrap();
        let cp = FileCheckpoint::new(dir.path()).unwrap();
        let config = sample_config();
        let a = cp.key("text a", &config).unwrap();
        let b = cp.key("text b", &config).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn save_load_clear_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cp = FileCheckpoint::new(dir.path()).unwrap();
        let key = "abc123";
        cp.save(key, &serde_json::json!({"n": 1})).unwrap();
        let loaded: Option<serde_json::Value> = cp.load(key).unwrap();
        assert_eq!(loaded.unwrap()["n"], 1);
        cp.clear(key).unwrap();
        let after: Option<serde_json::Value> = cp.load(key).unwrap();
        assert!(after.is_none());
    }
}
