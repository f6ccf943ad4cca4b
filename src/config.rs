//! Configuration loading and validation.
//!
//! Mirrors this codebase's existing `RAGConfig::from_file` / `validate`
//! split: plain `serde_json` deserialization onto `Option`-shaped fields
//! followed by manual, field-by-field validation rather than a JSON-schema
//! dependency.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaxonFinderError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InaturalistConfig {
    pub base_url: String,
    pub timeout: f64,
    pub rate_limit: f64,
    pub burst_limit: u32,
    pub max_retries: u32,
    pub cache_enabled: bool,
    pub cache_path: String,
    pub cache_ttl_days: i64,
}

impl Default for InaturalistConfig {
    fn default() -> Self {
        InaturalistConfig {
            base_url: "https://api.inaturalist.org".to_string(),
            timeout: 30.0,
            rate_limit: 1.0,
            burst_limit: 5,
            max_retries: 3,
            cache_enabled: true,
            cache_path: "cache/taxonfinder.db".to_string(),
            cache_ttl_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmExtractorConfig {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub url: Option<String>,
    pub timeout: f64,
    pub prompt_file: String,
    pub chunk_strategy: String,
    pub min_chunk_words: usize,
    pub max_chunk_words: usize,
    pub auto_start: bool,
    pub auto_pull_model: bool,
    pub stop_after_run: bool,
}

impl Default for LlmExtractorConfig {
    fn default() -> Self {
        LlmExtractorConfig {
            enabled: true,
            provider: String::new(),
            model: String::new(),
            url: None,
            timeout: 60.0,
            prompt_file: "prompts/llm_extractor.txt".to_string(),
            chunk_strategy: "paragraph".to_string(),
            min_chunk_words: 50,
            max_chunk_words: 500,
            auto_start: false,
            auto_pull_model: false,
            stop_after_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmEnricherConfig {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub url: Option<String>,
    pub timeout: f64,
    pub prompt_file: String,
    pub auto_start: bool,
    pub auto_pull_model: bool,
    pub stop_after_run: bool,
}

impl Default for LlmEnricherConfig {
    fn default() -> Self {
        LlmEnricherConfig {
            enabled: true,
            provider: String::new(),
            model: String::new(),
            url: None,
            timeout: 30.0,
            prompt_file: "prompts/llm_enricher.txt".to_string(),
            auto_start: false,
            auto_pull_model: false,
            stop_after_run: false,
        }
    }
}

/// Top-level config, deserialized straight from the user's JSON file.
/// `confidence` and `locale` have no defaults — callers must supply them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub confidence: f64,
    pub locale: String,
    #[serde(default = "default_gazetteer_path")]
    pub gazetteer_path: String,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: f64,
    #[serde(default)]
    pub degraded_mode: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub inaturalist: InaturalistConfig,
    #[serde(default)]
    pub llm_extractor: Option<LlmExtractorConfig>,
    #[serde(default)]
    pub llm_enricher: Option<LlmEnricherConfig>,
}

fn default_gazetteer_path() -> String {
    "data/gazetteer.db".to_string()
}

fn default_max_file_size_mb() -> f64 {
    2.0
}

fn default_user_agent() -> String {
    format!("TaxonFinder/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    /// Reads, parses, and validates the config at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TaxonFinderError::ConfigError(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TaxonFinderError::ConfigError(format!("reading {}: {e}", path.display())))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| TaxonFinderError::ConfigError(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(TaxonFinderError::ConfigError(
                "confidence must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.locale.trim().is_empty() {
            return Err(TaxonFinderError::ConfigError("locale must not be empty".to_string()));
        }
        if self.max_file_size_mb <= 0.0 {
            return Err(TaxonFinderError::ConfigError(
                "max_file_size_mb must be positive".to_string(),
            ));
        }
        if let Some(extractor) = &self.llm_extractor {
            require_llm_fields("llm_extractor", &extractor.provider, &extractor.model)?;
            require_known_chunk_strategy(&extractor.chunk_strategy)?;
        }
        if let Some(enricher) = &self.llm_enricher {
            require_llm_fields("llm_enricher", &enricher.provider, &enricher.model)?;
        }
        Ok(())
    }
}

fn require_known_chunk_strategy(strategy: &str) -> Result<()> {
    match strategy {
        "paragraph" | "page" => Ok(()),
        other => Err(TaxonFinderError::ConfigError(format!("unknown chunk strategy: {other}"))),
    }
}

fn require_llm_fields(name: &str, provider: &str, model: &str) -> Result<()> {
    let mut missing = Vec::new();
    if provider.is_empty() {
        missing.push("provider");
    }
    if model.is_empty() {
        missing.push("model");
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TaxonFinderError::ConfigError(format!(
            "{name} missing fields: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_confidence_out_of_range() {
        let config = Config {
            confidence: 1.5,
            locale: "ru".into(),
            gazetteer_path: default_gazetteer_path(),
            max_file_size_mb: default_max_file_size_mb(),
            degraded_mode: false,
            user_agent: default_user_agent(),
            inaturalist: InaturalistConfig::default(),
            llm_extractor: None,
            llm_enricher: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_llm_config_missing_provider() {
        let config = Config {
            confidence: 0.8,
            locale: "ru".into(),
            gazetteer_path: default_gazetteer_path(),
            max_file_size_mb: default_max_file_size_mb(),
            degraded_mode: false,
            user_agent: default_user_agent(),
            inaturalist: InaturalistConfig::default(),
            llm_extractor: Some(LlmExtractorConfig {
                model: "llama3".into(),
                ..Default::default()
            }),
            llm_enricher: None,
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, TaxonFinderError::ConfigError(_)));
    }

    #[test]
    fn rejects_unknown_chunk_strategy() {
        let config = Config {
            confidence: 0.8,
            locale: "ru".into(),
            gazetteer_path: default_gazetteer_path(),
            max_file_size_mb: default_max_file_size_mb(),
            degraded_mode: false,
            user_agent: default_user_agent(),
            inaturalist: InaturalistConfig::default(),
            llm_extractor: Some(LlmExtractorConfig {
                provider: "ollama".into(),
                model: "llama3".into(),
                chunk_strategy: "sentence".into(),
                ..Default::default()
            }),
            llm_enricher: None,
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, TaxonFinderError::ConfigError(_)));
    }

    #[test]
    fn accepts_minimal_valid_config() {
        let json = r#"{"confidence": 0.75, "locale": "ru"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.gazetteer_path, "data/gazetteer.db");
    }
}
