//! iNaturalist taxon autocomplete client: cache-then-request, with
//! rate-limited retry/backoff on 429s and 5xxs.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde_json::Value;

use crate::cache::DiskCache;
use crate::config::InaturalistConfig;
use crate::error::{Result, TaxonFinderError};
use crate::models::{TaxonMatch, TaxonomyInfo};
use crate::rate_limiter::TokenBucketRateLimiter;

use super::TaxonSearcher;

pub struct INaturalistSearcher {
    http: reqwest::Client,
    config: InaturalistConfig,
    user_agent: String,
    rate_limiter: Option<std::sync::Arc<TokenBucketRateLimiter>>,
    cache: Option<DiskCache>,
    cache_hits: AtomicUsize,
}

impl INaturalistSearcher {
    pub fn new(
        http: reqwest::Client,
        config: InaturalistConfig,
        user_agent: String,
        rate_limiter: Option<std::sync::Arc<TokenBucketRateLimiter>>,
        cache: Option<DiskCache>,
    ) -> Self {
        INaturalistSearcher {
            http,
            config,
            user_agent,
            rate_limiter,
            cache,
            cache_hits: AtomicUsize::new(0),
        }
    }

    async fn request(&self, query: &str, locale: &str) -> Result<Value> {
        let url = format!("{}/v1/taxa/autocomplete", self.config.base_url.trim_end_matches('/'));
        let mut last_status = None;
        let mut last_body = String::new();

        for attempt in 0..=self.config.max_retries {
            if let Some(limiter) = &self.rate_limiter {
                let limiter = limiter.clone();
                tokio::task::spawn_blocking(move || limiter.acquire())
                    .await
                    .map_err(|e| TaxonFinderError::UpstreamError { status: 0, body: e.to_string() })?;
            }

            let response = self
                .http
                .get(&url)
                .query(&[("q", query), ("locale", locale)])
                .header("User-Agent", &self.user_agent)
                .timeout(std::time::Duration::from_secs_f64(self.config.timeout))
                .send()
                .await
                .map_err(|e| TaxonFinderError::UpstreamError { status: 0, body: e.to_string() })?;

            let status = response.status();
            if status == StatusCode::OK {
                return response
                    .json()
                    .await
                    .map_err(|e| TaxonFinderError::UpstreamError { status: status.as_u16(), body: e.to_string() });
            }

            last_body = response.text().await.unwrap_or_default();
            last_status = Some(status);

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt < self.config.max_retries {
                sleep_backoff(attempt).await;
                continue;
            }
            break;
        }

        Err(TaxonFinderError::UpstreamError {
            status: last_status.map(|s| s.as_u16()).unwrap_or(0),
            body: last_body,
        })
    }
}

#[async_trait]
impl TaxonSearcher for INaturalistSearcher {
    async fn search(&self, query: &str, locale: &str) -> Result<Vec<TaxonMatch>> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(query, locale)? {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(parse_matches(&cached, locale, query));
            }
        }

        let response = self.request(query, locale).await?;
        if let Some(cache) = &self.cache {
            cache.put(query, locale, &response)?;
        }
        Ok(parse_matches(&response, locale, query))
    }

    fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }
}

async fn sleep_backoff(attempt: u32) {
    let base_delay = 3.0 * 2f64.powi(attempt as i32);
    let jitter = 0.5 + rand::thread_rng().gen_range(0.0..0.5);
    tokio::time::sleep(std::time::Duration::from_secs_f64(base_delay * jitter)).await;
}

fn parse_matches(data: &Value, locale: &str, query: &str) -> Vec<TaxonMatch> {
    let results = data.get("results").and_then(Value::as_array).cloned().unwrap_or_default();
    results
        .into_iter()
        .take(5)
        .map(|result| {
            let taxon_id = result
                .get("id")
                .or_else(|| result.get("taxon_id"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let taxon_name = result.get("name").and_then(Value::as_str).unwrap_or("").to_string();
            let taxon_rank = result.get("rank").and_then(Value::as_str).unwrap_or("").to_string();
            let matched_name = result
                .get("matched_name")
                .or_else(|| result.get("matched_term"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| query.to_string());
            let taxon_url = result
                .get("uri")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("https://www.inaturalist.org/taxa/{taxon_id}"));
            let score = result.get("score").and_then(Value::as_f64).unwrap_or(0.0);
            let names = result.get("names");

            TaxonMatch {
                taxon_id,
                taxon_name: taxon_name.clone(),
                taxon_rank: taxon_rank.clone(),
                taxonomy: taxonomy_from_result(&result),
                taxon_common_name_en: extract_common_name_en(&result, names),
                taxon_common_name_loc: extract_locale_common_name(names, locale),
                taxon_matched_name: matched_name,
                taxon_url,
                score,
                taxon_names: extract_names(names),
            }
        })
        .collect()
}

fn extract_common_name_en(result: &Value, names: Option<&Value>) -> Option<String> {
    if let Some(items) = names.and_then(Value::as_array) {
        let mut fallback = None;
        for item in items {
            if item.get("locale").and_then(Value::as_str) != Some("en") {
                continue;
            }
            let Some(name) = item.get("name").and_then(Value::as_str) else { continue };
            if item.get("is_preferred").and_then(Value::as_bool).unwrap_or(false) {
                return Some(name.to_string());
            }
            if fallback.is_none() {
                fallback = Some(name.to_string());
            }
        }
        if fallback.is_some() {
            return fallback;
        }
    }
    result
        .get("preferred_common_name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            result
                .get("preferred_common_name")
                .and_then(Value::as_object)
                .and_then(|o| o.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
}

fn extract_locale_common_name(names: Option<&Value>, locale: &str) -> Option<String> {
    let items = names.and_then(Value::as_array)?;
    items
        .iter()
        .find(|item| item.get("locale").and_then(Value::as_str) == Some(locale) && item.get("name").is_some())
        .and_then(|item| item.get("name").and_then(Value::as_str).map(str::to_string))
}

fn extract_names(names: Option<&Value>) -> Vec<String> {
    let Some(items) = names.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| item.get("name").and_then(Value::as_str).map(str::to_string))
        .collect()
}

fn taxonomy_from_result(result: &Value) -> TaxonomyInfo {
    let mut info = TaxonomyInfo::default();
    if let Some(ancestors) = result.get("ancestors").and_then(Value::as_array) {
        for ancestor in ancestors {
            assign_rank(
                &mut info,
                ancestor.get("rank").and_then(Value::as_str),
                ancestor.get("name").and_then(Value::as_str),
            );
        }
    }
    assign_rank(&mut info, result.get("rank").and_then(Value::as_str), result.get("name").and_then(Value::as_str));
    info
}

fn assign_rank(info: &mut TaxonomyInfo, rank: Option<&str>, name: Option<&str>) {
    if let (Some(rank), Some(name)) = (rank, name) {
        info.set_rank(rank, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_basic_result() {
        let data = json!({
            "results": [
                {"id": 1, "name": "Tilia cordata", "rank": "species", "score": 0.9}
            ]
        });
        let matches = parse_matches(&data, "ru", "tilia cordata");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].taxon_id, 1);
        assert_eq!(matches[0].taxon_name, "Tilia cordata");
    }

    #[test]
    fn truncates_to_five_results() {
        let results: Vec<Value> = (0..10).map(|i| json!({"id": i, "name": format!("taxon{i}")})).collect();
        let data = json!({"results": results});
        assert_eq!(parse_matches(&data, "ru", "taxon").len(), 5);
    }

    #[test]
    fn prefers_preferred_english_common_name() {
        let data = json!({
            "results": [{
                "id": 1, "name": "Tilia cordata",
                "names": [
                    {"locale": "en", "name": "small-leaved lime", "is_preferred": false},
                    {"locale": "en", "name": "lime", "is_preferred": true},
                ]
            }]
        });
        let matches = parse_matches(&data, "ru", "quercus robur");
        assert_eq!(matches[0].taxon_common_name_en.as_deref(), Some("lime"));
    }

    #[test]
    fn matched_name_falls_back_to_the_query_when_upstream_omits_it() {
        let data = json!({"results": [{"id": 1, "name": "Quercus robur"}]});
        let matches = parse_matches(&data, "ru", "quercus robur");
        assert_eq!(matches[0].taxon_matched_name, "quercus robur");
    }

    #[test]
    fn preferred_common_name_object_form_is_read() {
        let data = json!({
            "results": [{
                "id": 1, "name": "Tilia cordata",
                "preferred_common_name": {"name": "lime"}
            }]
        });
        let matches = parse_matches(&data, "ru", "tilia cordata");
        assert_eq!(matches[0].taxon_common_name_en.as_deref(), Some("lime"));
    }

    #[tokio::test]
    async fn repeated_search_counts_as_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = crate::cache::DiskCache::open(crate::cache::DiskCacheConfig {
            path: dir.path().join("cache.db"),
            ttl_days: 7,
            schema_version: 1,
        })
        .unwrap();
        cache.put("дуб", "ru", &json!({"results": [{"id": 1, "name": "Quercus robur"}]})).unwrap();

        let searcher = INaturalistSearcher::new(
            reqwest::Client::new(),
            InaturalistConfig { cache_enabled: true, ..InaturalistConfig::default() },
            "TaxonFinder/test".to_string(),
            None,
            Some(cache),
        );
        assert_eq!(searcher.cache_hits(), 0);
        let matches = searcher.search("дуб", "ru").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(searcher.cache_hits(), 1);
    }
}
