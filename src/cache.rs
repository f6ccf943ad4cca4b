//! SQLite-backed disk cache for external taxon search responses, keyed by
//! `(query, locale)` with a TTL and schema-versioned via `PRAGMA user_version`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::Value;

use crate::error::{Result, TaxonFinderError};

#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    pub path: PathBuf,
    pub ttl_days: i64,
    pub schema_version: i64,
}

pub struct DiskCache {
    conn: Mutex<Connection>,
    ttl_days: i64,
}

impl DiskCache {
    pub fn open(config: DiskCacheConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TaxonFinderError::CacheError(format!("creating cache dir: {e}")))?;
        }
        let conn = Connection::open(&config.path)
            .map_err(|e| TaxonFinderError::CacheError(format!("opening cache db: {e}")))?;

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(cache_err)?;
        if version != 0 && version != config.schema_version {
            return Err(TaxonFinderError::SchemaMismatch {
                expected: config.schema_version,
                found: version,
                store: "cache",
            });
        }
        if version == 0 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS api_cache (
                    query TEXT NOT NULL,
                    locale TEXT NOT NULL,
                    response_json TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (query, locale)
                );",
            )
            .map_err(cache_err)?;
            conn.pragma_update(None, "user_version", config.schema_version)
                .map_err(cache_err)?;
        }

        Ok(DiskCache {
            conn: Mutex::new(conn),
            ttl_days: config.ttl_days,
        })
    }

    /// Returns `None` on a miss or an expired entry (expired rows are deleted
    /// as a side effect, matching the original cache's lazy eviction).
    pub fn get(&self, query: &str, locale: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT response_json, created_at FROM api_cache WHERE query = ?1 AND locale = ?2",
                [query, locale],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| {
                if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                    Ok(None)
                } else {
                    Err(e)
                }
            })
            .map_err(cache_err)?;

        let Some((response_json, created_at)) = row else {
            return Ok(None);
        };

        let created_at: DateTime<Utc> = created_at
            .parse()
            .map_err(|e| TaxonFinderError::CacheError(format!("parsing cache timestamp: {e}")))?;
        if Utc::now() - created_at > chrono::Duration::days(self.ttl_days) {
            conn.execute(
                "DELETE FROM api_cache WHERE query = ?1 AND locale = ?2",
                [query, locale],
            )
            .map_err(cache_err)?;
            return Ok(None);
        }

        let value: Value = serde_json::from_str(&response_json)
            .map_err(|e| TaxonFinderError::CacheError(format!("decoding cached response: {e}")))?;
        Ok(Some(value))
    }

    pub fn put(&self, query: &str, locale: &str, response: &Value) -> Result<()> {
        let payload = serde_json::to_string(response)
            .map_err(|e| TaxonFinderError::CacheError(format!("encoding response for cache: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO api_cache (query, locale, response_json, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![query, locale, payload, Utc::now().to_rfc3339()],
        )
        .map_err(cache_err)?;
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.conn.lock().path().map(PathBuf::from).unwrap_or_default()
    }
}

fn cache_err(e: rusqlite::Error) -> TaxonFinderError {
    TaxonFinderError::CacheError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> (tempfile::TempDir, DiskCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(DiskCacheConfig {
            path: dir.path().join("cache.db"),
            ttl_days: 7,
            schema_version: 1,
        })
        .unwrap();
        (dir, cache)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (_dir, cache) = cache();
        cache.put("quercus robur", "ru", &json!({"taxon_id": 1})).unwrap();
        let value = cache.get("quercus robur", "ru").unwrap().unwrap();
        assert_eq!(value["taxon_id"], 1);
    }

    #[test]
    fn miss_returns_none() {
        let (_dir, cache) = cache();
        assert!(cache.get("nothing here", "ru").unwrap().is_none());
    }

    #[test]
    fn expired_entry_is_evicted_on_read() {
        let (_dir, cache) = cache();
        {
            let conn = cache.conn.lock();
            let stale = Utc::now() - chrono::Duration::days(30);
            conn.execute(
                "INSERT INTO api_cache (query, locale, response_json, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params!["old", "ru", "{}", stale.to_rfc3339()],
            )
            .unwrap();
        }
        assert!(cache.get("old", "ru").unwrap().is_none());
    }
}
