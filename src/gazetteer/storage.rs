//! Read-only SQLite-backed gazetteer: taxon records keyed by common-name forms.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::{Result, TaxonFinderError};

#[derive(Debug, Clone, Default)]
pub struct GazetteerNameMappings {
    pub normalized: HashMap<String, Vec<i64>>,
    pub lemmatized: HashMap<String, Vec<i64>>,
}

#[derive(Debug, Clone)]
pub struct GazetteerTaxonRecord {
    pub taxon_id: i64,
    pub taxon_name: String,
    pub taxon_rank: String,
    pub ancestry: Option<String>,
    pub taxon_common_name_en: Option<String>,
    pub taxon_common_name_loc: Option<String>,
}

struct NameRow {
    name: String,
    locale: String,
    is_preferred: bool,
}

pub struct GazetteerStorage {
    conn: Mutex<Connection>,
}

impl GazetteerStorage {
    pub fn open(path: &Path, schema_version: i64) -> Result<Self> {
        if !path.exists() {
            return Err(TaxonFinderError::MissingGazetteer(path.to_path_buf()));
        }
        let conn = Connection::open(path)
            .map_err(|e| TaxonFinderError::ConfigError(format!("opening gazetteer: {e}")))?;
        let found: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| TaxonFinderError::ConfigError(format!("reading gazetteer schema version: {e}")))?;
        if found != schema_version {
            return Err(TaxonFinderError::SchemaMismatch {
                expected: schema_version,
                found,
                store: "gazetteer",
            });
        }
        Ok(GazetteerStorage {
            conn: Mutex::new(conn),
        })
    }

    pub fn load_name_mappings(&self, locale: &str) -> Result<GazetteerNameMappings> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT taxon_id, name_normalized, name_lemmatized \
                 FROM common_names WHERE locale = ?1",
            )
            .map_err(cache_err)?;
        let rows = stmt
            .query_map([locale], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(cache_err)?;

        let mut mappings = GazetteerNameMappings::default();
        for row in rows {
            let (taxon_id, normalized, lemmatized) = row.map_err(cache_err)?;
            if let Some(normalized) = normalized.filter(|s| !s.is_empty()) {
                mappings.normalized.entry(normalized).or_default().push(taxon_id);
            }
            if let Some(lemmatized) = lemmatized.filter(|s| !s.is_empty()) {
                mappings.lemmatized.entry(lemmatized).or_default().push(taxon_id);
            }
        }
        Ok(mappings)
    }

    pub fn get_taxon_ids(&self, name_normalized: &str, locale: &str) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT taxon_id FROM common_names WHERE name_normalized = ?1 AND locale = ?2")
            .map_err(cache_err)?;
        let ids = stmt
            .query_map([name_normalized, locale], |row| row.get::<_, i64>(0))
            .map_err(cache_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(cache_err)?;
        Ok(ids)
    }

    /// Full record with preferred common names resolved, used for the
    /// gazetteer's skip-resolution (single unambiguous taxon id) path.
    pub fn get_full_record(&self, taxon_id: i64, locale: &str) -> Result<Option<GazetteerTaxonRecord>> {
        let conn = self.conn.lock();
        let taxon_row = conn
            .query_row(
                "SELECT taxon_id, taxon_name, taxon_rank, ancestry FROM taxa WHERE taxon_id = ?1",
                [taxon_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
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

        let Some((taxon_id, taxon_name, taxon_rank, ancestry)) = taxon_row else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare(
                "SELECT name, locale, is_preferred FROM common_names \
                 WHERE taxon_id = ?1 AND locale IN (?2, 'en')",
            )
            .map_err(cache_err)?;
        let names: Vec<NameRow> = stmt
            .query_map(rusqlite::params![taxon_id, locale], |row| {
                Ok(NameRow {
                    name: row.get(0)?,
                    locale: row.get(1)?,
                    is_preferred: row.get::<_, i64>(2)? != 0,
                })
            })
            .map_err(cache_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(cache_err)?;

        Ok(Some(GazetteerTaxonRecord {
            taxon_id,
            taxon_name,
            taxon_rank,
            ancestry,
            taxon_common_name_en: preferred_name(&names, "en"),
            taxon_common_name_loc: preferred_name(&names, locale),
        }))
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.conn.lock().path().map(PathBuf::from)
    }

    /// Every Latin taxon name in the gazetteer, lowercased, used to boost the
    /// Latin-regex extractor's confidence for names it already knows about.
    pub fn all_latin_names(&self) -> Result<std::collections::HashSet<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT taxon_name FROM taxa").map_err(cache_err)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(cache_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(cache_err)?;
        Ok(names.into_iter().map(|n| n.to_lowercase()).collect())
    }
}

fn preferred_name(rows: &[NameRow], locale: &str) -> Option<String> {
    let mut fallback = None;
    for row in rows {
        if row.locale != locale {
            continue;
        }
        if row.is_preferred {
            return Some(row.name.clone());
        }
        if fallback.is_none() {
            fallback = Some(row.name.clone());
        }
    }
    fallback
}

fn cache_err(e: rusqlite::Error) -> TaxonFinderError {
    TaxonFinderError::CacheError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_db() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "PRAGMA user_version = 1;
             CREATE TABLE taxa (taxon_id INTEGER PRIMARY KEY, taxon_name TEXT, taxon_rank TEXT, ancestry TEXT);
             CREATE TABLE common_names (
                 taxon_id INTEGER, name TEXT, name_normalized TEXT, name_lemmatized TEXT,
                 locale TEXT, is_preferred INTEGER
             );
             INSERT INTO taxa VALUES (1, 'Tilia cordata', 'species', '1/2/3');
             INSERT INTO common_names VALUES (1, 'липа', 'липа', 'липа', 'ru', 1);
             INSERT INTO common_names VALUES (1, 'lime', 'lime', 'lime', 'en', 1);",
        )
        .unwrap();
        file
    }

    #[test]
    fn loads_name_mappings_for_locale() {
        let file = seeded_db();
        let storage = GazetteerStorage::open(file.path(), 1).unwrap();
        let mappings = storage.load_name_mappings("ru").unwrap();
        assert_eq!(mappings.normalized.get("липа"), Some(&vec![1]));
    }

    #[test]
    fn full_record_prefers_preferred_name() {
        let file = seeded_db();
        let storage = GazetteerStorage::open(file.path(), 1).unwrap();
        let record = storage.get_full_record(1, "ru").unwrap().unwrap();
        assert_eq!(record.taxon_common_name_loc.as_deref(), Some("липа"));
        assert_eq!(record.taxon_common_name_en.as_deref(), Some("lime"));
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch("PRAGMA user_version = 2;").unwrap();
        drop(conn);
        let err = GazetteerStorage::open(file.path(), 1).unwrap_err();
        assert!(matches!(err, TaxonFinderError::SchemaMismatch { .. }));
    }
}
