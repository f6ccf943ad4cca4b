//! Gazetteer storage plus the phase-1 matcher built on top of it.
//!
//! `storage` is the read-only SQLite layer; [`crate::extractors::gazetteer`]
//! is the `aho-corasick`-backed matcher that consumes it.

pub mod storage;

pub use storage::{GazetteerNameMappings, GazetteerStorage, GazetteerTaxonRecord};
