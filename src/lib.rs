//! TaxonFinder: identifies biological taxon mentions in free-form text
//! (primarily Russian) against a local gazetteer, with optional LLM-assisted
//! extraction/enrichment and iNaturalist-backed identification.

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod events;
pub mod extractors;
pub mod formatter;
pub mod gazetteer;
pub mod llm;
pub mod loaders;
pub mod logging;
pub mod merge;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod rate_limiter;
pub mod resolvers;

pub use config::Config;
pub use error::{Result, TaxonFinderError};
pub use events::PipelineEvent;
pub use models::TaxonResult;
pub use orchestrator::{estimate, process, process_all, PipelineDeps};
