//! Identification resolution: external taxon search plus the verdict logic
//! that turns a set of candidate matches into identified/not-identified.

pub mod identifier;
pub mod inaturalist;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CandidateGroup, TaxonMatch};

/// Looks up taxon candidates for a search term. The only production
/// implementation is [`inaturalist::INaturalistSearcher`]; the trait seam
/// exists so the orchestrator and its tests can inject a fake.
#[async_trait]
pub trait TaxonSearcher: Send + Sync {
    async fn search(&self, query: &str, locale: &str) -> Result<Vec<TaxonMatch>>;

    /// Cache hits accumulated across this searcher's lifetime, surfaced in
    /// [`crate::events::PipelineSummary::cache_hits`]. Fakes used in tests
    /// don't carry a cache, so the default is always zero.
    fn cache_hits(&self) -> usize {
        0
    }
}

/// Decides whether a group's normalized/lemmatized form matches one of its
/// candidate taxon matches closely enough to call it identified.
pub trait IdentificationResolver: Send + Sync {
    fn resolve(&self, group: &CandidateGroup, matches: &[TaxonMatch]) -> (bool, String);
}

/// Merges two match lists, deduplicating by `taxon_id`, sorting by score
/// descending, and truncating to the top 5 — the same cap applied when a
/// [`TaxonResult`](crate::models::TaxonResult) is assembled.
pub fn merge_matches(existing: Vec<TaxonMatch>, extra: Vec<TaxonMatch>) -> Vec<TaxonMatch> {
    let mut seen = std::collections::HashSet::new();
    let mut combined = Vec::new();
    for m in existing.into_iter().chain(extra) {
        if seen.insert(m.taxon_id) {
            combined.push(m);
        }
    }
    combined.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    combined.truncate(5);
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaxonomyInfo;

    fn taxon_match(id: i64, score: f64) -> TaxonMatch {
        TaxonMatch {
            taxon_id: id,
            taxon_name: format!("taxon{id}"),
            taxon_rank: "species".into(),
            taxonomy: TaxonomyInfo::default(),
            taxon_common_name_en: None,
            taxon_common_name_loc: None,
            taxon_matched_name: String::new(),
            taxon_url: String::new(),
            score,
            taxon_names: vec![],
        }
    }

    #[test]
    fn merge_matches_dedupes_by_taxon_id_and_sorts_by_score() {
        let existing = vec![taxon_match(1, 0.5), taxon_match(2, 0.9)];
        let extra = vec![taxon_match(1, 0.8), taxon_match(3, 0.7)];
        let merged = merge_matches(existing, extra);
        let ids: Vec<i64> = merged.iter().map(|m| m.taxon_id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn merge_matches_truncates_to_five() {
        let existing: Vec<TaxonMatch> = (0..10).map(|i| taxon_match(i, i as f64)).collect();
        let merged = merge_matches(existing, vec![]);
        assert_eq!(merged.len(), 5);
    }
}
