use std::collections::HashSet;

use crate::models::{CandidateGroup, TaxonMatch};
use crate::normalizer::normalize;

use super::IdentificationResolver;

/// Matches a group's normalized/lemmatized form against every name a
/// candidate match is known by (matched name, scientific name, common names,
/// alternate names) — no fuzzy matching, exact normalized-string equality.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultIdentificationResolver;

impl IdentificationResolver for DefaultIdentificationResolver {
    fn resolve(&self, group: &CandidateGroup, matches: &[TaxonMatch]) -> (bool, String) {
        if matches.is_empty() {
            return (false, "No matches in iNaturalist".to_string());
        }

        for m in matches {
            if match_name(&group.normalized, &group.lemmatized, m) {
                return (true, String::new());
            }
        }

        if matches.len() > 1 {
            (false, "Multiple candidate taxa found".to_string())
        } else {
            (false, "Common name not matched".to_string())
        }
    }
}

fn match_name(normalized: &str, lemmatized: &str, m: &TaxonMatch) -> bool {
    let candidates = match_candidates(m);
    candidates.contains(normalized) || candidates.contains(lemmatized)
}

fn match_candidates(m: &TaxonMatch) -> HashSet<String> {
    let mut values = vec![
        m.taxon_matched_name.as_str(),
        m.taxon_name.as_str(),
        m.taxon_common_name_en.as_deref().unwrap_or(""),
        m.taxon_common_name_loc.as_deref().unwrap_or(""),
    ];
    for name in &m.taxon_names {
        values.push(name.as_str());
    }
    values.into_iter().filter(|v| !v.is_empty()).map(normalize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaxonomyInfo;

    fn group(normalized: &str, lemmatized: &str) -> CandidateGroup {
        CandidateGroup {
            normalized: normalized.into(),
            lemmatized: lemmatized.into(),
            method: crate::models::ExtractionMethod::Gazetteer,
            confidence: 1.0,
            occurrences: vec![],
            gazetteer_taxon_ids: vec![],
            skip_resolution: false,
        }
    }

    fn taxon_match(matched_name: &str) -> TaxonMatch {
        TaxonMatch {
            taxon_id: 1,
            taxon_name: "Tilia cordata".into(),
            taxon_rank: "species".into(),
            taxonomy: TaxonomyInfo::default(),
            taxon_common_name_en: Some("lime".into()),
            taxon_common_name_loc: None,
            taxon_matched_name: matched_name.into(),
            taxon_url: "https://www.inaturalist.org/taxa/1".into(),
            score: 0.9,
            taxon_names: vec![],
        }
    }

    #[test]
    fn no_matches_is_not_matched() {
        let resolver = DefaultIdentificationResolver;
        let (identified, reason) = resolver.resolve(&group("липа", "липа"), &[]);
        assert!(!identified);
        assert_eq!(reason, "No matches in iNaturalist");
    }

    #[test]
    fn exact_match_is_identified() {
        let resolver = DefaultIdentificationResolver;
        let (identified, reason) = resolver.resolve(&group("lime", "lime"), &[taxon_match("lime")]);
        assert!(identified);
        assert!(reason.is_empty());
    }

    #[test]
    fn multiple_non_matching_candidates_reports_multiple() {
        let resolver = DefaultIdentificationResolver;
        let matches = vec![taxon_match("oak"), taxon_match("birch")];
        let (identified, reason) = resolver.resolve(&group("липа", "липа"), &matches);
        assert!(!identified);
        assert_eq!(reason, "Multiple candidate taxa found");
    }

    #[test]
    fn single_non_matching_candidate_reports_common_name_not_matched() {
        let resolver = DefaultIdentificationResolver;
        let (identified, reason) = resolver.resolve(&group("липа", "липа"), &[taxon_match("oak")]);
        assert!(!identified);
        assert_eq!(reason, "Common name not matched");
    }
}
