//! Collapses raw per-extractor candidates into deduplicated [`CandidateGroup`]s.
//!
//! Two-stage algorithm: Stage A resolves character-span overlaps within a
//! single sweep, keeping the best candidate per overlapping cluster; Stage B
//! groups the survivors by lemmatized form, splitting further by gazetteer
//! taxon-id compatibility.

use std::collections::HashMap;

use crate::models::{Candidate, CandidateGroup, Occurrence};

/// Adjacent-but-not-overlapping spans (`[a, b)` followed by `[b, c)`) are two
/// distinct clusters — only a strict character overlap merges two candidates
/// in the same sweep group.
pub fn merge_candidates(
    candidates: Vec<Candidate>,
    skip_resolution_check: impl Fn(&Candidate) -> bool,
) -> Vec<CandidateGroup> {
    let best = select_best_overlaps(candidates);

    let mut grouped: HashMap<String, Vec<GroupBuilder>> = HashMap::new();
    for candidate in best {
        let builders = grouped.entry(candidate.lemmatized.clone()).or_default();
        let mut placed = false;
        for builder in builders.iter_mut() {
            if can_merge(&builder.gazetteer_taxon_ids, &candidate.gazetteer_taxon_ids) {
                builder.add(candidate.clone());
                placed = true;
                break;
            }
        }
        if !placed {
            builders.push(GroupBuilder::from_candidate(candidate));
        }
    }

    let mut groups = Vec::new();
    for builders in grouped.into_values() {
        for builder in builders {
            let skip_resolution = builder.members.iter().any(&skip_resolution_check);
            groups.push(builder.build(skip_resolution));
        }
    }
    groups
}

fn select_best_overlaps(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    if candidates.is_empty() {
        return candidates;
    }
    candidates.sort_by_key(|c| (c.start_char, c.end_char));

    let mut clusters: Vec<Vec<Candidate>> = Vec::new();
    let mut iter = candidates.into_iter();
    let first = iter.next().unwrap();
    let mut current_end = first.end_char;
    let mut current = vec![first];

    for cand in iter {
        if cand.start_char < current_end {
            current_end = current_end.max(cand.end_char);
            current.push(cand);
        } else {
            clusters.push(std::mem::take(&mut current));
            current_end = cand.end_char;
            current.push(cand);
        }
    }
    clusters.push(current);

    clusters.into_iter().map(|cluster| select_best(&cluster)).collect()
}

/// Picks the lex-max candidate, keeping the *first* equal-maximal element on
/// ties — matching Python's `max()`, which the original pipeline relies on
/// (`iter::max_by_key` would instead keep the *last* tie, picking the wrong
/// candidate whenever two extractors produce identical merge keys).
fn select_best(candidates: &[Candidate]) -> Candidate {
    let mut iter = candidates.iter();
    let mut best = iter.next().expect("cluster is never empty");
    for candidate in iter {
        if candidate.merge_key() > best.merge_key() {
            best = candidate;
        }
    }
    best.clone()
}

fn can_merge(ids_a: &[i64], ids_b: &[i64]) -> bool {
    if ids_a.is_empty() || ids_b.is_empty() {
        return true;
    }
    ids_a.iter().any(|id| ids_b.contains(id))
}

fn merge_taxon_ids(ids_a: &[i64], ids_b: &[i64]) -> Vec<i64> {
    if ids_a.is_empty() {
        return ids_b.to_vec();
    }
    if ids_b.is_empty() {
        return ids_a.to_vec();
    }
    let mut merged: Vec<i64> = ids_a.iter().chain(ids_b.iter()).copied().collect();
    merged.sort_unstable();
    merged.dedup();
    merged
}

struct GroupBuilder {
    lemmatized: String,
    normalized: String,
    method: crate::models::ExtractionMethod,
    confidence: f64,
    representative_span_len: usize,
    gazetteer_taxon_ids: Vec<i64>,
    occurrences: Vec<Occurrence>,
    members: Vec<Candidate>,
}

impl GroupBuilder {
    fn from_candidate(candidate: Candidate) -> Self {
        GroupBuilder {
            lemmatized: candidate.lemmatized.clone(),
            normalized: candidate.normalized.clone(),
            method: candidate.method,
            confidence: candidate.confidence,
            representative_span_len: candidate.span_len(),
            gazetteer_taxon_ids: candidate.gazetteer_taxon_ids.clone(),
            occurrences: vec![candidate.to_occurrence()],
            members: vec![candidate],
        }
    }

    fn add(&mut self, candidate: Candidate) {
        self.occurrences.push(candidate.to_occurrence());
        self.gazetteer_taxon_ids = merge_taxon_ids(&self.gazetteer_taxon_ids, &candidate.gazetteer_taxon_ids);

        if is_better_or_tied(&candidate, self) {
            self.normalized = candidate.normalized.clone();
            self.method = candidate.method;
            self.confidence = candidate.confidence;
            self.representative_span_len = candidate.span_len();
        }
        self.members.push(candidate);
    }

    fn build(self, skip_resolution: bool) -> CandidateGroup {
        CandidateGroup {
            normalized: self.normalized,
            lemmatized: self.lemmatized,
            method: self.method,
            confidence: self.confidence,
            occurrences: self.occurrences,
            gazetteer_taxon_ids: self.gazetteer_taxon_ids,
            skip_resolution,
        }
    }
}

/// The original resolves ties by re-running `_select_best([candidate,
/// representative])`, and since Python's `max()` keeps the first
/// equal-maximal element with `candidate` listed first, a tie promotes the
/// incoming candidate as the new representative — hence `>=`, not `>`.
fn is_better_or_tied(candidate: &Candidate, builder: &GroupBuilder) -> bool {
    let candidate_key = (candidate.confidence, candidate.method.priority(), candidate.span_len());
    let current_key = (builder.confidence, builder.method.priority(), builder.representative_span_len);
    candidate_key >= current_key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionMethod;

    fn candidate(start: usize, end: usize, method: ExtractionMethod, confidence: f64, lemma: &str) -> Candidate {
        Candidate {
            source_text: "text".into(),
            source_context: "ctx".into(),
            line_number: 1,
            start_char: start,
            end_char: end,
            normalized: lemma.into(),
            lemmatized: lemma.into(),
            method,
            confidence,
            gazetteer_taxon_ids: vec![],
        }
    }

    #[test]
    fn adjacent_spans_do_not_merge() {
        let candidates = vec![
            candidate(0, 4, ExtractionMethod::Gazetteer, 1.0, "lipa"),
            candidate(4, 8, ExtractionMethod::Gazetteer, 1.0, "dub"),
        ];
        let groups = merge_candidates(candidates, |_| false);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn overlapping_spans_keep_higher_priority_method() {
        let candidates = vec![
            candidate(0, 10, ExtractionMethod::Llm, 0.9, "quercus robur"),
            candidate(2, 8, ExtractionMethod::LatinRegex, 0.9, "quercus robur"),
        ];
        let groups = merge_candidates(candidates, |_| false);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].method, ExtractionMethod::LatinRegex);
    }

    #[test]
    fn same_lemma_different_taxon_ids_stay_separate_groups() {
        let mut a = candidate(0, 4, ExtractionMethod::Gazetteer, 1.0, "lipa");
        a.gazetteer_taxon_ids = vec![10];
        let mut b = candidate(20, 24, ExtractionMethod::Gazetteer, 1.0, "lipa");
        b.gazetteer_taxon_ids = vec![20];
        let groups = merge_candidates(vec![a, b], |_| false);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn tied_overlap_candidates_keep_the_earliest_sorted_one() {
        let mut first = candidate(0, 5, ExtractionMethod::Gazetteer, 0.9, "lipa");
        first.normalized = "first".into();
        let mut second = candidate(1, 6, ExtractionMethod::Gazetteer, 0.9, "lipa");
        second.normalized = "second".into();
        let groups = merge_candidates(vec![first, second], |_| false);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].normalized, "first");
    }

    #[test]
    fn tied_group_member_promotes_the_newest_candidate() {
        let mut first = candidate(0, 4, ExtractionMethod::Gazetteer, 0.9, "lipa");
        first.normalized = "orig".into();
        let mut second = candidate(20, 24, ExtractionMethod::Gazetteer, 0.9, "lipa");
        second.normalized = "incoming".into();
        let groups = merge_candidates(vec![first, second], |_| false);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].normalized, "incoming");
    }

    #[test]
    fn empty_taxon_ids_are_compatible_with_anything() {
        let mut a = candidate(0, 4, ExtractionMethod::Gazetteer, 1.0, "lipa");
        a.gazetteer_taxon_ids = vec![];
        let mut b = candidate(20, 24, ExtractionMethod::Gazetteer, 1.0, "lipa");
        b.gazetteer_taxon_ids = vec![10];
        let groups = merge_candidates(vec![a, b], |_| false);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].gazetteer_taxon_ids, vec![10]);
    }
}
