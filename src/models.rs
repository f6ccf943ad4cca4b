//! Core data model: candidates, groups, matches, and the public result type.

use serde::{Deserialize, Serialize};

/// Which extractor produced a [`Candidate`]. Order here also defines tie-break
/// priority used by the merger: gazetteer > latin_regex > llm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Gazetteer,
    LatinRegex,
    Llm,
}

impl ExtractionMethod {
    /// Higher wins a tie when two candidates at overlapping spans have equal confidence.
    pub fn priority(self) -> u8 {
        match self {
            ExtractionMethod::Gazetteer => 3,
            ExtractionMethod::LatinRegex => 2,
            ExtractionMethod::Llm => 1,
        }
    }
}

/// A single mention found by one extractor. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub source_text: String,
    pub source_context: String,
    pub line_number: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub normalized: String,
    pub lemmatized: String,
    pub method: ExtractionMethod,
    pub confidence: f64,
    pub gazetteer_taxon_ids: Vec<i64>,
}

impl Candidate {
    pub fn span_len(&self) -> usize {
        self.end_char - self.start_char
    }

    /// Sort key used to pick the best of a set of overlapping/merging candidates:
    /// lexicographic max of (confidence, method priority, span length).
    pub fn merge_key(&self) -> (ordered_float::NotNan<f64>, u8, usize) {
        (
            ordered_float::NotNan::new(self.confidence).unwrap_or(ordered_float::NotNan::new(0.0).unwrap()),
            self.method.priority(),
            self.span_len(),
        )
    }

    pub fn to_occurrence(&self) -> Occurrence {
        Occurrence {
            line_number: self.line_number,
            source_text: self.source_text.clone(),
            source_context: self.source_context.clone(),
        }
    }
}

/// A position-only view of a [`Candidate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub line_number: usize,
    pub source_text: String,
    pub source_context: String,
}

/// A set of candidates the merger considers the same mention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateGroup {
    pub normalized: String,
    pub lemmatized: String,
    pub method: ExtractionMethod,
    pub confidence: f64,
    pub occurrences: Vec<Occurrence>,
    pub gazetteer_taxon_ids: Vec<i64>,
    pub skip_resolution: bool,
}

/// Seven nullable rank fields. The wire field for `class` is spelled `class`,
/// not `class_` — Rust's `class` isn't a reserved word so no rename is needed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyInfo {
    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    pub class: Option<String>,
    pub order: Option<String>,
    pub family: Option<String>,
    pub genus: Option<String>,
    pub species: Option<String>,
}

impl TaxonomyInfo {
    pub fn set_rank(&mut self, rank: &str, name: &str) {
        let slot = match rank {
            "kingdom" => &mut self.kingdom,
            "phylum" => &mut self.phylum,
            "class" => &mut self.class,
            "order" => &mut self.order,
            "family" => &mut self.family,
            "genus" => &mut self.genus,
            "species" => &mut self.species,
            _ => return,
        };
        *slot = Some(name.to_string());
    }
}

/// A candidate identification, from the external searcher or synthesized from
/// the gazetteer's skip-resolution path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonMatch {
    pub taxon_id: i64,
    pub taxon_name: String,
    pub taxon_rank: String,
    pub taxonomy: TaxonomyInfo,
    pub taxon_common_name_en: Option<String>,
    pub taxon_common_name_loc: Option<String>,
    pub taxon_matched_name: String,
    pub taxon_url: String,
    pub score: f64,
    pub taxon_names: Vec<String>,
}

/// Ordered, deduplicated alternative names suggested by the LLM enricher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmEnrichmentResponse {
    pub common_names_loc: Vec<String>,
    pub common_names_en: Vec<String>,
    pub latin_names: Vec<String>,
}

/// Internal resolver output: a group plus its resolved matches and identification verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedCandidate {
    pub group: CandidateGroup,
    pub matches: Vec<TaxonMatch>,
    pub identified: bool,
    pub llm_response: Option<LlmEnrichmentResponse>,
    pub candidate_names: Vec<String>,
    pub reason: String,
}

/// The public per-mention output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonResult {
    pub source_text: String,
    pub identified: bool,
    pub extraction_confidence: f64,
    pub extraction_method: ExtractionMethod,
    pub occurrences: Vec<Occurrence>,
    pub matches: Vec<TaxonMatch>,
    pub llm_response: Option<LlmEnrichmentResponse>,
    pub candidate_names: Vec<String>,
    pub reason: String,
}

impl TaxonResult {
    pub fn count(&self) -> usize {
        self.occurrences.len()
    }

    pub fn from_resolved(rc: ResolvedCandidate) -> Self {
        let source_text = rc
            .group
            .occurrences
            .first()
            .map(|occ| occ.source_text.clone())
            .unwrap_or_else(|| rc.group.normalized.clone());
        let mut matches = rc.matches;
        matches.truncate(5);
        TaxonResult {
            source_text,
            identified: rc.identified,
            extraction_confidence: rc.group.confidence,
            extraction_method: rc.group.method,
            occurrences: rc.group.occurrences,
            matches,
            llm_response: rc.llm_response,
            candidate_names: rc.candidate_names,
            reason: rc.reason,
        }
    }
}

/// Minimal `NotNan` shim so candidate scoring can be sorted without pulling
/// in a crate just for float ordering of a handful of comparisons.
pub mod ordered_float {
    #[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
    pub struct NotNan<T>(T);

    impl NotNan<f64> {
        pub fn new(value: f64) -> Option<Self> {
            if value.is_nan() {
                None
            } else {
                Some(NotNan(value))
            }
        }
    }

    impl Eq for NotNan<f64> {}
    #[allow(clippy::derive_ord_xor_partial_ord)]
    impl Ord for NotNan<f64> {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
        }
    }
}
