//! Progress/result events streamed out of the orchestrator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::TaxonResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseStarted {
    pub phase: String,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub phase: String,
    pub current: usize,
    pub total: usize,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultReady {
    pub result: TaxonResult,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub total_candidates: usize,
    pub unique_candidates: usize,
    pub identified_count: usize,
    pub unidentified_count: usize,
    pub skipped_resolution: usize,
    pub api_calls: usize,
    pub cache_hits: usize,
    pub phase_times: HashMap<String, f64>,
    pub total_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEstimate {
    pub sentences: usize,
    pub chunks: usize,
    pub llm_calls_phase1: usize,
    pub gazetteer_candidates: usize,
    pub regex_candidates: usize,
    pub unique_candidates: usize,
    pub api_calls_estimated: usize,
    pub estimated_time_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFinished {
    pub summary: PipelineSummary,
}

/// One event in the stream an orchestrator run emits over its
/// `mpsc::Receiver`. Mirrors the Python implementation's event union,
/// realized as an enum since Rust has no runtime union-of-dataclasses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PipelineEvent {
    PhaseStarted(PhaseStarted),
    PhaseProgress(PhaseProgress),
    ResultReady(ResultReady),
    PipelineFinished(PipelineFinished),
}
