//! Phase 1-5 pipeline orchestrator.
//!
//! Thin orchestrator: business logic lives in `extractors`, `merge`, and
//! `resolvers`. This module only calls them in the right order and streams
//! [`PipelineEvent`]s out over an `mpsc` channel.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cache::{DiskCache, DiskCacheConfig};
use crate::checkpoint::FileCheckpoint;
use crate::config::{Config, LlmEnricherConfig, LlmExtractorConfig};
use crate::error::{Result, TaxonFinderError};
use crate::events::{
    PhaseProgress, PhaseStarted, PipelineEstimate, PipelineEvent, PipelineFinished, PipelineSummary, ResultReady,
};
use crate::extractors::gazetteer::GazetteerExtractor;
use crate::extractors::latin::LatinRegexExtractor;
use crate::extractors::llm::{chunk_text, LlmExtractorConfig as ExtractorRuntimeConfig, LlmExtractorPhase};
use crate::extractors::split_sentences;
use crate::gazetteer::storage::GazetteerStorage;
use crate::llm::anthropic::AnthropicClient;
use crate::llm::enricher::{LlmEnricherConfig as EnricherRuntimeConfig, LlmEnricherPhase};
use crate::llm::ollama::OllamaClient;
use crate::llm::openai::OpenAiClient;
use crate::llm::LlmClient;
use crate::merge::merge_candidates;
use crate::models::{Candidate, CandidateGroup, ExtractionMethod, ResolvedCandidate, TaxonMatch, TaxonResult, TaxonomyInfo};
use crate::normalizer::{normalize, search_variants, IdentityAnalyzer, MorphAnalyzer};
use crate::rate_limiter::TokenBucketRateLimiter;
use crate::resolvers::identifier::DefaultIdentificationResolver;
use crate::resolvers::inaturalist::INaturalistSearcher;
use crate::resolvers::{merge_matches, IdentificationResolver, TaxonSearcher};

/// Dependency overrides accepted for testability; `None` fields are built
/// from `config` with production defaults, mirroring the keyword arguments
/// the original pipeline's `process()` accepts.
#[derive(Default)]
pub struct PipelineDeps {
    pub searcher: Option<Box<dyn TaxonSearcher>>,
    pub identifier: Option<Box<dyn IdentificationResolver>>,
    pub llm_client: Option<Arc<dyn LlmClient>>,
    pub rate_limiter: Option<Arc<TokenBucketRateLimiter>>,
    pub checkpoint_dir: Option<PathBuf>,
    pub morph: Option<Box<dyn MorphAnalyzer>>,
}

/// Runs whatever cleanup callbacks were registered while building
/// dependencies (currently: stopping an auto-started `ollama serve`),
/// in reverse registration order, on drop — including on early return or panic.
struct CleanupGuard {
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

impl CleanupGuard {
    fn new() -> Self {
        CleanupGuard { callbacks: Vec::new() }
    }

    fn push(&mut self, cb: impl FnOnce() + Send + 'static) {
        self.callbacks.push(Box::new(cb));
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for cb in self.callbacks.drain(..).rev() {
            cb();
        }
    }
}

/// Spawns the pipeline as a background task and returns the event stream
/// immediately; the task runs to completion (or first unrecoverable error)
/// independently of whether the receiver is polled.
pub fn process(text: String, config: Config, deps: PipelineDeps) -> mpsc::Receiver<PipelineEvent> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        if let Err(e) = run(text, config, deps, tx).await {
            error!(error = %e, "pipeline_failed");
        }
    });
    rx
}

/// Convenience wrapper: drains the event stream and returns only the results.
pub async fn process_all(text: String, config: Config, deps: PipelineDeps) -> Vec<TaxonResult> {
    let mut rx = process(text, config, deps);
    let mut results = Vec::new();
    while let Some(event) = rx.recv().await {
        if let PipelineEvent::ResultReady(r) = event {
            results.push(r.result);
        }
    }
    results
}

async fn run(text: String, config: Config, deps: PipelineDeps, tx: mpsc::Sender<PipelineEvent>) -> Result<()> {
    let start_total = Instant::now();
    let mut cleanup = CleanupGuard::new();

    let morph: Box<dyn MorphAnalyzer> = deps.morph.unwrap_or_else(|| Box::new(IdentityAnalyzer));
    let sentences = split_sentences(&text);

    let searcher: Box<dyn TaxonSearcher> = match deps.searcher {
        Some(s) => s,
        None => {
            let rate_limiter = deps
                .rate_limiter
                .unwrap_or_else(|| Arc::new(TokenBucketRateLimiter::new(config.inaturalist.rate_limit, config.inaturalist.burst_limit)));
            let cache = if config.inaturalist.cache_enabled {
                Some(DiskCache::open(DiskCacheConfig {
                    path: PathBuf::from(&config.inaturalist.cache_path),
                    ttl_days: config.inaturalist.cache_ttl_days,
                    schema_version: 1,
                })?)
            } else {
                None
            };
            Box::new(INaturalistSearcher::new(
                reqwest::Client::new(),
                config.inaturalist.clone(),
                config.user_agent.clone(),
                Some(rate_limiter),
                cache,
            ))
        }
    };

    let identifier: Box<dyn IdentificationResolver> = deps.identifier.unwrap_or_else(|| Box::new(DefaultIdentificationResolver));

    let gazetteer_path = PathBuf::from(&config.gazetteer_path);
    let storage = if gazetteer_path.exists() {
        match GazetteerStorage::open(&gazetteer_path, 1) {
            Ok(s) => Some(s),
            Err(e) => {
                if !config.degraded_mode {
                    return Err(e);
                }
                warn!(error = %e, "gazetteer_unavailable");
                None
            }
        }
    } else if !config.degraded_mode {
        return Err(TaxonFinderError::MissingGazetteer(gazetteer_path));
    } else {
        warn!(path = %gazetteer_path.display(), "gazetteer_not_found");
        None
    };

    let checkpoint = match &deps.checkpoint_dir {
        Some(dir) => {
            let cp = FileCheckpoint::new(dir.clone())?;
            let key = cp.key(&text, &config)?;
            Some((cp, key))
        }
        None => None,
    };

    // ------------------------------------------------------------------
    // Phase 1: Extraction
    // ------------------------------------------------------------------
    let t0 = Instant::now();
    let mut all_candidates: Vec<Candidate> = Vec::new();

    if let Some(storage) = &storage {
        let gaz_ext = GazetteerExtractor::new(storage, &config.locale)?;
        let gaz_candidates = gaz_ext.extract(&text, &sentences, morph.as_ref());
        info!(count = gaz_candidates.len(), "extraction_gazetteer");
        all_candidates.extend(gaz_candidates);
    }

    let known_latin: HashSet<String> = storage.as_ref().map(|s| s.all_latin_names()).transpose()?.unwrap_or_default();
    let latin_ext = LatinRegexExtractor::new().with_known_name_check(|name: &str| known_latin.contains(name));
    let latin_candidates = latin_ext.extract(&text, &sentences, morph.as_ref());
    info!(count = latin_candidates.len(), "extraction_latin");
    all_candidates.extend(latin_candidates);

    if let Some(ext_cfg) = config.llm_extractor.as_ref().filter(|c| c.enabled) {
        let client = match &deps.llm_client {
            Some(c) => c.clone(),
            None => build_llm_client(&ProviderSpec::from_extractor(ext_cfg), &config.user_agent, &mut cleanup).await?,
        };

        let sentence_texts: Vec<String> = sentences.iter().map(|s| s.text.clone()).collect();
        let chunks = chunk_text(&text, &ext_cfg.chunk_strategy, ext_cfg.min_chunk_words, ext_cfg.max_chunk_words, Some(&sentence_texts))?;
        let total_chunks = chunks.len();
        tx.send(PipelineEvent::PhaseStarted(PhaseStarted { phase: "extraction".into(), total: total_chunks })).await.ok();

        let runtime_cfg = ExtractorRuntimeConfig {
            prompt_template: read_prompt_file(&ext_cfg.prompt_file)?,
            chunk_strategy: ext_cfg.chunk_strategy.clone(),
            min_chunk_words: ext_cfg.min_chunk_words,
            max_chunk_words: ext_cfg.max_chunk_words,
        };
        let llm_extractor = LlmExtractorPhase::new(runtime_cfg, &config.locale, client.as_ref());
        let llm_candidates = llm_extractor.extract(&text, &sentence_texts).await?;
        info!(count = llm_candidates.len(), "extraction_llm");
        all_candidates.extend(llm_candidates);

        for i in 0..total_chunks {
            tx.send(PipelineEvent::PhaseProgress(PhaseProgress {
                phase: "extraction".into(),
                current: i + 1,
                total: total_chunks,
                detail: format!("LLM chunk {}/{total_chunks}", i + 1),
            }))
            .await
            .ok();
        }
    } else {
        tx.send(PipelineEvent::PhaseStarted(PhaseStarted { phase: "extraction".into(), total: 0 })).await.ok();
    }

    let total_candidates = all_candidates.len();
    let extraction_time = t0.elapsed().as_secs_f64();

    // ------------------------------------------------------------------
    // Phase 2: Merge & Dedup
    // ------------------------------------------------------------------
    let t0 = Instant::now();
    tx.send(PipelineEvent::PhaseStarted(PhaseStarted { phase: "merge".into(), total: total_candidates })).await.ok();

    let locale = config.locale.clone();
    let skip_check = |c: &Candidate| -> bool {
        if c.method != ExtractionMethod::Gazetteer || c.gazetteer_taxon_ids.is_empty() {
            return false;
        }
        let Some(storage) = &storage else { return false };
        c.gazetteer_taxon_ids.iter().all(|&tid| match storage.get_full_record(tid, &locale) {
            Ok(Some(rec)) => !rec.taxon_name.is_empty() && !rec.taxon_rank.is_empty(),
            _ => false,
        })
    };
    let groups = merge_candidates(all_candidates, skip_check);
    let groups_len = groups.len();
    info!(groups = groups_len, "merge_complete");
    tx.send(PipelineEvent::PhaseProgress(PhaseProgress {
        phase: "merge".into(),
        current: total_candidates,
        total: total_candidates,
        detail: format!("{groups_len} unique candidates"),
    }))
    .await
    .ok();
    let merge_time = t0.elapsed().as_secs_f64();

    // ------------------------------------------------------------------
    // Phase 3: Resolution
    // ------------------------------------------------------------------
    let t0 = Instant::now();
    let (to_skip, to_resolve): (Vec<CandidateGroup>, Vec<CandidateGroup>) = groups.into_iter().partition(|g| g.skip_resolution);
    let skipped_resolution = to_skip.len();
    let to_resolve_len = to_resolve.len();
    tx.send(PipelineEvent::PhaseStarted(PhaseStarted { phase: "resolution".into(), total: to_resolve_len })).await.ok();

    let mut resolved: Vec<ResolvedCandidate> = Vec::with_capacity(skipped_resolution + to_resolve_len);
    let mut api_calls = 0usize;

    for group in to_skip {
        let matches = matches_from_gazetteer(&group, storage.as_ref(), &config.locale);
        let (identified, reason) = identifier.resolve(&group, &matches);
        resolved.push(ResolvedCandidate { group, matches, identified, llm_response: None, candidate_names: vec![], reason });
    }

    for (idx, group) in to_resolve.into_iter().enumerate() {
        let variants = search_variants(&group.normalized, morph.as_ref());
        let mut matches: Vec<TaxonMatch> = Vec::new();
        let mut identified = false;
        let mut reason = "No matches in iNaturalist".to_string();

        for var in &variants {
            let new_matches = searcher.search(var, &config.locale).await.unwrap_or_else(|e| {
                warn!(error = %e, "taxon_search_failed");
                Vec::new()
            });
            api_calls += 1;
            matches = merge_matches(matches, new_matches);
            let (id, r) = identifier.resolve(&group, &matches);
            identified = id;
            reason = r;
            if identified {
                break;
            }
        }

        let detail_name = group.normalized.clone();
        let candidate_names = if identified { Vec::new() } else { variants };
        resolved.push(ResolvedCandidate { group, matches, identified, llm_response: None, candidate_names, reason });

        tx.send(PipelineEvent::PhaseProgress(PhaseProgress {
            phase: "resolution".into(),
            current: idx + 1,
            total: to_resolve_len,
            detail: format!("iNaturalist: {detail_name}"),
        }))
        .await
        .ok();
    }
    let resolution_time = t0.elapsed().as_secs_f64();

    // ------------------------------------------------------------------
    // Phase 4: LLM Enrichment
    // ------------------------------------------------------------------
    let t0 = Instant::now();
    let unresolved_indices: Vec<usize> = resolved.iter().enumerate().filter(|(_, r)| !r.identified).map(|(i, _)| i).collect();
    let enricher_enabled = config.llm_enricher.as_ref().map(|c| c.enabled).unwrap_or(false) && !unresolved_indices.is_empty();

    if enricher_enabled {
        let enr_cfg = config.llm_enricher.as_ref().expect("checked by enricher_enabled");
        let client = match &deps.llm_client {
            Some(c) => c.clone(),
            None => build_llm_client(&ProviderSpec::from_enricher(enr_cfg), &config.user_agent, &mut cleanup).await?,
        };
        let runtime_cfg = EnricherRuntimeConfig { prompt_template: read_prompt_file(&enr_cfg.prompt_file)? };
        let enricher = LlmEnricherPhase::new(runtime_cfg, &config.locale, client.as_ref());

        tx.send(PipelineEvent::PhaseStarted(PhaseStarted { phase: "enrichment".into(), total: unresolved_indices.len() })).await.ok();

        for (progress_idx, &ri) in unresolved_indices.iter().enumerate() {
            let group = resolved[ri].group.clone();
            let prior_matches = resolved[ri].matches.clone();
            let prior_candidate_names = resolved[ri].candidate_names.clone();

            let llm_resp = enricher.enrich(&text, &group, &sentences).await;
            let mut alt_names: Vec<String> = Vec::new();
            alt_names.extend(llm_resp.common_names_loc.iter().cloned());
            alt_names.extend(llm_resp.common_names_en.iter().cloned());
            alt_names.extend(llm_resp.latin_names.iter().cloned());

            let mut tried_names = prior_candidate_names;
            let mut extra_matches: Vec<TaxonMatch> = Vec::new();
            for alt in &alt_names {
                let norm_alt = normalize(alt);
                if !tried_names.contains(&norm_alt) {
                    tried_names.push(norm_alt.clone());
                    let new_matches = searcher.search(&norm_alt, &config.locale).await.unwrap_or_else(|e| {
                        warn!(error = %e, "taxon_search_failed");
                        Vec::new()
                    });
                    api_calls += 1;
                    extra_matches.extend(new_matches);
                }
            }

            let combined = merge_matches(prior_matches, extra_matches);
            let (identified, reason) = identifier.resolve(&group, &combined);
            let (reason, candidate_names) = if identified { (String::new(), Vec::new()) } else { (reason, tried_names) };

            let detail_name = group.normalized.clone();
            resolved[ri] = ResolvedCandidate {
                group,
                matches: combined,
                identified,
                llm_response: Some(llm_resp),
                candidate_names,
                reason,
            };

            tx.send(PipelineEvent::PhaseProgress(PhaseProgress {
                phase: "enrichment".into(),
                current: progress_idx + 1,
                total: unresolved_indices.len(),
                detail: format!("LLM enrichment: {detail_name}"),
            }))
            .await
            .ok();
        }
    } else {
        tx.send(PipelineEvent::PhaseStarted(PhaseStarted { phase: "enrichment".into(), total: 0 })).await.ok();
    }
    let enrichment_time = t0.elapsed().as_secs_f64();

    // ------------------------------------------------------------------
    // Phase 5: Assembly
    // ------------------------------------------------------------------
    let t0 = Instant::now();
    tx.send(PipelineEvent::PhaseStarted(PhaseStarted { phase: "assembly".into(), total: resolved.len() })).await.ok();

    let filtered: Vec<ResolvedCandidate> = resolved.into_iter().filter(|r| r.group.confidence >= config.confidence).collect();
    let filtered_len = filtered.len();
    let mut identified_count = 0usize;
    let mut unidentified_count = 0usize;

    for (idx, rc) in filtered.into_iter().enumerate() {
        let result = TaxonResult::from_resolved(rc);
        if result.identified {
            identified_count += 1;
        } else {
            unidentified_count += 1;
        }
        let source_text = result.source_text.clone();
        tx.send(PipelineEvent::ResultReady(ResultReady { result })).await.ok();
        tx.send(PipelineEvent::PhaseProgress(PhaseProgress {
            phase: "assembly".into(),
            current: idx + 1,
            total: filtered_len,
            detail: format!("Assembled: {source_text}"),
        }))
        .await
        .ok();
    }
    let assembly_time = t0.elapsed().as_secs_f64();

    // ------------------------------------------------------------------
    // Finish
    // ------------------------------------------------------------------
    let mut phase_times = HashMap::new();
    phase_times.insert("extraction".to_string(), extraction_time);
    phase_times.insert("merge".to_string(), merge_time);
    phase_times.insert("resolution".to_string(), resolution_time);
    phase_times.insert("enrichment".to_string(), enrichment_time);
    phase_times.insert("assembly".to_string(), assembly_time);

    let summary = PipelineSummary {
        total_candidates,
        unique_candidates: groups_len,
        identified_count,
        unidentified_count,
        skipped_resolution,
        api_calls,
        cache_hits: searcher.cache_hits(),
        phase_times,
        total_time: start_total.elapsed().as_secs_f64(),
    };
    tx.send(PipelineEvent::PipelineFinished(PipelineFinished { summary })).await.ok();

    if let Some((cp, key)) = &checkpoint {
        cp.clear(key)?;
    }

    Ok(())
}

/// Dry-run estimate: same extractors, no network calls.
pub fn estimate(text: &str, config: &Config) -> Result<PipelineEstimate> {
    let sentences = split_sentences(text);
    let sentence_texts: Vec<String> = sentences.iter().map(|s| s.text.clone()).collect();

    let (n_chunks, llm_calls) = match config.llm_extractor.as_ref().filter(|c| c.enabled) {
        Some(cfg) => {
            let chunks = chunk_text(text, &cfg.chunk_strategy, cfg.min_chunk_words, cfg.max_chunk_words, Some(&sentence_texts))?;
            (chunks.len(), chunks.len())
        }
        None => (0, 0),
    };

    let gazetteer_path = PathBuf::from(&config.gazetteer_path);
    let storage = if gazetteer_path.exists() { GazetteerStorage::open(&gazetteer_path, 1).ok() } else { None };

    let morph = IdentityAnalyzer;
    let gaz_count = match &storage {
        Some(s) => GazetteerExtractor::new(s, &config.locale)?.extract(text, &sentences, &morph).len(),
        None => 0,
    };

    let regex_count = LatinRegexExtractor::new().extract(text, &sentences, &morph).len();

    let unique_est = (gaz_count + regex_count).max(1);
    let api_calls_est = unique_est.saturating_sub(gaz_count);
    let estimated_time = api_calls_est as f64 + llm_calls as f64 * 2.0;

    Ok(PipelineEstimate {
        sentences: sentences.len(),
        chunks: n_chunks,
        llm_calls_phase1: llm_calls,
        gazetteer_candidates: gaz_count,
        regex_candidates: regex_count,
        unique_candidates: unique_est,
        api_calls_estimated: api_calls_est,
        estimated_time_seconds: estimated_time,
    })
}

fn matches_from_gazetteer(group: &CandidateGroup, storage: Option<&GazetteerStorage>, locale: &str) -> Vec<TaxonMatch> {
    let Some(storage) = storage else { return Vec::new() };
    let mut matches = Vec::new();
    let mut seen = HashSet::new();
    for (i, &tid) in group.gazetteer_taxon_ids.iter().enumerate() {
        if !seen.insert(tid) {
            continue;
        }
        let Ok(Some(rec)) = storage.get_full_record(tid, locale) else { continue };
        let mut taxonomy = TaxonomyInfo::default();
        taxonomy.set_rank(&rec.taxon_rank, &rec.taxon_name);
        matches.push(TaxonMatch {
            taxon_id: rec.taxon_id,
            taxon_name: rec.taxon_name.clone(),
            taxon_rank: rec.taxon_rank.clone(),
            taxonomy,
            taxon_common_name_en: rec.taxon_common_name_en,
            taxon_common_name_loc: rec.taxon_common_name_loc,
            taxon_matched_name: group.normalized.clone(),
            taxon_url: format!("https://www.inaturalist.org/taxa/{}", rec.taxon_id),
            score: if i == 0 { 1.0 } else { 0.5 },
            taxon_names: Vec::new(),
        });
    }
    matches
}

fn read_prompt_file(path: &str) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| TaxonFinderError::ConfigError(format!("reading prompt file {path}: {e}")))
}

struct ProviderSpec {
    provider: String,
    model: String,
    url: Option<String>,
    timeout: f64,
    auto_start: bool,
    auto_pull_model: bool,
    stop_after_run: bool,
}

impl ProviderSpec {
    fn from_extractor(cfg: &LlmExtractorConfig) -> Self {
        ProviderSpec {
            provider: cfg.provider.clone(),
            model: cfg.model.clone(),
            url: cfg.url.clone(),
            timeout: cfg.timeout,
            auto_start: cfg.auto_start,
            auto_pull_model: cfg.auto_pull_model,
            stop_after_run: cfg.stop_after_run,
        }
    }

    fn from_enricher(cfg: &LlmEnricherConfig) -> Self {
        ProviderSpec {
            provider: cfg.provider.clone(),
            model: cfg.model.clone(),
            url: cfg.url.clone(),
            timeout: cfg.timeout,
            auto_start: cfg.auto_start,
            auto_pull_model: cfg.auto_pull_model,
            stop_after_run: cfg.stop_after_run,
        }
    }
}

async fn build_llm_client(spec: &ProviderSpec, user_agent: &str, cleanup: &mut CleanupGuard) -> Result<Arc<dyn LlmClient>> {
    match spec.provider.as_str() {
        "ollama" => {
            let base_url = spec.url.clone().unwrap_or_else(|| "http://localhost:11434".to_string());
            let http = reqwest::Client::new();
            prepare_ollama(&http, &base_url, &spec.model, spec.auto_start, spec.auto_pull_model, spec.stop_after_run, spec.timeout, cleanup)
                .await?;
            Ok(Arc::new(OllamaClient::new(base_url, spec.model.clone(), spec.timeout, user_agent)))
        }
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
            let base_url = spec.url.clone().unwrap_or_else(|| "https://api.openai.com".to_string());
            Ok(Arc::new(OpenAiClient::new(base_url, spec.model.clone(), spec.timeout, api_key, user_agent)))
        }
        "anthropic" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
            let base_url = spec.url.clone().unwrap_or_else(|| "https://api.anthropic.com".to_string());
            Ok(Arc::new(AnthropicClient::new(base_url, spec.model.clone(), spec.timeout, api_key, user_agent)))
        }
        other => Err(TaxonFinderError::ConfigError(format!("unknown LLM provider: {other}"))),
    }
}

async fn ollama_reachable(http: &reqwest::Client, base_url: &str) -> bool {
    http.get(format!("{}/api/tags", base_url.trim_end_matches('/')))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map(|r| r.status().as_u16() < 500)
        .unwrap_or(false)
}

async fn ollama_model_available(http: &reqwest::Client, base_url: &str, model: &str) -> bool {
    let Ok(resp) = http.get(format!("{}/api/tags", base_url.trim_end_matches('/'))).timeout(Duration::from_secs(5)).send().await else {
        return false;
    };
    let Ok(data) = resp.json::<Value>().await else { return false };
    data.get("models")
        .and_then(Value::as_array)
        .map(|models| models.iter().any(|m| m.get("name").and_then(Value::as_str) == Some(model)))
        .unwrap_or(false)
}

/// Ensures the configured ollama instance is reachable (auto-starting `ollama
/// serve` if asked) and that the model is present (auto-pulling if asked).
/// Registers a cleanup callback to stop the server iff we started it and
/// `stop_after_run` is set, matching the original's subprocess lifecycle.
#[allow(clippy::too_many_arguments)]
async fn prepare_ollama(
    http: &reqwest::Client,
    base_url: &str,
    model: &str,
    auto_start: bool,
    auto_pull: bool,
    stop_after: bool,
    timeout: f64,
    cleanup: &mut CleanupGuard,
) -> Result<()> {
    if !ollama_reachable(http, base_url).await && auto_start {
        info!(base_url, "ollama_auto_start");
        let mut child = tokio::process::Command::new("ollama")
            .arg("serve")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| TaxonFinderError::LlmError(format!("failed to spawn ollama serve: {e}")))?;

        let deadline = Instant::now() + Duration::from_secs_f64(timeout.max(5.0));
        let mut started = false;
        while Instant::now() < deadline {
            if ollama_reachable(http, base_url).await {
                started = true;
                info!(base_url, "ollama_started");
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        if !started {
            let _ = child.start_kill();
            return Err(TaxonFinderError::LlmError(format!("failed to start ollama serve at {base_url}")));
        }
        if stop_after {
            cleanup.push(move || {
                let _ = child.start_kill();
            });
        }
    }

    if !ollama_reachable(http, base_url).await {
        return Err(TaxonFinderError::LlmError(format!(
            "ollama is not reachable at {base_url}. Start 'ollama serve' or set auto_start=true in config"
        )));
    }

    if auto_pull && !ollama_model_available(http, base_url, model).await {
        info!(model, "ollama_pull_model");
        let status = tokio::process::Command::new("ollama")
            .arg("pull")
            .arg(model)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|e| TaxonFinderError::LlmError(format!("ollama CLI not found: {e}")))?;
        if !status.success() {
            return Err(TaxonFinderError::LlmError(format!("ollama pull failed for model {model}")));
        }
        if !ollama_model_available(http, base_url, model).await {
            return Err(TaxonFinderError::LlmError(format!("model {model} is still unavailable after pull")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InaturalistConfig;
    use async_trait::async_trait;

    fn degraded_config() -> Config {
        Config {
            confidence: 0.0,
            locale: "ru".into(),
            gazetteer_path: "does/not/exist.db".into(),
            max_file_size_mb: 2.0,
            degraded_mode: true,
            user_agent: "TaxonFinder/test".into(),
            inaturalist: InaturalistConfig { cache_enabled: false, ..InaturalistConfig::default() },
            llm_extractor: None,
            llm_enricher: None,
        }
    }

    struct FakeSearcher;

    #[async_trait]
    impl TaxonSearcher for FakeSearcher {
        async fn search(&self, query: &str, _locale: &str) -> Result<Vec<TaxonMatch>> {
            if query.contains("quercus") {
                Ok(vec![TaxonMatch {
                    taxon_id: 1,
                    taxon_name: "Quercus robur".into(),
                    taxon_rank: "species".into(),
                    taxonomy: TaxonomyInfo::default(),
                    taxon_common_name_en: None,
                    taxon_common_name_loc: None,
                    taxon_matched_name: "quercus robur".into(),
                    taxon_url: "https://www.inaturalist.org/taxa/1".into(),
                    score: 0.9,
                    taxon_names: vec!["quercus robur".into()],
                }])
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[tokio::test]
    async fn end_to_end_identifies_a_latin_binomial() {
        let deps = PipelineDeps { searcher: Some(Box::new(FakeSearcher)), ..Default::default() };
        let results = process_all("Found Quercus robur near the river.".to_string(), degraded_config(), deps).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].identified);
        assert_eq!(results[0].source_text, "Quercus robur");
    }

    #[tokio::test]
    async fn end_to_end_reports_not_matched_when_searcher_finds_nothing() {
        let deps = PipelineDeps { searcher: Some(Box::new(FakeSearcher)), ..Default::default() };
        let results = process_all("Found Bogus fictus nearby.".to_string(), degraded_config(), deps).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].identified);
    }

    #[test]
    fn estimate_counts_latin_candidates_without_network() {
        let estimate = estimate("Found Quercus robur near the river.", &degraded_config()).unwrap();
        assert_eq!(estimate.regex_candidates, 1);
        assert_eq!(estimate.gazetteer_candidates, 0);
        assert_eq!(estimate.llm_calls_phase1, 0);
    }
}
