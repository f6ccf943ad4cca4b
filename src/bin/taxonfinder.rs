//! TaxonFinder CLI: `process`, `dry-run`, and a `build-gazetteer` placeholder.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use taxonfinder::config::Config;
use taxonfinder::events::{PhaseProgress, PipelineFinished, ResultReady};
use taxonfinder::loaders::load_text;
use taxonfinder::logging::setup_logging;
use taxonfinder::orchestrator::{estimate, process, PipelineDeps};
use taxonfinder::{formatter, PipelineEvent};
use tracing::error;

/// The TaxonFinder CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration JSON file.
    #[arg(long, global = true, default_value = "taxonfinder.config.json")]
    config: PathBuf,

    /// Emit logs in JSON (overrides LOG_FORMAT env).
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process input text and produce JSON results.
    Process {
        input_path: PathBuf,
        output_path: Option<PathBuf>,
        /// Output one entry per occurrence.
        #[arg(long)]
        all_occurrences: bool,
    },

    /// Estimate workload without calling APIs/LLMs.
    #[command(name = "dry-run")]
    DryRun { input_path: PathBuf },

    /// Placeholder for gazetteer builder (to be implemented in Step 7).
    #[command(name = "build-gazetteer")]
    BuildGazetteer {
        #[arg(long, default_value = "csv")]
        source: String,
        #[arg(long = "file")]
        file_path: Option<PathBuf>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        locales: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let json_mode = cli.json_logs || std::env::var("LOG_FORMAT").as_deref() == Ok("json");
    setup_logging(json_mode);

    match cli.command {
        Commands::Process { input_path, output_path, all_occurrences } => {
            run_process(&cli.config, &input_path, output_path.as_deref(), all_occurrences).await
        }
        Commands::DryRun { input_path } => run_dry_run(&cli.config, &input_path),
        Commands::BuildGazetteer { .. } => {
            anyhow::bail!("build-gazetteer is not implemented yet (planned in Step 7).")
        }
    }
}

async fn run_process(
    config_path: &Path,
    input_path: &Path,
    output_path: Option<&Path>,
    all_occurrences: bool,
) -> anyhow::Result<()> {
    let outcome = async {
        let config = Config::from_file(config_path)?;
        let text = load_text(input_path, config.max_file_size_mb)?;

        let mut results = Vec::new();
        let mut finished: Option<PipelineFinished> = None;
        let mut rx = process(text, config, PipelineDeps::default());
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::PhaseStarted(_) => {}
                PipelineEvent::PhaseProgress(p) => echo_progress(&p),
                PipelineEvent::ResultReady(ResultReady { result }) => results.push(result),
                PipelineEvent::PipelineFinished(f) => finished = Some(f),
            }
        }

        let output_obj = if all_occurrences {
            formatter::format_full(&results)
        } else {
            formatter::format_deduplicated(&results)
        };
        let payload = serde_json::to_string_pretty(&output_obj)?;

        if let Some(path) = output_path {
            std::fs::write(path, &payload)?;
            eprintln!("Written to {}", path.display());
        } else {
            println!("{payload}");
        }
        echo_summary(finished.as_ref());
        Ok(())
    }
    .await;

    if let Err(e) = &outcome {
        let e: &anyhow::Error = e;
        error!(error = %e, "cli_process_failed");
    }
    outcome
}

fn run_dry_run(config_path: &Path, input_path: &Path) -> anyhow::Result<()> {
    let config = Config::from_file(config_path)?;
    let text = load_text(input_path, config.max_file_size_mb)?;
    let est = estimate(&text, &config)?;

    let lines = [
        format!("Sentences: {}", est.sentences),
        format!("LLM chunks: {}", est.chunks),
        format!("LLM calls (phase1): {}", est.llm_calls_phase1),
        format!("Gazetteer candidates: {}", est.gazetteer_candidates),
        format!("Regex candidates: {}", est.regex_candidates),
        format!("Unique candidates (est): {}", est.unique_candidates),
        format!("API calls (est): {}", est.api_calls_estimated),
        format!("Estimated time (s): {:.1}", est.estimated_time_seconds),
    ];
    println!("{}", lines.join("\n"));
    Ok(())
}

fn echo_progress(event: &PhaseProgress) {
    let detail = if event.detail.is_empty() { String::new() } else { format!(" {}", event.detail) };
    eprintln!("[{}] {}/{}{detail}", event.phase, event.current, event.total);
}

fn echo_summary(finished: Option<&PipelineFinished>) {
    let Some(finished) = finished else { return };
    let s = &finished.summary;
    eprintln!(
        "Done in {:.2}s — identified {}, unidentified {}, candidates {}, api_calls {}",
        s.total_time, s.identified_count, s.unidentified_count, s.unique_candidates, s.api_calls
    );
}
