//! `evalbench` command line.

use std::future::Future;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, ConfigOverrides};
use crate::engine::aggregator::{self, MetricRow};
use crate::engine::export;
use crate::engine::types::{MetricKind, RunRequest, TestRun};
use crate::error::AppError;
use crate::AppState;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "evalbench",
    version,
    about = "Run one prompt against several models and compare the results"
)]
pub struct Cli {
    /// Evaluation backend base URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Request timeout in seconds for a whole test run
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Override data dir (database, logs, config.toml)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a prompt to one or more models and record the run
    Run {
        /// Prompt sent to every model
        #[arg(short, long)]
        prompt: String,

        /// Reference answer; enables the quality metrics
        #[arg(short, long)]
        ground_truth: Option<String>,

        /// Use retrieval-augmented generation
        #[arg(long, default_value_t = false)]
        rag: bool,

        /// Model to test (repeatable or comma-separated). Defaults to every available model.
        #[arg(short, long = "model", value_delimiter = ',')]
        models: Vec<String>,

        /// Metric to compute (repeatable or comma-separated). Defaults to all.
        #[arg(long = "metric", value_delimiter = ',')]
        metrics: Vec<String>,
    },
    /// List models offered by the backend
    Models,
    /// Show recent runs, most recent first
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Compare models within a run (latest by default)
    Compare {
        /// Test id of the run to compare
        #[arg(long, conflicts_with = "index")]
        run: Option<String>,

        /// Position in history, 0 = latest
        #[arg(long)]
        index: Option<usize>,

        /// Metric used to pick the best model
        #[arg(long, default_value = "ragas")]
        metric: String,
    },
    /// Write a run (latest by default) as `evaluation-<id>.json`
    Export {
        /// Test id of the run to export
        #[arg(long, conflicts_with = "index")]
        run: Option<String>,

        /// Position in history, 0 = latest
        #[arg(long)]
        index: Option<usize>,

        /// Export only the run's results as a comparison set
        #[arg(long, default_value_t = false)]
        comparison: bool,

        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_url: self.api_url.clone(),
            timeout_secs: self.timeout,
            data_dir: self.data_dir.clone(),
        }
    }
}

/// Resolve config, initialise logging and state, and execute the chosen command.
pub async fn run(cli: Cli) -> Result<(), AppError> {
    let config = AppConfig::load(&cli.overrides())?;
    let _log_guard = crate::logging::init(Some(&config.data_dir.join("logs")));
    crate::logging::install_crash_hook(&config.data_dir);

    tracing::info!("Starting evalbench v{}", env!("CARGO_PKG_VERSION"));
    let state = AppState::init(config)?;
    let json = cli.json;

    match cli.command {
        Commands::Run {
            prompt,
            ground_truth,
            rag,
            models,
            metrics,
        } => {
            let models = if models.is_empty() {
                let available = state.orchestrator.list_models().await?;
                tracing::info!(count = available.len(), "No models given, testing every available model");
                available.into_iter().map(|m| m.name).collect()
            } else {
                models
            };
            let request = RunRequest {
                prompt,
                ground_truth,
                use_rag: rag,
                models,
                metrics,
            };
            let run = run_to_completion(&state, request).await?;
            if json {
                print_json(&run)?;
            } else {
                print_run(&run);
            }
        }
        Commands::Models => {
            let models = state.orchestrator.list_models().await?;
            if json {
                print_json(&models)?;
            } else {
                for m in &models {
                    let size = m.size.as_deref().unwrap_or("-");
                    let runner = m.runner.as_deref().unwrap_or("-");
                    println!("{:<32} {:<22} {}", m.name, size, runner);
                }
            }
        }
        Commands::History { limit } => {
            let runs = state.history.list(Some(limit))?;
            if json {
                print_json(&runs)?;
            } else {
                let overview = aggregator::history_overview(&state.history.list(None)?);
                println!(
                    "{} runs stored, {} model evaluations, {:.2}s average run",
                    overview.total_runs, overview.total_models_tested, overview.avg_run_time
                );
                for run in &runs {
                    println!(
                        "{:<24} {}  {} models  {:>7.2}s  {}",
                        run.test_id,
                        run.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        run.models_tested,
                        run.total_time,
                        preview(&run.prompt, 48)
                    );
                }
            }
        }
        Commands::Compare { run, index, metric } => {
            let metric: MetricKind = metric.parse()?;
            let run = select_run(&state, run.as_deref(), index)?;
            let comparison = aggregator::compare(&run.results, metric);
            let summary = aggregator::summary_stats(&run.results);
            if json {
                #[derive(Serialize)]
                struct CompareDoc<'a> {
                    test_id: &'a str,
                    comparison: aggregator::Comparison,
                    summary: aggregator::SummaryStats,
                    table: Vec<MetricRow>,
                }
                print_json(&CompareDoc {
                    test_id: &run.test_id,
                    comparison,
                    summary,
                    table: aggregator::metric_table(&run.results),
                })?;
            } else {
                print_table(&aggregator::metric_table(&run.results));
                println!();
                match &comparison.best {
                    Some(best) => println!("Best by {metric}: {}", best.model),
                    None if summary.count == 0 => println!("Best by {metric}: n/a (every model failed)"),
                    None => println!("Best by {metric}: n/a (no model reported it)"),
                }
                println!(
                    "Avg latency: {:.2}s   Total tokens: {}   Models: {} ok / {} failed",
                    summary.avg_latency, summary.total_tokens, summary.count, summary.errored
                );
            }
        }
        Commands::Export {
            run,
            index,
            comparison,
            out,
        } => {
            let run = select_run(&state, run.as_deref(), index)?;
            let bytes = if comparison {
                export::export_comparison(&run.results)?
            } else {
                export::export_run(&run)?
            };
            let path = export::write_export(&out, &export::export_filename(Some(&run.test_id)), &bytes)?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

/// Await the run even if the user interrupts, so a completed run is never lost.
/// A second interrupt aborts it instead; nothing is recorded then.
async fn run_to_completion(state: &AppState, request: RunRequest) -> Result<TestRun, AppError> {
    let handle = state.orchestrator.spawn_run(request);
    await_run(handle, tokio::signal::ctrl_c).await
}

async fn await_run<T, S, F>(mut handle: JoinHandle<Result<T, AppError>>, mut interrupt: S) -> Result<T, AppError>
where
    S: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
{
    let joined = tokio::select! {
        res = &mut handle => res,
        Ok(()) = interrupt() => {
            eprintln!("Interrupted; waiting for the in-flight run to finish so it is recorded. Press Ctrl-C again to abort.");
            tokio::select! {
                res = &mut handle => res,
                Ok(()) = interrupt() => {
                    handle.abort();
                    tracing::warn!("Run aborted by a second interrupt; it was not recorded");
                    return Err(AppError::Internal("run aborted before completion".into()));
                }
            }
        }
    };
    joined.map_err(|e| AppError::Internal(format!("run task failed: {e}")))?
}

fn select_run(state: &AppState, test_id: Option<&str>, index: Option<usize>) -> Result<TestRun, AppError> {
    if let Some(index) = index {
        return state
            .history
            .at(index)?
            .ok_or_else(|| AppError::NotFound(format!("no run at history index {index}")));
    }
    match test_id {
        Some(id) => state
            .history
            .get(id)?
            .ok_or_else(|| AppError::NotFound(format!("TestRun {id}"))),
        None => state
            .history
            .latest()?
            .ok_or_else(|| AppError::NotFound("no runs recorded yet".into())),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_run(run: &TestRun) {
    println!("Test ID: {}  ({} models, {:.2}s)", run.test_id, run.models_tested, run.total_time);
    for r in &run.results {
        match (&r.error, &r.response) {
            (Some(err), _) => println!("  {:<28} ERROR {}", r.model, err),
            (None, Some(text)) => println!("  {:<28} {}", r.model, preview(text, 80)),
            (None, None) => println!("  {:<28} (no response)", r.model),
        }
    }
    println!();
    print_table(&aggregator::metric_table(&run.results));
}

fn print_table(rows: &[MetricRow]) {
    println!(
        "{:<28} {:>7} {:>7} {:>7} {:>9} {:>7} {:>8} {:>7} {:>7}",
        "model", "ragas", "bleu", "rouge", "bertscore", "exact", "latency", "ttft", "tokens"
    );
    for row in rows {
        if let Some(err) = &row.error {
            println!("{:<28} failed: {}", row.model, preview(err, 60));
            continue;
        }
        println!(
            "{:<28} {:>7} {:>7} {:>7} {:>9} {:>7} {:>8} {:>7} {:>7}",
            row.model,
            fmt_score(row.get(MetricKind::Ragas)),
            fmt_score(row.get(MetricKind::Bleu)),
            fmt_score(row.get(MetricKind::Rouge)),
            fmt_score(row.get(MetricKind::Bertscore)),
            fmt_score(row.get(MetricKind::ExactMatch)),
            fmt_score(row.latency),
            fmt_score(row.ttft),
            row.tokens.map(|t| t.to_string()).unwrap_or_else(|| "N/A".into()),
        );
    }
}

fn fmt_score(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.3}")).unwrap_or_else(|| "N/A".into())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
