use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compare::{compare, format_change, ComparisonReport};
use crate::config::{apply_overrides, AppConfig, ConfigOverrides, OutputFormat};
use crate::discovery::size_breakdown;
use crate::engine::{BenchmarkEngine, LogObserver};
use crate::metrics::aggregate;
use crate::ollama::OllamaClient;
use crate::report::{latest_pair, RunReport};
use crate::system::{hardware_score, probe, SystemProfile};
use crate::tiers::{rank, tier_for, CATALOG, TIERS};

#[derive(Parser)]
#[command(name = "llmbench")]
#[command(about = "Benchmark local LLM inference servers", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ./llmbench.json when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show detected hardware and inference server status
    System {
        #[arg(long)]
        json: bool,
    },

    /// List memory tiers and their suggested models
    Tiers,

    /// Rank catalog models for this machine
    Recommend {
        /// Number of models to show
        #[arg(short = 'n', long, default_value = "3")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// List models installed on the server
    Models,

    /// Download a model through the server
    Pull { model: String },

    /// Run a benchmark
    Run {
        /// Models to benchmark (comma separated or repeated)
        #[arg(short, long, value_delimiter = ',')]
        models: Vec<String>,

        /// Benchmark the top N recommended models instead
        #[arg(long, value_name = "N", conflicts_with = "models")]
        recommended: Option<usize>,

        /// Prompt set: default, coding, creative, reasoning
        #[arg(long)]
        prompt_set: Option<String>,

        /// Explicit prompt (repeatable); wins over --prompt-set
        #[arg(long = "prompt")]
        prompts: Vec<String>,

        #[arg(short, long)]
        iterations: Option<u32>,

        #[arg(long)]
        warmup: Option<u32>,

        /// Per-call timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Also fire N simultaneous calls per model after the sequential run
        #[arg(long)]
        concurrency: Option<u32>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output formats: json, csv, markdown
        #[arg(long, value_delimiter = ',')]
        format: Vec<String>,
    },

    /// Compare two saved reports
    Compare {
        baseline: Option<PathBuf>,
        current: Option<PathBuf>,

        /// Compare the two newest reports in the output directory
        #[arg(long)]
        latest: bool,

        #[arg(long)]
        json: bool,

        /// Also write the comparison to a file (.md for Markdown, JSON otherwise)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a config file with default values
    InitConfig { path: PathBuf },
}

fn client_for(config: &AppConfig) -> Result<OllamaClient, String> {
    OllamaClient::new(&config.ollama, config.generation).map_err(|e| format!("HTTP client: {}", e))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

pub async fn execute(cli: Cli) -> Result<(), String> {
    let config = AppConfig::load(cli.config.as_deref()).map_err(|e| e.to_string())?;

    match cli.command {
        Commands::System { json } => run_system(&config, json).await,
        Commands::Tiers => {
            print_tiers();
            Ok(())
        }
        Commands::Recommend { limit, json } => run_recommend(&config, limit, json).await,
        Commands::Models => run_models(&config).await,
        Commands::Pull { model } => run_pull(&config, &model).await,
        Commands::Run {
            models,
            recommended,
            prompt_set,
            prompts,
            iterations,
            warmup,
            timeout,
            concurrency,
            output,
            format,
        } => {
            let overrides = ConfigOverrides {
                models: if models.is_empty() { None } else { Some(models) },
                prompts: if prompts.is_empty() { None } else { Some(prompts) },
                prompt_set,
                iterations,
                concurrency,
                timeout_seconds: timeout,
                warmup_iterations: warmup,
            };
            let mut config = config;
            if let Some(dir) = output {
                config.output.directory = dir;
            }
            if !format.is_empty() {
                let mut formats = Vec::new();
                for f in &format {
                    formats.push(OutputFormat::parse(f).ok_or_else(|| format!("unknown output format '{}'", f))?);
                }
                config.output.formats = formats;
            }
            run_benchmark(&config, overrides, recommended).await
        }
        Commands::Compare {
            baseline,
            current,
            latest,
            json,
            output,
        } => run_compare(&config, baseline, current, latest, json, output.as_deref()),
        Commands::InitConfig { path } => {
            AppConfig::default().save(&path).map_err(|e| e.to_string())?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

async fn probe_with(client: &OllamaClient) -> Result<SystemProfile, String> {
    probe(client).await.map_err(|e| e.to_string())
}

async fn run_system(config: &AppConfig, json: bool) -> Result<(), String> {
    let client = client_for(config)?;
    let profile = probe_with(&client).await?;
    let score = hardware_score(&profile);
    if json {
        let value = serde_json::json!({ "system": profile, "score": score });
        println!("{}", to_json(&value)?);
        return Ok(());
    }

    println!("OS:            {} ({})", profile.os, profile.architecture);
    println!(
        "CPU:           {} ({} cores / {} threads @ {} MHz)",
        profile.cpu.brand, profile.cpu.physical_cores, profile.cpu.cores, profile.cpu.clock_mhz
    );
    if !profile.cpu.features.is_empty() {
        println!("CPU features:  {}", profile.cpu.features.join(", "));
    }
    println!(
        "Memory:        {:.1} GB total, {:.1} GB available ({:.1} GB usable)",
        profile.total_memory_gb,
        profile.available_memory_gb,
        profile.effective_memory_gb()
    );
    if profile.accelerators.is_empty() {
        println!("GPU:           none detected");
    }
    for gpu in &profile.accelerators {
        let cuda = match (&gpu.compute_capability, gpu.cuda_capable) {
            (Some(cc), true) => format!(", CUDA {}", cc),
            (None, true) => ", CUDA".to_string(),
            _ => String::new(),
        };
        println!("GPU:           {} {} ({} MB{})", gpu.vendor, gpu.model, gpu.memory_mb, cuda);
    }
    match (&profile.inference_server_version, profile.inference_server_reachable) {
        (Some(v), true) => println!("Server:        {} (version {})", client.base_url(), v),
        _ => println!("Server:        {} (not reachable)", client.base_url()),
    }
    println!(
        "Score:         {:.1} (cpu {:.1}, gpu {:.1}, ram {:.1})",
        score.total, score.cpu, score.gpu, score.ram
    );
    if let Some(tier) = tier_for(profile.total_memory_gb) {
        println!("Tier:          {}", tier.name);
    }
    Ok(())
}

fn print_tiers() {
    for tier in TIERS {
        let range = match tier.max_gb {
            Some(max) => format!("{:.0}-{:.0} GB", tier.min_gb, max),
            None => format!("{:.0}+ GB", tier.min_gb),
        };
        println!("{} ({})", tier.name, range);
        for m in tier.descriptors() {
            println!(
                "  {:<24} {:>5.1} GB  {:<8} {}",
                m.name, m.memory_requirement_gb, m.quantization, m.description
            );
        }
    }
}

async fn run_recommend(config: &AppConfig, limit: usize, json: bool) -> Result<(), String> {
    let client = client_for(config)?;
    let profile = probe_with(&client).await?;
    let ranked = rank(&profile, CATALOG, limit);
    if json {
        println!("{}", to_json(&ranked)?);
        return Ok(());
    }
    if ranked.is_empty() {
        println!(
            "No catalog model fits in {:.1} GB of usable memory.",
            profile.effective_memory_gb()
        );
        return Ok(());
    }
    for (i, s) in ranked.iter().enumerate() {
        println!(
            "{}. {:<24} score {:>6.1}  {:>5.1} GB  {}",
            i + 1,
            s.model.name,
            s.score,
            s.model.memory_requirement_gb,
            s.model.description
        );
    }
    Ok(())
}

async fn run_models(config: &AppConfig) -> Result<(), String> {
    let client = client_for(config)?;
    let models = client.list_models().await.map_err(|e| e.to_string())?;
    if models.is_empty() {
        println!("No models installed.");
    }
    for m in models {
        println!("{:<32} {:>8.2} GB  {}", m.name, m.size as f64 / 1e9, m.modified_at);
    }
    Ok(())
}

async fn run_pull(config: &AppConfig, model: &str) -> Result<(), String> {
    let client = client_for(config)?;
    client.pull_model(model).await.map_err(|e| e.to_string())?;
    println!("Pulled {}", model);
    Ok(())
}

async fn run_benchmark(
    config: &AppConfig,
    mut overrides: ConfigOverrides,
    recommended: Option<usize>,
) -> Result<(), String> {
    let client = client_for(config)?;
    if !client
        .wait_until_ready(config.ollama.retries, Duration::from_secs(1))
        .await
    {
        log::warn!("[cli] server at {} did not answer", client.base_url());
    }
    let profile = probe_with(&client).await?;

    if overrides.models.is_none() {
        let n = recommended.unwrap_or(3);
        let picked: Vec<String> = rank(&profile, CATALOG, n)
            .into_iter()
            .map(|s| s.model.name.to_string())
            .collect();
        log::info!("[cli] benchmarking recommended models: {}", picked.join(", "));
        overrides.models = Some(picked);
    }
    let bench = apply_overrides(config, &overrides);
    if bench.models.is_empty() {
        return Err("no models to benchmark (none fit this machine; pass --models)".to_string());
    }

    log_download_plan(&client, &bench.models).await;

    let engine = BenchmarkEngine::new(client);
    let report = engine
        .run_report(&profile, &bench, &mut LogObserver)
        .await
        .map_err(|e| e.to_string())?;

    print_run_report(&report);

    if bench.concurrency > 1 {
        let prompt = &bench.prompts[0];
        for result in &report.results {
            let samples = engine
                .run_concurrent(result.model(), prompt, bench.concurrency, bench.timeout_seconds)
                .await;
            match aggregate(result.model(), samples) {
                Some(agg) => println!(
                    "{} x{} concurrent: {:.1} tok/s avg, {:.0} ms avg latency ({} ok)",
                    agg.model,
                    bench.concurrency,
                    agg.average_tokens_per_second,
                    agg.average_total_latency_ms,
                    agg.samples.len()
                ),
                None => println!("{} x{} concurrent: all calls failed", result.model(), bench.concurrency),
            }
        }
    }

    let written = report.save(&config.output).map_err(|e| e.to_string())?;
    for path in written {
        println!("Saved {}", path.display());
    }
    Ok(())
}

/// Warns about requested models the server does not list, with their expected size.
async fn log_download_plan(client: &OllamaClient, models: &[String]) {
    let installed = match client.list_models().await {
        Ok(list) => list,
        Err(e) => {
            log::debug!("[cli] could not list installed models: {}", e);
            return;
        }
    };
    let plan = size_breakdown(models, &installed);
    if plan.missing_count == 0 {
        return;
    }
    for entry in plan.missing() {
        log::warn!(
            "[cli] {} is not installed ({}{:.1}GB download; run `llmbench pull {}`)",
            entry.name,
            if entry.estimated { "~" } else { "" },
            entry.download_gb,
            entry.name
        );
    }
    log::warn!(
        "[cli] {} of {} models missing: {:.1}GB to download, {:.1}GB on disk in total",
        plan.missing_count,
        plan.entries.len(),
        plan.total_download_gb,
        plan.total_disk_gb
    );
}

fn print_run_report(report: &RunReport) {
    if report.summary.is_empty() {
        println!("No successful samples were collected.");
        return;
    }
    println!(
        "{:<24} {:>10} {:>10} {:>10} {:>12} {:>8}",
        "model", "tok/s", "min", "max", "first ms", "samples"
    );
    for r in &report.results {
        let a = &r.aggregate;
        println!(
            "{:<24} {:>10.1} {:>10.1} {:>10.1} {:>12.0} {:>8}",
            a.model,
            a.average_tokens_per_second,
            a.min_tokens_per_second,
            a.max_tokens_per_second,
            a.average_first_token_latency_ms,
            a.samples.len()
        );
    }
    if let (Some(fast), Some(slow)) = (&report.summary.fastest_model, &report.summary.slowest_model) {
        println!("Fastest: {}  Slowest: {}", fast, slow);
    }
    println!(
        "Average: {:.1} tok/s over {} samples in {:.1}s",
        report.summary.average_tokens_per_second,
        report.summary.total_samples,
        report.metadata.duration_ms as f64 / 1000.0
    );
}

fn load_report(path: &Path) -> Result<RunReport, String> {
    RunReport::load(path).map_err(|e| e.to_string())
}

fn run_compare(
    config: &AppConfig,
    baseline: Option<PathBuf>,
    current: Option<PathBuf>,
    latest: bool,
    json: bool,
    output: Option<&Path>,
) -> Result<(), String> {
    let (baseline, current) = match (baseline, current) {
        (Some(b), Some(c)) => (b, c),
        _ if latest => latest_pair(&config.output.directory).ok_or_else(|| {
            format!(
                "need at least two reports in {}",
                config.output.directory.display()
            )
        })?,
        _ => return Err("compare needs <baseline> <current> or --latest".to_string()),
    };

    let cmp = compare(&load_report(&baseline)?, &load_report(&current)?);
    if json {
        println!("{}", to_json(&cmp)?);
    } else {
        print_comparison(&cmp);
    }
    if let Some(path) = output {
        cmp.save(path, config.output.prettify).map_err(|e| e.to_string())?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

fn print_comparison(cmp: &ComparisonReport) {
    println!(
        "Baseline {} ({})  vs  current {} ({})",
        cmp.baseline.run_id,
        cmp.baseline.started_at.format("%Y-%m-%d %H:%M"),
        cmp.current.run_id,
        cmp.current.started_at.format("%Y-%m-%d %H:%M")
    );
    if cmp.comparisons.is_empty() {
        println!("No models in common.");
        return;
    }
    println!("{:<24} {:>10} {:>14} {:>10}", "model", "speed", "first token", "memory");
    for c in &cmp.comparisons {
        println!(
            "{:<24} {:>10} {:>14} {:>10}",
            c.model,
            format_change(c.tokens_per_second.change),
            format_change(c.first_token_latency.change),
            format_change(c.memory_usage.change)
        );
    }
    println!(
        "Average speed improvement: {}  latency improvement: {}",
        format_change(cmp.summary.average_speed_improvement),
        format_change(cmp.summary.average_latency_improvement)
    );
}
