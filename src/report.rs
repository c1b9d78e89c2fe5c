use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::config::{BenchmarkConfig, OutputFormat, OutputSettings};
use crate::error::ReportError;
use crate::metrics::{
    memory_stats, quality_metrics, summarize_run, MemoryStats, ModelAggregate, QualityMetrics, RunSummary,
};
use crate::system::SystemProfile;

pub const REPORT_SCHEMA_VERSION: &str = "1.0.0";
const REPORT_PREFIX: &str = "benchmark-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    #[serde(flatten)]
    pub aggregate: ModelAggregate,
    pub memory_usage: MemoryStats,
    pub quality: QualityMetrics,
    pub timestamp: DateTime<Utc>,
}

impl BenchmarkResult {
    pub fn from_aggregate(aggregate: ModelAggregate) -> Self {
        let memory_usage = memory_stats(&aggregate.samples);
        let quality = quality_metrics(&aggregate.samples);
        Self {
            aggregate,
            memory_usage,
            quality,
            timestamp: Utc::now(),
        }
    }

    pub fn model(&self) -> &str {
        &self.aggregate.model
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub version: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub configuration: BenchmarkConfig,
}

/// Everything one run produced. Treated as immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub summary: RunSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_info: Option<SystemProfile>,
    pub results: Vec<BenchmarkResult>,
    pub metadata: ReportMetadata,
}

impl RunReport {
    pub fn build(
        aggregates: Vec<ModelAggregate>,
        profile: SystemProfile,
        configuration: BenchmarkConfig,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let summary = summarize_run(&aggregates);
        let results = aggregates.into_iter().map(BenchmarkResult::from_aggregate).collect();
        Self {
            summary,
            system_info: Some(profile),
            results,
            metadata: ReportMetadata {
                version: REPORT_SCHEMA_VERSION.to_string(),
                run_id: Uuid::new_v4(),
                started_at,
                duration_ms: elapsed.as_millis() as u64,
                configuration,
            },
        }
    }

    pub fn result_for(&self, model: &str) -> Option<&BenchmarkResult> {
        self.results.iter().find(|r| r.model() == model)
    }

    /// Copy shaped by the output settings (raw samples and system info are optional).
    pub fn prepared(&self, output: &OutputSettings) -> RunReport {
        let mut report = self.clone();
        if !output.include_system_info {
            report.system_info = None;
        }
        if !output.include_raw_data {
            for r in &mut report.results {
                r.aggregate.samples.clear();
            }
        }
        report
    }

    pub fn file_stem(&self) -> String {
        format!(
            "{}{}",
            REPORT_PREFIX,
            self.metadata.started_at.format("%Y-%m-%dT%H-%M-%SZ")
        )
    }

    pub fn to_json(&self, prettify: bool) -> Result<String, ReportError> {
        let text = if prettify {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(text)
    }

    /// Human-readable summary; sections follow what `prepared` kept.
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            "# Benchmark Report".to_string(),
            String::new(),
            format!("**Generated:** {}", self.summary.timestamp.to_rfc3339()),
            format!("**Duration:** {:.1} seconds", self.metadata.duration_ms as f64 / 1000.0),
            format!("**Run:** {} (schema {})", self.metadata.run_id, self.metadata.version),
            String::new(),
            "## Summary".to_string(),
            String::new(),
            format!("- **Models Tested:** {}", self.summary.total_models),
            format!("- **Successful Samples:** {}", self.summary.total_samples),
            format!("- **Fastest Model:** {}", self.summary.fastest_model.as_deref().unwrap_or("n/a")),
            format!("- **Slowest Model:** {}", self.summary.slowest_model.as_deref().unwrap_or("n/a")),
            format!("- **Average Speed:** {:.1} tokens/sec", self.summary.average_tokens_per_second),
            String::new(),
        ];

        if let Some(sys) = &self.system_info {
            lines.push("## System Information".to_string());
            lines.push(String::new());
            lines.push(format!("- **OS:** {} ({})", sys.os, sys.architecture));
            lines.push(format!(
                "- **RAM:** {:.1}GB total, {:.1}GB available",
                sys.total_memory_gb, sys.available_memory_gb
            ));
            lines.push(format!(
                "- **Server:** {}",
                sys.inference_server_version.as_deref().unwrap_or("not detected")
            ));
            if !sys.accelerators.is_empty() {
                lines.push("- **GPUs:**".to_string());
                for gpu in &sys.accelerators {
                    lines.push(format!("  - {} {} ({}MB VRAM)", gpu.vendor, gpu.model, gpu.memory_mb));
                }
            }
            lines.push(String::new());
        }

        lines.push("## Benchmark Results".to_string());
        lines.push(String::new());
        lines.push("| Model | Tokens/sec | First Token (ms) | Total Time (ms) | Memory (MB) | Quality Score |".to_string());
        lines.push("|-------|------------|------------------|-----------------|-------------|---------------|".to_string());
        for r in &self.results {
            let a = &r.aggregate;
            let quality = r.quality.consistency * r.quality.completion_rate / 100.0;
            lines.push(format!(
                "| {} | {:.1} | {:.0} | {:.0} | {:.1} | {:.1} |",
                a.model,
                a.average_tokens_per_second,
                a.average_first_token_latency_ms,
                a.average_total_latency_ms,
                r.memory_usage.average_memory_usage_mb,
                quality
            ));
        }
        lines.push(String::new());

        for r in &self.results {
            let a = &r.aggregate;
            lines.push(format!("### {}", a.model));
            lines.push(String::new());
            lines.push(format!(
                "- Tokens per second: {:.2} (min {:.2}, max {:.2}, stddev {:.2})",
                a.average_tokens_per_second, a.min_tokens_per_second, a.max_tokens_per_second, a.standard_deviation
            ));
            lines.push(format!("- First token latency: {:.2}ms", a.average_first_token_latency_ms));
            lines.push(format!("- Total latency: {:.2}ms", a.average_total_latency_ms));
            lines.push(format!(
                "- Memory: peak {:.2}MB, average {:.2}MB, {:.2} tokens/MB",
                r.memory_usage.peak_memory_usage_mb,
                r.memory_usage.average_memory_usage_mb,
                r.memory_usage.memory_efficiency
            ));
            lines.push(format!(
                "- Quality: {:.1} tokens per response, {:.1}% consistency, {:.1}% completion",
                r.quality.average_response_length, r.quality.consistency, r.quality.completion_rate
            ));
            lines.push(String::new());
        }
        lines.join("\n")
    }

    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let text = fs::read_to_string(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write every configured format into the output directory.
    pub fn save(&self, output: &OutputSettings) -> Result<Vec<PathBuf>, ReportError> {
        let dir = &output.directory;
        fs::create_dir_all(dir).map_err(|source| ReportError::Io {
            path: dir.clone(),
            source,
        })?;

        let report = self.prepared(output);
        let stem = self.file_stem();
        let mut written = Vec::new();
        for format in &output.formats {
            match format {
                OutputFormat::Json => {
                    let path = dir.join(format!("{}.{}", stem, format.extension()));
                    write_text(&path, &report.to_json(output.prettify)?)?;
                    written.push(path);
                }
                OutputFormat::Markdown => {
                    let path = dir.join(format!("{}.{}", stem, format.extension()));
                    write_text(&path, &report.to_markdown())?;
                    written.push(path);
                }
                OutputFormat::Csv => {
                    let path = dir.join(format!("{}.{}", stem, format.extension()));
                    write_summary_csv(&report, &path)?;
                    written.push(path);
                    if output.include_raw_data {
                        let raw = dir.join(format!("{}-raw.{}", stem, format.extension()));
                        write_samples_csv(&report, &raw)?;
                        written.push(raw);
                    }
                }
            }
        }
        for p in &written {
            log::info!("[report] wrote {}", p.display());
        }
        Ok(written)
    }
}

pub(crate) fn write_text(path: &Path, text: &str) -> Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, text).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRow<'a> {
    model: &'a str,
    samples: usize,
    average_tokens_per_second: f64,
    min_tokens_per_second: f64,
    max_tokens_per_second: f64,
    standard_deviation: f64,
    average_first_token_latency_ms: f64,
    average_total_latency_ms: f64,
    peak_memory_usage_mb: f64,
    average_memory_usage_mb: f64,
    completion_rate: f64,
    consistency: f64,
}

fn write_summary_csv(report: &RunReport, path: &Path) -> Result<(), ReportError> {
    let mut wtr = csv::Writer::from_path(path)?;
    for r in &report.results {
        let a = &r.aggregate;
        wtr.serialize(SummaryRow {
            model: &a.model,
            samples: a.samples.len(),
            average_tokens_per_second: a.average_tokens_per_second,
            min_tokens_per_second: a.min_tokens_per_second,
            max_tokens_per_second: a.max_tokens_per_second,
            standard_deviation: a.standard_deviation,
            average_first_token_latency_ms: a.average_first_token_latency_ms,
            average_total_latency_ms: a.average_total_latency_ms,
            peak_memory_usage_mb: r.memory_usage.peak_memory_usage_mb,
            average_memory_usage_mb: r.memory_usage.average_memory_usage_mb,
            completion_rate: r.quality.completion_rate,
            consistency: r.quality.consistency,
        })?;
    }
    wtr.flush().map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn write_samples_csv(report: &RunReport, path: &Path) -> Result<(), ReportError> {
    let mut wtr = csv::Writer::from_path(path)?;
    for sample in report.results.iter().flat_map(|r| r.aggregate.samples.iter()) {
        wtr.serialize(sample)?;
    }
    wtr.flush().map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Saved JSON reports in `dir`, most recent first.
pub fn list_reports(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in walkdir::WalkDir::new(dir).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.starts_with(REPORT_PREFIX) || !name.ends_with(".json") {
            continue;
        }
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((modified, entry.into_path()));
    }
    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    found.into_iter().map(|(_, p)| p).collect()
}

/// `(baseline, current)`: the two most recent reports in `dir`.
pub fn latest_pair(dir: &Path) -> Option<(PathBuf, PathBuf)> {
    let mut reports = list_reports(dir).into_iter();
    let current = reports.next()?;
    let baseline = reports.next()?;
    Some((baseline, current))
}
