use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

use crate::error::ReportError;
use crate::report::{write_text, BenchmarkResult, RunReport};

/// One metric across two runs. `change` is `None` when the baseline is zero
/// and the current value is not.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDelta {
    pub baseline: f64,
    pub current: f64,
    pub change: Option<f64>,
}

impl MetricDelta {
    pub fn new(baseline: f64, current: f64) -> Self {
        Self {
            baseline,
            current,
            change: percent_change(baseline, current),
        }
    }
}

pub fn percent_change(baseline: f64, current: f64) -> Option<f64> {
    if baseline == 0.0 {
        return if current == 0.0 { Some(0.0) } else { None };
    }
    Some((current - baseline) / baseline * 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelComparison {
    pub model: String,
    pub tokens_per_second: MetricDelta,
    pub first_token_latency: MetricDelta,
    pub memory_usage: MetricDelta,
}

impl ModelComparison {
    /// Positive when latency went down.
    pub fn latency_improvement(&self) -> Option<f64> {
        self.first_token_latency.change.map(|c| -c)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_models: usize,
    pub average_tokens_per_second: f64,
}

impl RunSnapshot {
    fn of(report: &RunReport) -> Self {
        Self {
            run_id: report.metadata.run_id,
            started_at: report.metadata.started_at,
            completed_at: report.summary.timestamp,
            total_models: report.summary.total_models,
            average_tokens_per_second: report.summary.average_tokens_per_second,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSummary {
    pub models_compared: usize,
    pub average_speed_improvement: Option<f64>,
    pub average_latency_improvement: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub baseline: RunSnapshot,
    pub current: RunSnapshot,
    pub comparisons: Vec<ModelComparison>,
    pub summary: ComparisonSummary,
}

impl ComparisonReport {
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            "# Benchmark Comparison".to_string(),
            String::new(),
            format!(
                "**Baseline:** {} ({} models)",
                self.baseline.completed_at.to_rfc3339(),
                self.baseline.total_models
            ),
            format!(
                "**Current:** {} ({} models)",
                self.current.completed_at.to_rfc3339(),
                self.current.total_models
            ),
            String::new(),
            "## Summary".to_string(),
            String::new(),
            format!("- **Models Compared:** {}", self.summary.models_compared),
            format!(
                "- **Average Speed Improvement:** {}",
                format_change(self.summary.average_speed_improvement)
            ),
            format!(
                "- **Average Latency Improvement:** {}",
                format_change(self.summary.average_latency_improvement)
            ),
            String::new(),
            "## Model Comparisons".to_string(),
            String::new(),
            "| Model | Tokens/sec Change | Latency Change | Memory Change |".to_string(),
            "|-------|-------------------|----------------|---------------|".to_string(),
        ];
        for c in &self.comparisons {
            lines.push(format!(
                "| {} | {} | {} | {} |",
                c.model,
                format_change(c.tokens_per_second.change),
                format_change(c.first_token_latency.change),
                format_change(c.memory_usage.change)
            ));
        }
        lines.push(String::new());
        lines.join("\n")
    }

    /// Markdown for a `.md`/`.markdown` path, JSON otherwise.
    pub fn save(&self, path: &Path, prettify: bool) -> Result<(), ReportError> {
        let markdown = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("markdown"))
            .unwrap_or(false);
        let text = if markdown {
            self.to_markdown()
        } else if prettify {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        write_text(path, &text)
    }
}

fn compare_result(baseline: &BenchmarkResult, current: &BenchmarkResult) -> ModelComparison {
    ModelComparison {
        model: current.model().to_string(),
        tokens_per_second: MetricDelta::new(
            baseline.aggregate.average_tokens_per_second,
            current.aggregate.average_tokens_per_second,
        ),
        first_token_latency: MetricDelta::new(
            baseline.aggregate.average_first_token_latency_ms,
            current.aggregate.average_first_token_latency_ms,
        ),
        memory_usage: MetricDelta::new(
            baseline.memory_usage.average_memory_usage_mb,
            current.memory_usage.average_memory_usage_mb,
        ),
    }
}

fn mean_defined(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let defined: Vec<f64> = values.flatten().collect();
    if defined.is_empty() {
        None
    } else {
        Some(defined.iter().sum::<f64>() / defined.len() as f64)
    }
}

/// Align by exact model name in the current report's order. Models present
/// in only one report are left out.
pub fn compare(baseline: &RunReport, current: &RunReport) -> ComparisonReport {
    let comparisons: Vec<ModelComparison> = current
        .results
        .iter()
        .filter_map(|cur| baseline.result_for(cur.model()).map(|base| compare_result(base, cur)))
        .collect();

    let summary = ComparisonSummary {
        models_compared: comparisons.len(),
        average_speed_improvement: mean_defined(comparisons.iter().map(|c| c.tokens_per_second.change)),
        average_latency_improvement: mean_defined(comparisons.iter().map(|c| c.latency_improvement())),
    };

    ComparisonReport {
        baseline: RunSnapshot::of(baseline),
        current: RunSnapshot::of(current),
        comparisons,
        summary,
    }
}

/// `+12.5%`, `-3.0%` or `N/A`.
pub fn format_change(change: Option<f64>) -> String {
    match change {
        Some(c) => format!("{:+.1}%", c),
        None => "N/A".to_string(),
    }
}
