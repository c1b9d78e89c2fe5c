use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ollama::GenerateStats;

const PROMPT_PREVIEW_CHARS: usize = 50;

/// Outcome of one successfully executed benchmark call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleMetric {
    pub model: String,
    pub prompt: String,
    pub iteration: u32,
    pub tokens_per_second: f64,
    pub first_token_latency_ms: f64,
    pub total_latency_ms: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub memory_delta_mb: f64,
    pub timestamp: DateTime<Utc>,
}

impl SampleMetric {
    pub fn from_stats(
        model: &str,
        prompt: &str,
        iteration: u32,
        stats: &GenerateStats,
        total_latency_ms: f64,
        memory_delta_mb: f64,
    ) -> Self {
        let prompt_eval_ms = ns_to_ms(stats.prompt_eval_duration);
        let eval_ms = ns_to_ms(stats.eval_duration);
        Self {
            model: model.to_string(),
            prompt: preview(prompt),
            iteration,
            tokens_per_second: tokens_per_second(stats.eval_count, eval_ms),
            first_token_latency_ms: prompt_eval_ms,
            total_latency_ms,
            prompt_tokens: stats.prompt_eval_count,
            completion_tokens: stats.eval_count,
            total_tokens: stats.prompt_eval_count.saturating_add(stats.eval_count),
            memory_delta_mb,
            timestamp: Utc::now(),
        }
    }
}

fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}

/// Always finite: zero tokens or a zero duration give 0.
pub fn tokens_per_second(completion_tokens: u64, eval_ms: f64) -> f64 {
    if completion_tokens == 0 || eval_ms <= 0.0 {
        return 0.0;
    }
    completion_tokens as f64 / (eval_ms / 1000.0)
}

fn preview(prompt: &str) -> String {
    if prompt.chars().count() <= PROMPT_PREVIEW_CHARS {
        return prompt.to_string();
    }
    let head: String = prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
    format!("{}...", head)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by N).
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Per-model reduction of one run's samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAggregate {
    pub model: String,
    #[serde(rename = "rawMetrics", default)]
    pub samples: Vec<SampleMetric>,
    pub average_tokens_per_second: f64,
    pub min_tokens_per_second: f64,
    pub max_tokens_per_second: f64,
    pub average_first_token_latency_ms: f64,
    pub average_total_latency_ms: f64,
    pub standard_deviation: f64,
}

/// `None` for an empty sample list: a model without samples has no aggregate.
pub fn aggregate(model: &str, samples: Vec<SampleMetric>) -> Option<ModelAggregate> {
    if samples.is_empty() {
        return None;
    }
    let tps: Vec<f64> = samples.iter().map(|s| s.tokens_per_second).collect();
    let first: Vec<f64> = samples.iter().map(|s| s.first_token_latency_ms).collect();
    let total: Vec<f64> = samples.iter().map(|s| s.total_latency_ms).collect();

    Some(ModelAggregate {
        model: model.to_string(),
        average_tokens_per_second: mean(&tps),
        min_tokens_per_second: tps.iter().copied().fold(f64::INFINITY, f64::min),
        max_tokens_per_second: tps.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        average_first_token_latency_ms: mean(&first),
        average_total_latency_ms: mean(&total),
        standard_deviation: std_dev(&tps),
        samples,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub peak_memory_usage_mb: f64,
    pub average_memory_usage_mb: f64,
    /// Tokens per MB; 0 when the average delta is 0.
    pub memory_efficiency: f64,
}

pub fn memory_stats(samples: &[SampleMetric]) -> MemoryStats {
    let deltas: Vec<f64> = samples.iter().map(|s| s.memory_delta_mb).collect();
    let peak = deltas.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let average = mean(&deltas);
    let total_tokens: u64 = samples.iter().map(|s| s.total_tokens).sum();
    let efficiency = if average == 0.0 {
        0.0
    } else {
        total_tokens as f64 / average
    };
    MemoryStats {
        peak_memory_usage_mb: if peak.is_finite() { peak } else { 0.0 },
        average_memory_usage_mb: average,
        memory_efficiency: efficiency,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub average_response_length: f64,
    pub response_time_ms: f64,
    pub consistency: f64,
    pub completion_rate: f64,
}

pub fn quality_metrics(samples: &[SampleMetric]) -> QualityMetrics {
    if samples.is_empty() {
        return QualityMetrics {
            average_response_length: 0.0,
            response_time_ms: 0.0,
            consistency: 0.0,
            completion_rate: 0.0,
        };
    }
    let completed = samples.iter().filter(|s| s.completion_tokens > 0).count();
    let lengths: Vec<f64> = samples.iter().map(|s| s.completion_tokens as f64).collect();
    let latencies: Vec<f64> = samples.iter().map(|s| s.total_latency_ms).collect();

    let avg_len = mean(&lengths);
    let cv = if avg_len > 0.0 {
        std_dev(&lengths) / avg_len
    } else {
        1.0
    };

    QualityMetrics {
        average_response_length: avg_len,
        response_time_ms: mean(&latencies),
        consistency: (100.0 - cv * 100.0).max(0.0),
        completion_rate: completed as f64 * 100.0 / samples.len() as f64,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_models: usize,
    pub total_samples: usize,
    pub fastest_model: Option<String>,
    pub slowest_model: Option<String>,
    pub average_tokens_per_second: f64,
    pub timestamp: DateTime<Utc>,
}

impl RunSummary {
    pub fn is_empty(&self) -> bool {
        self.total_models == 0
    }
}

/// Run-level reduction. Ties on speed go to the model listed first.
pub fn summarize_run(aggregates: &[ModelAggregate]) -> RunSummary {
    let mut fastest: Option<&ModelAggregate> = None;
    let mut slowest: Option<&ModelAggregate> = None;
    for agg in aggregates {
        if fastest.map_or(true, |f| agg.average_tokens_per_second > f.average_tokens_per_second) {
            fastest = Some(agg);
        }
        if slowest.map_or(true, |s| agg.average_tokens_per_second < s.average_tokens_per_second) {
            slowest = Some(agg);
        }
    }
    let means: Vec<f64> = aggregates.iter().map(|a| a.average_tokens_per_second).collect();

    RunSummary {
        total_models: aggregates.len(),
        total_samples: aggregates.iter().map(|a| a.samples.len()).sum(),
        fastest_model: fastest.map(|a| a.model.clone()),
        slowest_model: slowest.map(|a| a.model.clone()),
        average_tokens_per_second: mean(&means),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample(model: &str, iteration: u32, completion: u64, eval_ms: u64) -> SampleMetric {
        let stats = GenerateStats {
            prompt_eval_count: 10,
            prompt_eval_duration: 20_000_000,
            eval_count: completion,
            eval_duration: eval_ms * 1_000_000,
        };
        SampleMetric::from_stats(model, "Explain quantum computing in simple terms.", iteration, &stats, 1200.0, 64.0)
    }

    fn aggregate_with_tps(model: &str, tps: f64) -> ModelAggregate {
        let mut s = sample(model, 0, 10, 1000);
        s.tokens_per_second = tps;
        aggregate(model, vec![s]).unwrap()
    }

    // ── sample construction ──

    #[test]
    fn test_sample_from_stats() {
        let s = sample("m", 0, 40, 2000);
        assert_eq!(s.tokens_per_second, 20.0);
        assert_eq!(s.first_token_latency_ms, 20.0);
        assert_eq!(s.total_tokens, 50);
    }

    #[test]
    fn test_zero_completion_tokens_gives_zero_rate() {
        let s = sample("m", 0, 0, 0);
        assert_eq!(s.tokens_per_second, 0.0);
        assert_eq!(tokens_per_second(0, 1500.0), 0.0);
        // tokens with a zero duration must not produce infinity
        assert_eq!(tokens_per_second(12, 0.0), 0.0);
    }

    #[test]
    fn test_garbage_counters_do_not_overflow() {
        let stats = GenerateStats {
            prompt_eval_count: u64::MAX,
            prompt_eval_duration: 1,
            eval_count: 5,
            eval_duration: 1_000_000,
        };
        let s = SampleMetric::from_stats("m", "p", 0, &stats, 10.0, 0.0);
        assert_eq!(s.total_tokens, u64::MAX);
        assert_eq!(s.completion_tokens, 5);
    }

    #[test]
    fn test_prompt_preview() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(80);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PROMPT_PREVIEW_CHARS + 3);
    }

    // ── aggregate ──

    #[test]
    fn test_aggregate_empty_is_none() {
        assert!(aggregate("m", vec![]).is_none());
    }

    #[test]
    fn test_aggregate_single_sample() {
        let agg = aggregate("m", vec![sample("m", 0, 30, 1000)]).unwrap();
        assert_eq!(agg.standard_deviation, 0.0);
        assert_eq!(agg.min_tokens_per_second, 30.0);
        assert_eq!(agg.max_tokens_per_second, 30.0);
        assert_eq!(agg.average_tokens_per_second, 30.0);
    }

    #[test]
    fn test_aggregate_alternating_lengths() {
        // two prompts x two iterations, constant eval duration
        let samples: Vec<_> = [10u64, 20, 10, 20]
            .iter()
            .enumerate()
            .map(|(i, c)| sample("m", (i / 2) as u32, *c, 500))
            .collect();
        let rates: Vec<f64> = samples.iter().map(|s| s.tokens_per_second).collect();
        assert_eq!(rates, vec![20.0, 40.0, 20.0, 40.0]);

        let quality = quality_metrics(&samples);
        let agg = aggregate("m", samples).unwrap();
        assert_eq!(agg.average_tokens_per_second, 30.0);
        assert_eq!(agg.standard_deviation, 10.0);
        assert!(agg.min_tokens_per_second <= agg.average_tokens_per_second);
        assert!(agg.average_tokens_per_second <= agg.max_tokens_per_second);

        // mean 15, stddev 5 => cv 1/3
        assert_eq!(quality.average_response_length, 15.0);
        assert!((quality.consistency - (100.0 - 100.0 / 3.0)).abs() < 1e-9);
        assert_eq!(quality.completion_rate, 100.0);
    }

    // ── memory ──

    #[test]
    fn test_memory_stats() {
        let mut a = sample("m", 0, 10, 1000);
        a.memory_delta_mb = 10.0;
        let mut b = sample("m", 1, 30, 1000);
        b.memory_delta_mb = 30.0;
        let stats = memory_stats(&[a, b]);
        assert_eq!(stats.peak_memory_usage_mb, 30.0);
        assert_eq!(stats.average_memory_usage_mb, 20.0);
        // (20 + 40) tokens / 20MB
        assert_eq!(stats.memory_efficiency, 3.0);
    }

    #[test]
    fn test_memory_efficiency_zero_average() {
        let mut a = sample("m", 0, 10, 1000);
        a.memory_delta_mb = 0.0;
        let stats = memory_stats(&[a]);
        assert_eq!(stats.memory_efficiency, 0.0);
        assert!(stats.memory_efficiency.is_finite());
    }

    // ── quality ──

    #[test]
    fn test_quality_all_empty_responses() {
        let samples = vec![sample("m", 0, 0, 0), sample("m", 1, 0, 0)];
        let q = quality_metrics(&samples);
        assert_eq!(q.completion_rate, 0.0);
        assert_eq!(q.consistency, 0.0);
        assert_eq!(q.average_response_length, 0.0);
    }

    #[test]
    fn test_quality_partial_completion() {
        let samples = vec![sample("m", 0, 0, 0), sample("m", 1, 10, 100), sample("m", 2, 10, 100), sample("m", 3, 10, 100)];
        assert_eq!(quality_metrics(&samples).completion_rate, 75.0);
    }

    // ── summary ──

    #[test]
    fn test_summarize_run() {
        let aggs = vec![
            aggregate_with_tps("a", 10.0),
            aggregate_with_tps("b", 30.0),
            aggregate_with_tps("c", 20.0),
        ];
        let summary = summarize_run(&aggs);
        assert_eq!(summary.total_models, 3);
        assert_eq!(summary.total_samples, 3);
        assert_eq!(summary.fastest_model.as_deref(), Some("b"));
        assert_eq!(summary.slowest_model.as_deref(), Some("a"));
        assert_eq!(summary.average_tokens_per_second, 20.0);
    }

    #[test]
    fn test_summarize_run_ties_keep_first() {
        let aggs = vec![aggregate_with_tps("a", 15.0), aggregate_with_tps("b", 15.0)];
        let summary = summarize_run(&aggs);
        assert_eq!(summary.fastest_model.as_deref(), Some("a"));
        assert_eq!(summary.slowest_model.as_deref(), Some("a"));
    }

    #[test]
    fn test_summarize_empty_run() {
        let summary = summarize_run(&[]);
        assert!(summary.is_empty());
        assert_eq!(summary.total_samples, 0);
        assert_eq!(summary.fastest_model, None);
        assert_eq!(summary.average_tokens_per_second, 0.0);
    }
}
