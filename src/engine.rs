use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use sysinfo::System;

use crate::config::BenchmarkConfig;
use crate::error::{BenchError, CallFailure};
use crate::metrics::{aggregate, ModelAggregate, SampleMetric};
use crate::ollama::GenerateStats;
use crate::report::RunReport;
use crate::system::SystemProfile;

/// The calls the engine needs from an inference server.
#[allow(async_fn_in_trait)]
pub trait InferenceBackend {
    async fn model_exists(&self, model: &str) -> Result<bool, CallFailure>;

    async fn generate(&self, model: &str, prompt: &str) -> Result<GenerateStats, CallFailure>;

    fn endpoint(&self) -> String {
        "inference server".to_string()
    }
}

/// Host memory in use, sampled around every call.
pub trait MemoryGauge {
    fn used_mb(&self) -> f64;
}

pub struct HostMemoryGauge {
    sys: Mutex<System>,
}

impl HostMemoryGauge {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for HostMemoryGauge {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGauge for HostMemoryGauge {
    fn used_mb(&self) -> f64 {
        match self.sys.lock() {
            Ok(mut sys) => {
                sys.refresh_memory();
                sys.used_memory() as f64 / 1024.0 / 1024.0
            }
            Err(_) => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    EnsuringModel,
    Warmup,
    Measuring,
    Done,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EngineState::Idle => "idle",
            EngineState::EnsuringModel => "ensuring model",
            EngineState::Warmup => "warmup",
            EngineState::Measuring => "measuring",
            EngineState::Done => "done",
            EngineState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One unit of work.
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkTask<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub iteration: u32,
    pub timeout_seconds: u64,
}

pub enum TaskOutcome<'a> {
    Recorded(&'a SampleMetric),
    Dropped(&'a CallFailure),
}

/// Progress hooks. All methods default to no-ops.
pub trait RunObserver {
    fn on_state(&mut self, _model: &str, _state: EngineState) {}

    fn on_task_complete(&mut self, _model: &str, _iteration: u32, _outcome: &TaskOutcome<'_>) {}

    fn on_model_complete(&mut self, _model: &str, _aggregate: Option<&ModelAggregate>) {}
}

pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Forwards progress to the `log` facade.
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn on_state(&mut self, model: &str, state: EngineState) {
        log::debug!("[engine] {}: {}", model, state);
    }

    fn on_task_complete(&mut self, model: &str, iteration: u32, outcome: &TaskOutcome<'_>) {
        match outcome {
            TaskOutcome::Recorded(s) => log::info!(
                "[engine] {} #{}: {:.1} tok/s, {:.0}ms",
                model,
                iteration,
                s.tokens_per_second,
                s.total_latency_ms
            ),
            TaskOutcome::Dropped(e) => log::warn!("[engine] {} #{}: dropped ({})", model, iteration, e),
        }
    }
}

pub struct BenchmarkEngine<B, G = HostMemoryGauge> {
    backend: B,
    gauge: G,
}

impl<B: InferenceBackend> BenchmarkEngine<B, HostMemoryGauge> {
    pub fn new(backend: B) -> Self {
        Self::with_gauge(backend, HostMemoryGauge::new())
    }
}

impl<B: InferenceBackend, G: MemoryGauge> BenchmarkEngine<B, G> {
    pub fn with_gauge(backend: B, gauge: G) -> Self {
        Self { backend, gauge }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Sequential run: each model is ensured, warmed up and measured before
    /// the next one starts. Failed calls are dropped; a missing model aborts.
    pub async fn run(
        &self,
        config: &BenchmarkConfig,
        observer: &mut dyn RunObserver,
    ) -> Result<Vec<ModelAggregate>, BenchError> {
        config.validate()?;

        let mut results = Vec::with_capacity(config.models.len());
        for model in &config.models {
            observer.on_state(model, EngineState::Idle);
            match self.run_model(model, config, observer).await {
                Ok(Some(agg)) => results.push(agg),
                Ok(None) => {}
                Err(e) => {
                    observer.on_state(model, EngineState::Failed);
                    log::error!("[engine] run aborted at {}: {}", model, e);
                    return Err(e);
                }
            }
        }
        Ok(results)
    }

    async fn run_model(
        &self,
        model: &str,
        config: &BenchmarkConfig,
        observer: &mut dyn RunObserver,
    ) -> Result<Option<ModelAggregate>, BenchError> {
        observer.on_state(model, EngineState::EnsuringModel);
        self.ensure_model(model).await?;

        if config.warmup_iterations > 0 {
            observer.on_state(model, EngineState::Warmup);
            // validate() guarantees at least one prompt
            let prompt = &config.prompts[0];
            for i in 0..config.warmup_iterations {
                let task = BenchmarkTask {
                    model,
                    prompt,
                    iteration: i,
                    timeout_seconds: config.timeout_seconds,
                };
                if let Err(e) = self.execute(&task).await {
                    log::debug!("[engine] warmup {} for {} failed: {}", i, model, e);
                }
            }
        }

        observer.on_state(model, EngineState::Measuring);
        let mut samples = Vec::new();
        for iteration in 0..config.iterations {
            for prompt in &config.prompts {
                let task = BenchmarkTask {
                    model,
                    prompt,
                    iteration,
                    timeout_seconds: config.timeout_seconds,
                };
                match self.execute(&task).await {
                    Ok(sample) => {
                        observer.on_task_complete(model, iteration, &TaskOutcome::Recorded(&sample));
                        samples.push(sample);
                    }
                    Err(e) => {
                        observer.on_task_complete(model, iteration, &TaskOutcome::Dropped(&e));
                    }
                }
            }
        }

        let agg = aggregate(model, samples);
        if agg.is_none() && config.iterations > 0 {
            log::warn!("[engine] {} produced no successful samples; omitted from report", model);
        }
        observer.on_model_complete(model, agg.as_ref());
        observer.on_state(model, EngineState::Done);
        Ok(agg)
    }

    /// Existence check only; pulling is never done implicitly.
    async fn ensure_model(&self, model: &str) -> Result<(), BenchError> {
        match self.backend.model_exists(model).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(BenchError::ModelNotAvailable {
                model: model.to_string(),
            }),
            Err(cause) => Err(BenchError::ExistenceCheckFailed {
                model: model.to_string(),
                cause,
            }),
        }
    }

    /// One timed call, cancelled at the timeout boundary.
    pub async fn execute(&self, task: &BenchmarkTask<'_>) -> Result<SampleMetric, CallFailure> {
        let memory_before = self.gauge.used_mb();
        let started = Instant::now();

        let result = tokio::time::timeout(
            Duration::from_secs(task.timeout_seconds),
            self.backend.generate(task.model, task.prompt),
        )
        .await;

        let total_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let stats = match result {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(CallFailure::Timeout {
                    seconds: task.timeout_seconds,
                })
            }
        };
        let memory_delta_mb = self.gauge.used_mb() - memory_before;

        Ok(SampleMetric::from_stats(
            task.model,
            task.prompt,
            task.iteration,
            &stats,
            total_latency_ms,
            memory_delta_mb,
        ))
    }

    /// Fire `concurrency` simultaneous calls for one (model, prompt) pair.
    ///
    /// Opt-in load probe: per-call figures include server-side queueing.
    /// Samples are indexed by their slot; failed slots are dropped.
    pub async fn run_concurrent(
        &self,
        model: &str,
        prompt: &str,
        concurrency: u32,
        timeout_seconds: u64,
    ) -> Vec<SampleMetric> {
        let tasks: Vec<BenchmarkTask<'_>> = (0..concurrency)
            .map(|slot| BenchmarkTask {
                model,
                prompt,
                iteration: slot,
                timeout_seconds,
            })
            .collect();

        let outcomes = join_all(tasks.iter().map(|t| self.execute(t))).await;
        let total = outcomes.len();
        let samples: Vec<SampleMetric> = outcomes
            .into_iter()
            .filter_map(|r| match r {
                Ok(s) => Some(s),
                Err(e) => {
                    log::warn!("[engine] concurrent call for {} dropped: {}", model, e);
                    None
                }
            })
            .collect();
        log::info!(
            "[engine] concurrent x{} for {}: {}/{} succeeded",
            concurrency,
            model,
            samples.len(),
            total
        );
        samples
    }

    /// Gate on server reachability, run, and assemble the report.
    pub async fn run_report(
        &self,
        profile: &SystemProfile,
        config: &BenchmarkConfig,
        observer: &mut dyn RunObserver,
    ) -> Result<RunReport, BenchError> {
        if !profile.inference_server_reachable {
            return Err(BenchError::ServerUnreachable {
                base_url: self.backend.endpoint(),
            });
        }
        let started_at = Utc::now();
        let clock = Instant::now();
        let aggregates = self.run(config, observer).await?;
        let report = RunReport::build(aggregates, profile.clone(), config.clone(), started_at, clock.elapsed());
        if report.summary.is_empty() {
            log::warn!("[engine] no model produced any samples");
        }
        Ok(report)
    }
}
