use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "llmbench.json";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub version: String,
    pub benchmark: BenchmarkSettings,
    pub prompts: PromptSets,
    pub output: OutputSettings,
    pub ollama: OllamaSettings,
    pub generation: GenerationOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            benchmark: BenchmarkSettings::default(),
            prompts: PromptSets::default(),
            output: OutputSettings::default(),
            ollama: OllamaSettings::default(),
            generation: GenerationOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BenchmarkSettings {
    pub timeout_seconds: u64,
    pub iterations: u32,
    pub concurrency: u32,
    pub warmup_iterations: u32,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            iterations: 5,
            concurrency: 1,
            warmup_iterations: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSets {
    pub default: Vec<String>,
    pub coding: Vec<String>,
    pub creative: Vec<String>,
    pub reasoning: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for PromptSets {
    fn default() -> Self {
        Self {
            default: owned(&[
                "Explain quantum computing in simple terms.",
                "Write a short story about a robot discovering emotions.",
                "Solve this math problem: What is 15% of 240?",
                "Create a Python function to calculate the Fibonacci sequence.",
                "Describe the process of photosynthesis in detail.",
            ]),
            coding: owned(&[
                "Write a function to reverse a string in Python.",
                "Implement a binary search algorithm in JavaScript.",
                "Create a REST API endpoint using Express.js.",
                "Write a recursive function to calculate factorial.",
                "Implement a simple linked list in C++.",
            ]),
            creative: owned(&[
                "Write a haiku about artificial intelligence.",
                "Create a dialogue between two characters meeting for the first time.",
                "Describe a futuristic city in 100 words.",
                "Write a product description for an innovative gadget.",
                "Create a short poem about the changing seasons.",
            ]),
            reasoning: owned(&[
                "If a train travels 60mph for 2.5 hours, how far does it go?",
                "What are the ethical implications of autonomous vehicles?",
                "Compare the advantages and disadvantages of renewable energy.",
                "Explain the logical fallacy in: \"All birds can fly, penguins are birds, therefore penguins can fly.\"",
                "How would you prioritize tasks when everything seems urgent?",
            ]),
        }
    }
}

impl PromptSets {
    /// Named prompt set; unknown or empty names fall back to `default`.
    pub fn get(&self, name: &str) -> &[String] {
        let set = match name.trim().to_ascii_lowercase().as_str() {
            "coding" => &self.coding,
            "creative" => &self.creative,
            "reasoning" => &self.reasoning,
            _ => &self.default,
        };
        if set.is_empty() {
            &self.default
        } else {
            set
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Csv,
    Markdown,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "csv" => Some(OutputFormat::Csv),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Markdown => "md",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputSettings {
    pub formats: Vec<OutputFormat>,
    pub include_system_info: bool,
    pub include_raw_data: bool,
    pub prettify: bool,
    pub directory: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            formats: vec![OutputFormat::Json, OutputFormat::Csv],
            include_system_info: true,
            include_raw_data: true,
            prettify: true,
            directory: PathBuf::from("./benchmark-results"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OllamaSettings {
    pub base_url: String,
    /// Timeout for control-plane calls (show, version, tags). Generation uses
    /// the per-call benchmark timeout instead.
    pub timeout_seconds: u64,
    pub retries: u32,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_seconds: 10,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub num_predict: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            num_predict: 256,
        }
    }
}

/// Fully resolved workload handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkConfig {
    pub models: Vec<String>,
    pub prompts: Vec<String>,
    pub iterations: u32,
    pub concurrency: u32,
    pub timeout_seconds: u64,
    pub warmup_iterations: u32,
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.models.is_empty() {
            errors.push("at least one model is required".to_string());
        }
        if self.models.iter().any(|m| m.trim().is_empty()) {
            errors.push("model names must not be empty".to_string());
        }
        if self.prompts.is_empty() {
            errors.push("at least one prompt is required".to_string());
        }
        if self.timeout_seconds < 1 {
            errors.push("timeout must be at least 1 second".to_string());
        }
        if self.concurrency < 1 {
            errors.push("concurrency must be at least 1".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

/// Per-invocation values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub models: Option<Vec<String>>,
    pub prompts: Option<Vec<String>>,
    pub prompt_set: Option<String>,
    pub iterations: Option<u32>,
    pub concurrency: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub warmup_iterations: Option<u32>,
}

/// Resolve the benchmark workload. Explicit prompts win over a named set.
pub fn apply_overrides(base: &AppConfig, overrides: &ConfigOverrides) -> BenchmarkConfig {
    let prompts = match (&overrides.prompts, &overrides.prompt_set) {
        (Some(p), _) if !p.is_empty() => p.clone(),
        (_, Some(set)) => base.prompts.get(set).to_vec(),
        _ => base.prompts.default.clone(),
    };

    BenchmarkConfig {
        models: overrides.models.clone().unwrap_or_default(),
        prompts,
        iterations: overrides.iterations.unwrap_or(base.benchmark.iterations),
        concurrency: overrides.concurrency.unwrap_or(base.benchmark.concurrency),
        timeout_seconds: overrides
            .timeout_seconds
            .unwrap_or(base.benchmark.timeout_seconds),
        warmup_iterations: overrides
            .warmup_iterations
            .unwrap_or(base.benchmark.warmup_iterations),
    }
}

impl AppConfig {
    /// Load from `path`, or from `llmbench.json` in the working directory.
    /// A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("[config] {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
        config.validate()?;
        log::info!("[config] loaded {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.benchmark.iterations < 1 {
            errors.push("benchmark iterations must be at least 1".to_string());
        }
        if self.benchmark.timeout_seconds < 1 {
            errors.push("benchmark timeout must be at least 1 second".to_string());
        }
        if self.benchmark.concurrency < 1 {
            errors.push("benchmark concurrency must be at least 1".to_string());
        }
        if self.prompts.default.is_empty() {
            errors.push("default prompts must contain at least one prompt".to_string());
        }
        if self.output.formats.is_empty() {
            errors.push("output formats must contain at least one format".to_string());
        }
        let url = self.ollama.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(format!("ollama base URL '{}' must be http(s)", url));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ──

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.benchmark.iterations, 5);
        assert_eq!(config.benchmark.warmup_iterations, 2);
        assert_eq!(config.ollama.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.prompts.default.len(), 5);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "benchmark": { "iterations": 9 }, "ollama": { "baseUrl": "http://gpu-box:11434" } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.benchmark.iterations, 9);
        assert_eq!(config.benchmark.timeout_seconds, 300);
        assert_eq!(config.ollama.base_url, "http://gpu-box:11434");
        assert_eq!(config.ollama.retries, 3);
        assert_eq!(config.generation.num_predict, 256);
    }

    // ── overrides ──

    #[test]
    fn test_apply_overrides_prefers_explicit_values() {
        let base = AppConfig::default();
        let overrides = ConfigOverrides {
            models: Some(vec!["phi3:3.8b".into()]),
            iterations: Some(0),
            warmup_iterations: Some(4),
            ..Default::default()
        };
        let resolved = apply_overrides(&base, &overrides);
        assert_eq!(resolved.models, vec!["phi3:3.8b".to_string()]);
        // zero is an explicit value, not "unset"
        assert_eq!(resolved.iterations, 0);
        assert_eq!(resolved.warmup_iterations, 4);
        assert_eq!(resolved.timeout_seconds, 300);
        assert_eq!(resolved.prompts, base.prompts.default);
    }

    #[test]
    fn test_apply_overrides_prompt_set() {
        let base = AppConfig::default();
        let overrides = ConfigOverrides {
            prompt_set: Some("Coding".into()),
            ..Default::default()
        };
        let resolved = apply_overrides(&base, &overrides);
        assert_eq!(resolved.prompts, base.prompts.coding);

        let overrides = ConfigOverrides {
            prompts: Some(vec!["hi".into()]),
            prompt_set: Some("coding".into()),
            ..Default::default()
        };
        assert_eq!(apply_overrides(&base, &overrides).prompts, vec!["hi".to_string()]);
    }

    #[test]
    fn test_prompt_set_unknown_falls_back() {
        let sets = PromptSets::default();
        assert_eq!(sets.get("nope"), sets.default.as_slice());
    }

    // ── validation ──

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = AppConfig::default();
        config.benchmark.iterations = 0;
        config.benchmark.concurrency = 0;
        config.output.formats.clear();
        match config.validate() {
            Err(ConfigError::Invalid(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_benchmark_config_validate() {
        let config = BenchmarkConfig {
            models: vec![],
            prompts: vec![],
            iterations: 0,
            concurrency: 1,
            timeout_seconds: 0,
            warmup_iterations: 0,
        };
        match config.validate() {
            Err(ConfigError::Invalid(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_explicit_file_errors() {
        let dir = std::env::temp_dir().join(format!("llmbench-cfg-{}", uuid::Uuid::new_v4()));
        let explicit = dir.join("missing.json");
        assert!(matches!(
            AppConfig::load(Some(&explicit)),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("llmbench-cfg-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        let mut config = AppConfig::default();
        config.benchmark.iterations = 3;
        config.save(&path).unwrap();
        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("csv"), Some(OutputFormat::Csv));
        assert_eq!(OutputFormat::parse("html"), None);
        assert_eq!(OutputFormat::parse("md"), Some(OutputFormat::Markdown));
        assert_eq!(OutputFormat::Markdown.extension(), "md");
        let v = serde_json::to_value(vec![OutputFormat::Markdown]).unwrap();
        assert_eq!(v, serde_json::json!(["markdown"]));
    }
}
