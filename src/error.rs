use std::path::PathBuf;
use thiserror::Error;

/// Host resource detection failed; nothing can be benchmarked without a profile.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("system memory could not be read")]
    MemoryUnavailable,

    #[error("no CPU information reported by the OS")]
    CpuUnavailable,
}

/// Outcome of a single failed request against the inference server.
///
/// Local to one sample: the engine drops the sample and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallFailure {
    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("request failed: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for CallFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CallFailure::Malformed(e.to_string())
        } else {
            CallFailure::Network(e.to_string())
        }
    }
}

/// Fatal errors for a benchmark run.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("inference server at {base_url} is not reachable")]
    ServerUnreachable { base_url: String },

    #[error("model '{model}' is not available on the server (pull it first)")]
    ModelNotAvailable { model: String },

    #[error("could not check whether model '{model}' exists: {cause}")]
    ExistenceCheckFailed { model: String, cause: CallFailure },

    #[error("invalid benchmark configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("report JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("report CSV error: {0}")]
    Csv(#[from] csv::Error),
}
