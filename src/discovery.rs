use serde::Serialize;

use crate::ollama::InstalledModel;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Published download sizes in GB; on-disk size matches the download for every entry.
const KNOWN_SIZES: &[(&str, f64)] = &[
    ("llama3.1:8b", 4.7),
    ("llama3.1:70b", 40.0),
    ("mistral:7b", 4.1),
    ("gemma2:9b", 5.4),
    ("phi3:3.8b", 2.2),
    ("deepseek-coder:6.7b", 3.8),
    ("codellama:7b", 3.8),
    ("codegemma:7b", 5.0),
    ("deepseek-r1:8b", 4.9),
    ("deepseek-r1:14b", 8.1),
    ("qwq:32b", 20.0),
    ("llava:7b", 4.5),
    ("llava:13b", 8.0),
    ("gemma:2b", 1.4),
    ("gemma3:4b", 3.3),
    ("qwen3:latest", 5.2),
    ("phi:2.7b", 1.6),
];

/// Checked in order; the first marker found in the name decides.
const SIZE_CLASSES: &[(&[&str], f64)] = &[
    (&["70b", "72b"], 40.0),
    (&["30b", "32b", "34b"], 20.0),
    (&["13b", "14b", "15b"], 8.0),
    (&["7b", "8b", "9b"], 4.5),
    (&["3b", "4b"], 2.5),
    (&["1b", "2b"], 1.5),
];

const DEFAULT_SIZE_GB: f64 = 4.0;

pub fn known_size_gb(name: &str) -> Option<f64> {
    KNOWN_SIZES.iter().find(|(n, _)| *n == name).map(|(_, gb)| *gb)
}

/// Rough size from the parameter count embedded in the tag.
pub fn estimate_model_size(name: &str) -> f64 {
    let lower = name.to_lowercase();
    SIZE_CLASSES
        .iter()
        .find(|(markers, _)| markers.iter().any(|m| lower.contains(m)))
        .map(|(_, gb)| *gb)
        .unwrap_or(DEFAULT_SIZE_GB)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeEntry {
    pub name: String,
    pub download_gb: f64,
    pub disk_gb: f64,
    pub installed: bool,
    /// Size came from the parameter-count heuristic.
    pub estimated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeBreakdown {
    pub total_download_gb: f64,
    pub total_disk_gb: f64,
    pub entries: Vec<SizeEntry>,
    pub installed_count: usize,
    pub missing_count: usize,
}

impl SizeBreakdown {
    pub fn missing(&self) -> impl Iterator<Item = &SizeEntry> {
        self.entries.iter().filter(|e| !e.installed)
    }
}

fn size_entry(name: &str, installed: &[InstalledModel]) -> SizeEntry {
    if let Some(m) = installed.iter().find(|m| m.name == name) {
        return SizeEntry {
            name: name.to_string(),
            download_gb: 0.0,
            disk_gb: m.size as f64 / GB,
            installed: true,
            estimated: false,
        };
    }
    let (gb, estimated) = match known_size_gb(name) {
        Some(gb) => (gb, false),
        None => (estimate_model_size(name), true),
    };
    SizeEntry {
        name: name.to_string(),
        download_gb: gb,
        disk_gb: gb,
        installed: false,
        estimated,
    }
}

/// What the requested models cost to fetch and store, given what the
/// server already lists.
pub fn size_breakdown(requested: &[String], installed: &[InstalledModel]) -> SizeBreakdown {
    let entries: Vec<SizeEntry> = requested.iter().map(|name| size_entry(name, installed)).collect();
    let installed_count = entries.iter().filter(|e| e.installed).count();
    SizeBreakdown {
        total_download_gb: entries.iter().map(|e| e.download_gb).sum(),
        total_disk_gb: entries.iter().map(|e| e.disk_gb).sum(),
        missing_count: entries.len() - installed_count,
        installed_count,
        entries,
    }
}
