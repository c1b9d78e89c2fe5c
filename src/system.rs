use serde::{Deserialize, Serialize};
use std::process::Command;
use sysinfo::System;

use crate::error::ProbeError;
use crate::ollama::OllamaClient;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// GB held back for the host OS when deciding what fits.
pub const HOST_RESERVED_GB: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accelerator {
    pub vendor: String,
    pub model: String,
    pub memory_mb: u64,
    pub driver_version: String,
    pub cuda_capable: bool,
    pub compute_capability: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuInfo {
    pub brand: String,
    pub cores: usize,
    pub physical_cores: usize,
    pub clock_mhz: u64,
    pub features: Vec<String>,
}

/// Snapshot of the host taken once per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemProfile {
    pub total_memory_gb: f64,
    pub available_memory_gb: f64,
    pub os: String,
    pub architecture: String,
    pub accelerators: Vec<Accelerator>,
    pub cpu: CpuInfo,
    pub inference_server_version: Option<String>,
    pub inference_server_reachable: bool,
}

impl SystemProfile {
    pub fn effective_memory_gb(&self) -> f64 {
        (self.available_memory_gb - HOST_RESERVED_GB).max(0.0)
    }

    pub fn has_accelerator(&self) -> bool {
        !self.accelerators.is_empty()
    }

    pub fn has_cuda(&self) -> bool {
        self.accelerators.iter().any(|a| a.cuda_capable)
    }

    pub fn is_apple_silicon(&self) -> bool {
        self.os == "macos" && self.architecture == "arm64"
    }
}

/// Weighted hardware-fitness score (0-100ish).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareScore {
    pub total: f64,
    pub cpu: f64,
    pub gpu: f64,
    pub ram: f64,
    pub effective_memory_gb: f64,
    pub has_gpu: bool,
    pub has_cuda: bool,
}

pub fn hardware_score(profile: &SystemProfile) -> HardwareScore {
    let effective = profile.effective_memory_gb();

    let mut cpu = (profile.cpu.physical_cores as f64 * 2.0).min(16.0);
    cpu += (profile.cpu.clock_mhz as f64 / 1000.0).min(4.0) * 2.0;
    if profile.is_apple_silicon() {
        cpu += 6.0;
    } else if profile.cpu.features.iter().any(|f| f == "avx2") {
        cpu += 4.0;
    }

    let mut gpu = 0.0;
    let mut has_cuda = false;
    if let Some(best) = primary_accelerator(&profile.accelerators) {
        gpu += (best.memory_mb as f64 / 1024.0).min(24.0);
        if best.cuda_capable {
            has_cuda = true;
            gpu += 20.0;
            let cc: f64 = best
                .compute_capability
                .as_deref()
                .and_then(|c| c.parse().ok())
                .unwrap_or(0.0);
            if cc >= 8.0 {
                gpu += 6.0;
            } else if cc >= 7.0 {
                gpu += 4.0;
            } else if cc >= 6.0 {
                gpu += 2.0;
            }
        }
    }

    let ram = (effective * 0.625).min(20.0);

    HardwareScore {
        total: cpu + gpu + ram,
        cpu,
        gpu,
        ram,
        effective_memory_gb: effective,
        has_gpu: profile.has_accelerator(),
        has_cuda,
    }
}

/// Largest-memory accelerator; the first listed wins a tie.
fn primary_accelerator(accelerators: &[Accelerator]) -> Option<&Accelerator> {
    accelerators.iter().fold(None, |best: Option<&Accelerator>, a| match best {
        Some(b) if a.memory_mb <= b.memory_mb => Some(b),
        _ => Some(a),
    })
}

/// Detect host resources and check the inference server once.
///
/// Accelerator detection is best-effort and never fails the probe; an
/// unreachable server is reported in the profile, not as an error.
pub async fn probe(client: &OllamaClient) -> Result<SystemProfile, ProbeError> {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();

    // sysinfo >= 0.28 returns bytes directly
    let total_bytes = sys.total_memory();
    if total_bytes == 0 {
        return Err(ProbeError::MemoryUnavailable);
    }
    let available_bytes = sys.available_memory();

    let cpus = sys.cpus();
    if cpus.is_empty() {
        return Err(ProbeError::CpuUnavailable);
    }
    let cpu = CpuInfo {
        brand: cpus
            .first()
            .map(|c| c.brand().trim().to_string())
            .unwrap_or_default(),
        cores: cpus.len(),
        physical_cores: sys.physical_core_count().unwrap_or(cpus.len()),
        clock_mhz: cpus.iter().map(|c| c.frequency()).max().unwrap_or(0),
        features: detect_cpu_features(),
    };

    let accelerators = tokio::task::spawn_blocking(probe_accelerators)
        .await
        .unwrap_or_else(|e| {
            log::warn!("[system] accelerator probe panicked: {}", e);
            Vec::new()
        });

    let (version, reachable) = match client.version().await {
        Ok(v) => (Some(v), true),
        Err(e) => {
            log::info!("[system] inference server at {} not reachable: {}", client.base_url(), e);
            (None, false)
        }
    };

    let profile = SystemProfile {
        total_memory_gb: round1(total_bytes as f64 / BYTES_PER_GB),
        available_memory_gb: round1(available_bytes as f64 / BYTES_PER_GB),
        os: std::env::consts::OS.to_string(),
        architecture: normalize_arch(std::env::consts::ARCH).to_string(),
        accelerators,
        cpu,
        inference_server_version: version,
        inference_server_reachable: reachable,
    };
    log::debug!("[system] profile: {:?}", profile);
    Ok(profile)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn normalize_arch(arch: &str) -> &str {
    match arch {
        "aarch64" => "arm64",
        "x86_64" => "x64",
        other => other,
    }
}

fn detect_cpu_features() -> Vec<String> {
    #[allow(unused_mut)]
    let mut features: Vec<String> = Vec::new();
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx") {
            features.push("avx".into());
        }
        if std::arch::is_x86_feature_detected!("avx2") {
            features.push("avx2".into());
        }
        if std::arch::is_x86_feature_detected!("avx512f") {
            features.push("avx512f".into());
        }
        if std::arch::is_x86_feature_detected!("fma") {
            features.push("fma".into());
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        if std::arch::is_aarch64_feature_detected!("neon") {
            features.push("neon".into());
        }
    }
    features
}

fn probe_accelerators() -> Vec<Accelerator> {
    if let Some(nvidia) = probe_nvidia_smi() {
        if !nvidia.is_empty() {
            return nvidia;
        }
    }
    probe_other_gpus()
}

/// One line per GPU: `name, memory.total, driver_version, compute_cap`.
fn probe_nvidia_smi() -> Option<Vec<Accelerator>> {
    let mut cmd = Command::new("nvidia-smi");
    cmd.args([
        "--query-gpu=name,memory.total,driver_version,compute_cap",
        "--format=csv,noheader,nounits",
    ]);
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    }
    let out = cmd.output().ok()?;
    if !out.status.success() {
        return None;
    }
    let driver_loadable = cuda_driver_loadable();
    Some(parse_nvidia_smi(&String::from_utf8_lossy(&out.stdout), driver_loadable))
}

fn parse_nvidia_smi(stdout: &str, driver_loadable: bool) -> Vec<Accelerator> {
    let mut gpus = Vec::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
        if fields.len() < 2 || fields[0].is_empty() {
            continue;
        }
        let model = fields[0].to_string();
        let memory_mb = fields[1].parse::<u64>().unwrap_or(0);
        let driver_version = fields
            .get(2)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let reported_cc = fields
            .get(3)
            .filter(|s| s.parse::<f64>().is_ok())
            .map(|s| s.to_string());
        // A reported compute capability means the CUDA stack answered.
        let cuda_capable = reported_cc.is_some() || driver_loadable;
        let compute_capability = if cuda_capable {
            reported_cc.or_else(|| Some(compute_capability_for(&model).to_string()))
        } else {
            None
        };
        gpus.push(Accelerator {
            vendor: "NVIDIA".to_string(),
            model,
            memory_mb,
            driver_version,
            cuda_capable,
            compute_capability,
        });
    }
    gpus
}

fn cuda_driver_loadable() -> bool {
    #[cfg(target_os = "windows")]
    let candidates = ["nvcuda.dll"];
    #[cfg(target_os = "macos")]
    let candidates: [&str; 0] = [];
    #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
    let candidates = ["libcuda.so.1", "libcuda.so"];

    candidates
        .iter()
        .any(|name| unsafe { libloading::Library::new(name) }.is_ok())
}

/// Known NVIDIA model fragments mapped to CUDA compute capability.
const COMPUTE_CAPABILITIES: &[(&str, &str)] = &[
    ("4090", "8.9"), ("4080", "8.9"), ("4070", "8.9"), ("4060", "8.9"),
    ("3090", "8.6"), ("3080", "8.6"), ("3070", "8.6"), ("3060", "8.6"),
    ("2080", "7.5"), ("2070", "7.5"), ("2060", "7.5"),
    ("1660", "7.5"), ("1650", "7.5"),
    ("1080", "6.1"), ("1070", "6.1"), ("1060", "6.1"),
    ("A100", "8.0"), ("A6000", "8.6"), ("V100", "7.0"), ("T4", "7.5"),
];

pub fn compute_capability_for(model: &str) -> &'static str {
    COMPUTE_CAPABILITIES
        .iter()
        .find(|(key, _)| model.contains(key))
        .map(|(_, cc)| *cc)
        .unwrap_or("5.0")
}

fn vendor_from_name(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    if lower.contains("nvidia") || lower.contains("geforce") || lower.contains("quadro") {
        "NVIDIA"
    } else if lower.contains("amd") || lower.contains("radeon") || lower.contains("ati ") {
        "AMD"
    } else if lower.contains("intel") {
        "Intel"
    } else if lower.contains("apple") {
        "Apple"
    } else {
        "Unknown"
    }
}

#[cfg(target_os = "macos")]
fn probe_other_gpus() -> Vec<Accelerator> {
    let out = match Command::new("system_profiler").args(["SPDisplaysDataType"]).output() {
        Ok(o) if o.status.success() => o,
        _ => return Vec::new(),
    };
    let text = String::from_utf8_lossy(&out.stdout);
    let mut gpus = Vec::new();
    let mut vram_mb = 0u64;
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(name) = trimmed.strip_prefix("Chipset Model:") {
            gpus.push(name.trim().to_string());
        } else if trimmed.contains("VRAM") && trimmed.contains(':') {
            // e.g. "VRAM (Total): 8 GB"
            if let Some(after) = trimmed.split(':').nth(1) {
                let after = after.trim().to_ascii_lowercase();
                let num: String = after.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
                if let Ok(v) = num.parse::<f64>() {
                    vram_mb = if after.contains("gb") { (v * 1024.0) as u64 } else { v as u64 };
                }
            }
        }
    }
    if vram_mb == 0 && cfg!(target_arch = "aarch64") {
        // Unified memory: report 75% of RAM as usable GPU memory.
        let mut sys = System::new();
        sys.refresh_memory();
        vram_mb = sys.total_memory() * 3 / 4 / 1024 / 1024;
    }
    gpus.into_iter()
        .map(|model| Accelerator {
            vendor: vendor_from_name(&model).to_string(),
            model,
            memory_mb: vram_mb,
            driver_version: "Unknown".to_string(),
            cuda_capable: false,
            compute_capability: None,
        })
        .collect()
}

#[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
fn probe_other_gpus() -> Vec<Accelerator> {
    let out = match Command::new("lspci").output() {
        Ok(o) if o.status.success() => o,
        _ => return Vec::new(),
    };
    let names = parse_lspci(&String::from_utf8_lossy(&out.stdout));
    let vram_mb = sysfs_vram_mb();
    names
        .into_iter()
        .map(|model| {
            let vendor = vendor_from_name(&model);
            Accelerator {
                vendor: vendor.to_string(),
                memory_mb: if vendor == "AMD" { vram_mb } else { 0 },
                model,
                driver_version: "Unknown".to_string(),
                cuda_capable: false,
                compute_capability: None,
            }
        })
        .collect()
}

#[cfg(target_os = "windows")]
fn probe_other_gpus() -> Vec<Accelerator> {
    let mut cmd = Command::new("powershell");
    cmd.args([
        "-NoProfile",
        "-Command",
        "(Get-CimInstance Win32_VideoController | Select-Object -ExpandProperty Name) -join '\n'",
    ]);
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    }
    let out = match cmd.output() {
        Ok(o) if o.status.success() => o,
        _ => return Vec::new(),
    };
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !is_virtual_display(l))
        .map(|model| Accelerator {
            vendor: vendor_from_name(model).to_string(),
            model: model.to_string(),
            memory_mb: 0,
            driver_version: "Unknown".to_string(),
            cuda_capable: false,
            compute_capability: None,
        })
        .collect()
}

#[allow(dead_code)]
fn is_virtual_display(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("idddriver")
        || lower.contains("virtual")
        || lower.contains("remote")
        || lower.contains("parsec")
        || lower.contains("rdp")
}

#[allow(dead_code)]
fn parse_lspci(stdout: &str) -> Vec<String> {
    let mut gpus = vec![];
    for line in stdout.lines() {
        let lower = line.to_ascii_lowercase();
        if lower.contains("vga") || lower.contains("3d controller") || lower.contains("display controller") {
            // Keep the part after the device class description
            if let Some(pos) = line.find(": ") {
                let name = line[pos + 2..].trim();
                if !name.is_empty() && !is_virtual_display(name) {
                    gpus.push(name.to_string());
                }
            }
        }
    }
    gpus
}

#[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
fn sysfs_vram_mb() -> u64 {
    // AMD GPUs on Linux expose VRAM through sysfs
    if let Ok(entries) = std::fs::read_dir("/sys/class/drm") {
        for entry in entries.flatten() {
            let path = entry.path().join("device/mem_info_vram_total");
            if let Ok(content) = std::fs::read_to_string(&path) {
                if let Ok(bytes) = content.trim().parse::<u64>() {
                    if bytes > 0 {
                        return bytes / 1024 / 1024;
                    }
                }
            }
        }
    }
    0
}
