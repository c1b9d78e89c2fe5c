use serde::Serialize;
use std::cmp::Ordering;

use crate::system::SystemProfile;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub name: &'static str,
    pub priority: u32,
    pub description: &'static str,
    pub memory_requirement_gb: f64,
    pub accelerator_optimized: bool,
    pub cpu_optimized: bool,
    pub quantization: &'static str,
}

/// RAM band `[min_gb, max_gb)`; `max_gb == None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub name: &'static str,
    pub min_gb: f64,
    pub max_gb: Option<f64>,
    /// Model names in tier-local priority order.
    pub models: &'static [&'static str],
}

impl Tier {
    pub fn contains(&self, memory_gb: f64) -> bool {
        memory_gb >= self.min_gb && self.max_gb.map_or(true, |max| memory_gb < max)
    }

    pub fn descriptors(&self) -> Vec<&'static ModelDescriptor> {
        self.models.iter().filter_map(|name| find_model(name)).collect()
    }
}

const fn model(
    name: &'static str,
    priority: u32,
    description: &'static str,
    memory_requirement_gb: f64,
    accelerator_optimized: bool,
    cpu_optimized: bool,
) -> ModelDescriptor {
    ModelDescriptor {
        name,
        priority,
        description,
        memory_requirement_gb,
        accelerator_optimized,
        cpu_optimized,
        quantization: "Q4_0",
    }
}

/// Every model known to the recommender, deduplicated across tiers; the
/// priority is the one from the lowest tier a model appears in.
pub static CATALOG: &[ModelDescriptor] = &[
    model("deepseek-r1:1.5b", 1, "DeepSeek R1 1.5B - Lightweight reasoning model", 1.2, false, true),
    model("gemma:2b", 2, "Google Gemma 2B - Efficient small model", 1.5, false, true),
    model("phi:2.7b", 3, "Microsoft Phi 2.7B - Small but capable", 2.0, false, true),
    model("phi3:3.8b", 4, "Microsoft Phi-3 3.8B - Enhanced small model", 2.8, true, true),
    model("gemma2:9b", 2, "Google Gemma 2 9B - Balanced performance", 5.5, true, false),
    model("mistral:7b", 3, "Mistral 7B - High-performance medium model", 4.1, true, false),
    model("llama3.1:8b", 4, "Meta Llama 3.1 8B - Latest Llama model", 4.7, true, false),
    model("deepseek-r1:8b", 5, "DeepSeek R1 8B - Medium reasoning model", 4.9, true, false),
    model("llava:7b", 6, "LLaVA 7B - Multimodal vision-language model", 4.5, true, false),
    model("phi4:14b", 3, "Microsoft Phi-4 14B - Advanced reasoning", 8.2, true, false),
    model("deepseek-r1:14b", 5, "DeepSeek R1 14B - Large reasoning model", 8.5, true, false),
    model("llava:13b", 7, "LLaVA 13B - Large multimodal model", 7.8, true, false),
    model("deepseek-r1:32b", 3, "DeepSeek R1 32B - Extra large reasoning model", 18.9, true, false),
];

pub static TIERS: &[Tier] = &[
    Tier {
        name: "Tier 1 (4GB-7GB)",
        min_gb: 4.0,
        max_gb: Some(8.0),
        models: &["deepseek-r1:1.5b", "gemma:2b", "phi:2.7b", "phi3:3.8b"],
    },
    Tier {
        name: "Tier 2 (8GB-15GB)",
        min_gb: 8.0,
        max_gb: Some(16.0),
        models: &["phi3:3.8b", "gemma2:9b", "mistral:7b", "llama3.1:8b", "deepseek-r1:8b", "llava:7b"],
    },
    Tier {
        name: "Tier 3 (16GB-31GB)",
        min_gb: 16.0,
        max_gb: Some(32.0),
        models: &[
            "gemma2:9b",
            "mistral:7b",
            "phi4:14b",
            "deepseek-r1:8b",
            "deepseek-r1:14b",
            "llava:7b",
            "llava:13b",
        ],
    },
    Tier {
        name: "Tier 4 (32GB+)",
        min_gb: 32.0,
        max_gb: None,
        models: &["phi4:14b", "deepseek-r1:14b", "deepseek-r1:32b"],
    },
];

pub fn tier_for(total_memory_gb: f64) -> Option<&'static Tier> {
    TIERS.iter().find(|t| t.contains(total_memory_gb))
}

/// Tier number, 1-based; 0 when below the lowest band.
pub fn tier_index(total_memory_gb: f64) -> usize {
    TIERS
        .iter()
        .position(|t| t.contains(total_memory_gb))
        .map_or(0, |i| i + 1)
}

pub fn find_model(name: &str) -> Option<&'static ModelDescriptor> {
    CATALOG.iter().find(|m| m.name == name)
}

/// Models of the tier matching `total_memory_gb`, best first.
pub fn recommended_for_ram(total_memory_gb: f64, count: usize) -> Vec<&'static ModelDescriptor> {
    tier_for(total_memory_gb)
        .map(|t| t.descriptors().into_iter().take(count).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredModel {
    pub model: ModelDescriptor,
    pub score: f64,
}

pub fn score_model(profile: &SystemProfile, model: &ModelDescriptor, effective_gb: f64) -> f64 {
    let mut score = 100.0 - model.priority as f64;

    if profile.has_cuda() && model.accelerator_optimized {
        score += 50.0;
    } else if profile.has_accelerator() && model.accelerator_optimized {
        score += 20.0;
    }

    if !profile.has_accelerator() && model.cpu_optimized {
        score += 30.0;
    }

    if profile.is_apple_silicon() && model.cpu_optimized {
        score += 15.0;
    }

    let utilization = model.memory_requirement_gb / effective_gb;
    if (0.5..=0.8).contains(&utilization) {
        score += 10.0;
    } else if utilization < 0.3 {
        score -= 10.0;
    }

    score + model.memory_requirement_gb.ln() * 5.0
}

/// Rank `catalog` entries that fit into effective memory for this host.
pub fn rank(profile: &SystemProfile, catalog: &[ModelDescriptor], count: usize) -> Vec<ScoredModel> {
    let effective = profile.effective_memory_gb();

    let mut scored: Vec<ScoredModel> = catalog
        .iter()
        .filter(|m| m.memory_requirement_gb <= effective)
        .map(|m| ScoredModel {
            model: *m,
            score: score_model(profile, m, effective),
        })
        .collect();

    // sort_by is stable: equal score and priority keep catalog order
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.model.priority.cmp(&b.model.priority))
    });
    scored.truncate(count);
    log::debug!(
        "[tiers] ranked {} of {} catalog entries (effective {:.1}GB)",
        scored.len(),
        catalog.len(),
        effective
    );
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::tests::{cuda_gpu, profile};

    // ── tier_for ──

    #[test]
    fn test_tier_for_bands() {
        assert_eq!(tier_for(20.0).unwrap().name, "Tier 3 (16GB-31GB)");
        assert_eq!(tier_for(4.0).unwrap().name, "Tier 1 (4GB-7GB)");
        assert_eq!(tier_for(7.9).unwrap().name, "Tier 1 (4GB-7GB)");
        assert_eq!(tier_for(15.6).unwrap().name, "Tier 2 (8GB-15GB)");
        assert_eq!(tier_for(128.0).unwrap().name, "Tier 4 (32GB+)");
        assert!(tier_for(3.9).is_none());
    }

    #[test]
    fn test_exactly_one_band_matches() {
        for gb in [4.0, 6.5, 8.0, 12.0, 16.0, 31.9, 32.0, 64.0] {
            assert_eq!(TIERS.iter().filter(|t| t.contains(gb)).count(), 1, "{}GB", gb);
        }
        assert_eq!(tier_index(2.0), 0);
        assert_eq!(tier_index(20.0), 3);
    }

    #[test]
    fn test_tier_models_resolve_in_catalog() {
        for tier in TIERS {
            assert_eq!(tier.descriptors().len(), tier.models.len(), "{}", tier.name);
        }
        let names: Vec<_> = recommended_for_ram(10.0, 2).iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["phi3:3.8b", "gemma2:9b"]);
        assert!(recommended_for_ram(2.0, 3).is_empty());
    }

    #[test]
    fn test_catalog_names_unique() {
        for (i, m) in CATALOG.iter().enumerate() {
            assert!(CATALOG[i + 1..].iter().all(|o| o.name != m.name), "{}", m.name);
        }
    }

    // ── rank ──

    #[test]
    fn test_rank_excludes_models_over_effective_memory() {
        let entry = ModelDescriptor {
            name: "big:5b",
            priority: 1,
            description: "",
            memory_requirement_gb: 5.0,
            accelerator_optimized: false,
            cpu_optimized: true,
            quantization: "Q4_0",
        };
        // available 6GB => effective 4GB
        let p = profile(6.0, vec![]);
        assert!(rank(&p, &[entry], 5).is_empty());
    }

    #[test]
    fn test_rank_never_exceeds_effective_memory() {
        for available in [3.0, 6.0, 9.5, 20.0, 64.0] {
            let p = profile(available, vec![]);
            for s in rank(&p, CATALOG, CATALOG.len()) {
                assert!(s.model.memory_requirement_gb <= p.effective_memory_gb());
            }
        }
    }

    #[test]
    fn test_rank_sorted_by_score() {
        let p = profile(24.0, vec![cuda_gpu(8192)]);
        let ranked = rank(&p, CATALOG, CATALOG.len());
        assert!(!ranked.is_empty());
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_rank_prefers_accelerator_optimized_on_cuda() {
        let base = ModelDescriptor {
            name: "plain:7b",
            priority: 1,
            description: "",
            memory_requirement_gb: 4.0,
            accelerator_optimized: false,
            cpu_optimized: false,
            quantization: "Q4_0",
        };
        let optimized = ModelDescriptor {
            name: "fast:7b",
            accelerator_optimized: true,
            ..base
        };
        let p = profile(16.0, vec![cuda_gpu(12288)]);
        let ranked = rank(&p, &[base, optimized], 2);
        assert_eq!(ranked[0].model.name, "fast:7b");
        assert!((ranked[0].score - ranked[1].score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_rank_score_components() {
        let entry = ModelDescriptor {
            name: "cpu:3b",
            priority: 4,
            description: "",
            memory_requirement_gb: 3.0,
            accelerator_optimized: false,
            cpu_optimized: true,
            quantization: "Q4_0",
        };
        // effective 4GB, utilization 0.75
        let p = profile(6.0, vec![]);
        let ranked = rank(&p, &[entry], 1);
        let expected = 96.0 + 30.0 + 10.0 + 3.0f64.ln() * 5.0;
        assert!((ranked[0].score - expected).abs() < 1e-9);

        let mut apple = profile(6.0, vec![]);
        apple.os = "macos".into();
        apple.architecture = "arm64".into();
        let ranked = rank(&apple, &[entry], 1);
        assert!((ranked[0].score - expected - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_rank_tie_break_by_priority() {
        let a = ModelDescriptor {
            name: "a",
            priority: 1,
            description: "",
            memory_requirement_gb: 2.0,
            accelerator_optimized: false,
            cpu_optimized: false,
            quantization: "Q4_0",
        };
        // 100 - 31 + 30 (cpu bonus) == 100 - 1
        let b = ModelDescriptor {
            name: "b",
            priority: 31,
            cpu_optimized: true,
            ..a
        };
        let p = profile(20.0, vec![]);
        let ranked = rank(&p, &[b, a], 2);
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].model.name, "a");
        assert_eq!(ranked[1].model.name, "b");

        // equal score and priority keep input order
        let c = ModelDescriptor { name: "c", ..a };
        let ranked = rank(&p, &[c, a], 2);
        assert_eq!(ranked[0].model.name, "c");
    }

    #[test]
    fn test_rank_empty_inputs() {
        let p = profile(16.0, vec![]);
        assert!(rank(&p, &[], 3).is_empty());
        assert!(rank(&p, CATALOG, 0).is_empty());
        let starved = profile(1.0, vec![]);
        assert!(rank(&starved, CATALOG, 3).is_empty());
    }

    #[test]
    fn test_rank_truncates_to_count() {
        let p = profile(64.0, vec![cuda_gpu(24576)]);
        assert_eq!(rank(&p, CATALOG, 3).len(), 3);
    }
}
