//! Model router (C2, SPEC_FULL.md §4.2).

pub mod registry_load;

use serde::{Deserialize, Serialize};

pub use registry_load::load_registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Low,
    Medium,
    High,
}

impl CostTier {
    /// `cost_rank` used by the scoring formula: low=1, medium=2, high=3.
    fn rank(&self) -> u8 {
        match self {
            CostTier::Low => 1,
            CostTier::Medium => 2,
            CostTier::High => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    pub provider: String,
    pub model_name: String,
    pub api_base: Option<String>,
    pub api_key_env: Option<String>,
    pub supports_json_mode: bool,
    pub supports_structured_output: bool,
    pub supports_long_context: bool,
    pub max_output_tokens: u32,
    pub is_local: bool,
    pub cost_tier: CostTier,
    /// `[0, 10]`
    pub reasoning_score: f64,
    /// `[0, 10]`
    pub creativity_score: f64,
    /// `[0, 10]`
    pub latency_score: f64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Planning,
    Extraction,
    Writing,
    Qa,
    Reflection,
}

#[derive(Debug, Clone, Copy)]
pub struct TaskRequirement {
    pub needs_reasoning: bool,
    pub needs_structured_output: bool,
    pub needs_long_context: bool,
    pub prefers_creativity: bool,
    pub max_cost_tier: CostTier,
    pub latency_sensitive: bool,
}

impl TaskType {
    /// The authoritative per-task-type requirement table (SPEC_FULL.md §4.2.1,
    /// ported in meaning from `backend/llm/task_types.py::TASK_REQUIREMENTS`).
    pub fn requirement(&self) -> TaskRequirement {
        match self {
            TaskType::Planning => TaskRequirement {
                needs_reasoning: true,
                needs_structured_output: true,
                needs_long_context: false,
                prefers_creativity: false,
                max_cost_tier: CostTier::High,
                latency_sensitive: false,
            },
            TaskType::Extraction => TaskRequirement {
                needs_reasoning: false,
                needs_structured_output: true,
                needs_long_context: false,
                prefers_creativity: false,
                max_cost_tier: CostTier::Medium,
                latency_sensitive: true,
            },
            TaskType::Writing => TaskRequirement {
                needs_reasoning: true,
                needs_structured_output: false,
                needs_long_context: true,
                prefers_creativity: true,
                max_cost_tier: CostTier::High,
                latency_sensitive: false,
            },
            TaskType::Qa => TaskRequirement {
                needs_reasoning: true,
                needs_structured_output: true,
                needs_long_context: false,
                prefers_creativity: false,
                max_cost_tier: CostTier::Medium,
                latency_sensitive: false,
            },
            TaskType::Reflection => TaskRequirement {
                needs_reasoning: true,
                needs_structured_output: true,
                needs_long_context: false,
                prefers_creativity: false,
                max_cost_tier: CostTier::Medium,
                latency_sensitive: false,
            },
        }
    }
}

/// The registry: an id → config mapping plus an optional unconditional
/// override (§4.2 step 3).
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelConfig>,
    pub override_model_id: Option<String>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelConfig>) -> Self {
        Self {
            models,
            override_model_id: None,
        }
    }

    pub fn with_override(mut self, model_id: Option<String>) -> Self {
        self.override_model_id = model_id;
        self
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.model_id == model_id)
    }

    pub fn all(&self) -> &[ModelConfig] {
        &self.models
    }

    fn eligible(&self, req: &TaskRequirement) -> Vec<&ModelConfig> {
        self.models
            .iter()
            .filter(|m| m.enabled)
            .filter(|m| !req.needs_structured_output || m.supports_structured_output)
            .filter(|m| !req.needs_long_context || m.supports_long_context)
            .filter(|m| m.cost_tier <= req.max_cost_tier)
            .collect()
    }

    /// The weighted score from §4.2 step 2:
    /// `2·reasoning·needs_reasoning + 1.5·creativity·prefers_creativity + 1.5·latency·latency_sensitive + 0.8·(4−cost_rank)`.
    fn score(&self, m: &ModelConfig, req: &TaskRequirement) -> f64 {
        let mut s = 0.0;
        if req.needs_reasoning {
            s += 2.0 * m.reasoning_score;
        }
        if req.prefers_creativity {
            s += 1.5 * m.creativity_score;
        }
        if req.latency_sensitive {
            s += 1.5 * m.latency_score;
        }
        s += 0.8 * (4.0 - m.cost_tier.rank() as f64);
        s
    }

    /// Select a model for `task_type` (§4.2). Pure function of
    /// `(task_type, enabled registry, override)` — same inputs always yield
    /// the same output (Testable Properties, §8).
    pub fn select(&self, task_type: TaskType) -> Option<&ModelConfig> {
        if let Some(id) = &self.override_model_id
            && let Some(m) = self.get(id)
        {
            return Some(m);
        }
        let req = task_type.requirement();
        let mut candidates = self.eligible(&req);
        if candidates.is_empty() {
            return None;
        }
        // Stable sort on negated score keeps ties in registry (input) order,
        // matching "ties broken by input order" conventions used elsewhere
        // in this spec.
        candidates.sort_by(|a, b| {
            self.score(b, &req)
                .partial_cmp(&self.score(a, &req))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.into_iter().next()
    }

    /// The fallback chain: the full ranked list for `task_type`, with the
    /// chosen model moved to the head (§4.2 step 4).
    pub fn fallback_chain(&self, task_type: TaskType) -> Vec<String> {
        let req = task_type.requirement();
        let mut candidates = self.eligible(&req);
        candidates.sort_by(|a, b| {
            self.score(b, &req)
                .partial_cmp(&self.score(a, &req))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut chain: Vec<String> = candidates.iter().map(|m| m.model_id.clone()).collect();
        if let Some(selected) = self.select(task_type) {
            let id = selected.model_id.clone();
            chain.retain(|c| c != &id);
            chain.insert(0, id);
        }
        chain
    }
}
