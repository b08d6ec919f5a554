//! Process-wide, append-only cost ledger (§4.3 side effect, §5 "Cost
//! ledger"). Ported in meaning from `backend/evaluation/cost_tracker.py`:
//! an exact-match pricing table, a substring-longest-match fallback, and a
//! conservative default price for unknown models.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::router::TaskType;

/// USD per 1M tokens, `(input, output)`.
const PRICING_TABLE: &[(&str, f64, f64)] = &[
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4o-mini", 0.15, 0.60),
    ("deepseek-chat", 0.27, 1.10),
];

/// Conservative high-tier default when a model isn't in the pricing table,
/// matching the original's `_DEFAULT_PRICE`.
const DEFAULT_PRICE: (f64, f64) = (2.50, 10.00);

pub fn estimate_cost_usd(model_name: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let (in_price, out_price) = PRICING_TABLE
        .iter()
        .find(|(name, _, _)| *name == model_name)
        .map(|(_, i, o)| (*i, *o))
        .or_else(|| {
            // Substring-longest-match: the model name may carry a date suffix
            // or vendor prefix the exact table doesn't enumerate.
            PRICING_TABLE
                .iter()
                .filter(|(name, _, _)| model_name.contains(name))
                .max_by_key(|(name, _, _)| name.len())
                .map(|(_, i, o)| (*i, *o))
        })
        .unwrap_or(DEFAULT_PRICE);

    (prompt_tokens as f64 / 1_000_000.0) * in_price
        + (completion_tokens as f64 / 1_000_000.0) * out_price
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub model: String,
    pub task_type: Option<TaskType>,
    pub cost_usd: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_cost_usd: f64,
    pub call_count: usize,
}

/// Test-resettable, process-wide ledger (Design Note §9 "Global
/// singletons": modeled as an explicitly injected collaborator rather than
/// a bare `static`, so a caller can hold multiple independent ledgers — one
/// per test, or one per process in production).
#[derive(Default)]
pub struct CostLedger {
    records: RwLock<Vec<UsageRecord>>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, model: &str, task_type: Option<TaskType>, prompt_tokens: u64, completion_tokens: u64) {
        let cost_usd = estimate_cost_usd(model, prompt_tokens, completion_tokens);
        self.records.write().unwrap().push(UsageRecord {
            prompt_tokens,
            completion_tokens,
            model: model.to_string(),
            task_type,
            cost_usd,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Non-blocking snapshot; aggregation computed on read (§5).
    pub fn summary(&self) -> CostSummary {
        let records = self.records.read().unwrap();
        let mut summary = CostSummary::default();
        for r in records.iter() {
            summary.total_prompt_tokens += r.prompt_tokens;
            summary.total_completion_tokens += r.completion_tokens;
            summary.total_cost_usd += r.cost_usd;
            summary.call_count += 1;
        }
        summary
    }

    /// Per-task-type cost/efficiency breakdown, grounded in
    /// `get_cost_efficiency_from_tracking()`.
    pub fn summary_by_task_type(&self) -> Vec<(Option<TaskType>, CostSummary)> {
        let records = self.records.read().unwrap();
        let mut buckets: Vec<(Option<TaskType>, CostSummary)> = Vec::new();
        for r in records.iter() {
            let bucket = buckets.iter_mut().find(|(t, _)| *t == r.task_type);
            let entry = if let Some(found) = bucket {
                &mut found.1
            } else {
                buckets.push((r.task_type, CostSummary::default()));
                &mut buckets.last_mut().unwrap().1
            };
            entry.total_prompt_tokens += r.prompt_tokens;
            entry.total_completion_tokens += r.completion_tokens;
            entry.total_cost_usd += r.cost_usd;
            entry.call_count += 1;
        }
        buckets
    }

    pub fn reset(&self) {
        self.records.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_pricing() {
        let cost = estimate_cost_usd("gpt-4o", 1_000_000, 0);
        assert!((cost - 2.50).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_falls_back_to_default_price() {
        let cost = estimate_cost_usd("some-unlisted-model", 1_000_000, 0);
        assert!((cost - DEFAULT_PRICE.0).abs() < 1e-9);
    }

    #[test]
    fn substring_match_finds_dated_model_name() {
        let cost = estimate_cost_usd("gpt-4o-mini-2024-07-18", 1_000_000, 0);
        assert!((cost - 0.15).abs() < 1e-9);
    }

    #[test]
    fn ledger_aggregates_and_resets() {
        let ledger = CostLedger::new();
        ledger.record("gpt-4o", Some(TaskType::Planning), 100, 50);
        ledger.record("gpt-4o-mini", Some(TaskType::Qa), 200, 100);
        let summary = ledger.summary();
        assert_eq!(summary.call_count, 2);
        assert_eq!(summary.total_prompt_tokens, 300);
        ledger.reset();
        assert_eq!(ledger.summary().call_count, 0);
    }

    #[test]
    fn summary_by_task_type_buckets_independently() {
        let ledger = CostLedger::new();
        ledger.record("gpt-4o", Some(TaskType::Planning), 100, 50);
        ledger.record("gpt-4o", Some(TaskType::Planning), 100, 50);
        ledger.record("gpt-4o-mini", Some(TaskType::Qa), 200, 100);
        let by_type = ledger.summary_by_task_type();
        assert_eq!(by_type.len(), 2);
    }
}
