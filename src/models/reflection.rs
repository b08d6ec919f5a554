use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    CitationOutOfBounds,
    MissingCitation,
    UncitedPaper,
    LowEntailment,
    Structural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RetryTarget {
    Writer,
    Retriever,
}

impl Default for RetryTarget {
    fn default() -> Self {
        RetryTarget::Writer
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReflectionEntry {
    pub error_category: ErrorCategory,
    pub error_detail: String,
    pub fix_strategy: String,
    pub fixable_by_writer: bool,
}

/// Structured output of the reflection agent, requested only when
/// `qa_errors` is non-empty (§4.5.6).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Reflection {
    pub entries: Vec<ReflectionEntry>,
    pub should_retry: bool,
    #[serde(default)]
    pub retry_target: RetryTarget,
    pub summary: String,
}
