//! Closed error taxonomy for component boundaries (§7). The scheduler and
//! agents surface these as tagged-union returns rather than letting
//! arbitrary errors cross component seams (Design Note, §9: "Failure
//! semantics").

use thiserror::Error;

/// Errors raised by the LM invocation adapter (C3).
#[derive(Debug, Error)]
pub enum LmError {
    /// Connection error, timeout, rate-limit, or 5xx — recovered locally by
    /// C3's retry discipline (≤4 attempts, jittered backoff).
    #[error("transient LM error: {0}")]
    Transient(String),

    /// JSON unparseable even after the repair parser, or schema-invalid.
    #[error("LM protocol error: {0}")]
    Protocol(String),

    /// The model echoed the schema definition instead of content.
    #[error("LM returned its own response schema instead of content")]
    ReturnedSchema,

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl LmError {
    /// Whether the retry loop in C3 should attempt another call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LmError::Transient(_))
    }
}

/// Errors raised by the retriever (C5.2) and scholarly source adapters.
#[derive(Debug, Error)]
#[error("source {source_tag} unavailable: {detail}")]
pub struct SourceUnavailable {
    pub source_tag: String,
    pub detail: String,
}

/// Per-paper extraction failure (C5.3) — logged and skipped, other papers proceed.
#[derive(Debug, Error)]
#[error("extraction failed for paper {paper_id}: {detail}")]
pub struct ExtractionFailed {
    pub paper_id: String,
    pub detail: String,
}

/// Per-section generation failure (C5.4) — substituted with a placeholder section.
#[derive(Debug, Error)]
#[error("section generation failed for \"{heading}\": {detail}")]
pub struct SectionGenerationFailed {
    pub heading: String,
    pub detail: String,
}

/// Per-unit claim pipeline failures (C7) — dropped from counts, others proceed.
#[derive(Debug, Error)]
pub enum ClaimPipelineError {
    #[error("claim extraction failed for section {section_index}: {detail}")]
    ExtractionFailed { section_index: usize, detail: String },

    #[error("claim verification failed for {claim_id} × citation {citation_index}: {detail}")]
    VerificationFailed {
        claim_id: String,
        citation_index: u32,
        detail: String,
    },
}

/// Raised by the critic (C5.5) when rule or semantic QA fails and a retry is
/// still within budget. Caught by the scheduler's reflection routing.
#[derive(Debug, Error)]
#[error("QA failed: {0}")]
pub struct QaFailed(pub String);

/// `retry_count` has reached `MAX_QA_RETRIES`; the graph terminates and
/// surfaces the last draft with warnings rather than retrying again.
#[derive(Debug, Error)]
#[error("QA retries exhausted after {retry_count} attempts")]
pub struct QaExhausted {
    pub retry_count: u32,
}

/// Raised by the control surface's `approve` operation (§6.1).
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("session {task_id} is not paused at extractor")]
    NotPausedAtExtractor { task_id: String },

    #[error("no candidate in session {task_id} matched the supplied paper ids")]
    NoMatchingApproval { task_id: String },
}

/// Raised when the whole-run deadline elapses (§4.6, §5). Already-written
/// checkpoints remain valid; the scheduler cancels only the in-flight node.
#[derive(Debug, Error)]
#[error("workflow timed out after {elapsed_secs}s (limit {limit_secs}s)")]
pub struct WorkflowTimeout {
    pub elapsed_secs: u64,
    pub limit_secs: u64,
}

/// The checkpoint store's own failure mode — surfaced, never silently
/// swallowed, since a lost checkpoint would violate invariant 6 (§3).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no checkpoint found for session {0}")]
    NotFound(String),

    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint (de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
