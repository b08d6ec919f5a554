use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntailmentLabel {
    Entails,
    Insufficient,
    Contradicts,
}

/// One atomic claim extracted from a section, still carrying its `{cite:N}`
/// markers (§4.7 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    /// `s{section_index}_c{i}`
    pub claim_id: String,
    pub text: String,
    pub citation_indices: Vec<u32>,
}

/// LM output shape for a batch of claims extracted from a group of sections.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClaimBatch {
    pub claims: Vec<ExtractedClaim>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedClaim {
    pub text: String,
    pub citation_indices: Vec<u32>,
    /// 0-based position, among the sections given in the prompt, of the
    /// section this claim was drawn from. Absent/out-of-range collapses to 0.
    #[serde(default)]
    pub section_index: usize,
}

/// LM output shape for a single (claim, citation) entailment judgment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntailmentJudgment {
    pub label: EntailmentLabel,
    pub confidence: f32,
    pub evidence_snippet: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimVerificationRecord {
    pub claim_id: String,
    pub paper_id: String,
    pub label: EntailmentLabel,
    pub confidence: f32,
    pub evidence_snippet: String,
    pub rationale: String,
}

/// Summary written to session state by the critic after a verification pass
/// (§3, `claim_verification`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimVerificationSummary {
    pub total_claims: usize,
    pub total_verifications: usize,
    pub entails: usize,
    pub insufficient: usize,
    pub contradicts: usize,
    #[serde(default)]
    pub failed: Vec<String>,
}

impl ClaimVerificationSummary {
    pub fn entailment_ratio(&self) -> f64 {
        if self.total_verifications == 0 {
            return 1.0;
        }
        self.entails as f64 / self.total_verifications as f64
    }
}
