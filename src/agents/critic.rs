//! Critic (C5.5, §4.5.5) and the seam to the citation verification pipeline
//! (C7, §4.7).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ClaimVerificationSummary, Draft, PaperMetadata, PartialStateUpdate, SessionState};

use super::{Agent, AgentError};

#[async_trait]
pub trait Critic: Send + Sync {
    async fn review(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError>;
}

/// The seam C7 implements; kept separate so the critic can be unit-tested
/// without a real verification pipeline (§4.7, §6 "out of scope": any
/// particular NLI model).
#[async_trait]
pub trait ClaimVerificationPipeline: Send + Sync {
    async fn verify(&self, draft: &Draft, papers: &[PaperMetadata]) -> Result<ClaimVerificationSummary, AgentError>;
}

static CITE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{cite:(\d+)\}").unwrap());

fn section_indices(content: &str) -> Vec<u32> {
    CITE_RE.captures_iter(content).filter_map(|c| c[1].parse::<u32>().ok()).collect()
}

/// Three structural/citation rule checks (§4.5.5), evaluated against
/// `state.citation_index_base()`'s length as the valid citation range (Open
/// Question ii):
/// 1. every `{cite:N}` in every section must be in `1..=valid_range`;
/// 2. every section must carry at least one citation placeholder;
/// 3. every index in `1..=valid_range` must appear in at least one section.
fn rule_check_errors(draft: &Draft, valid_range: usize) -> Vec<String> {
    let mut errors = Vec::new();

    if draft.title.trim().is_empty() {
        errors.push("structural: draft title is empty".to_string());
    }
    if draft.sections.is_empty() {
        errors.push("structural: draft has no sections".to_string());
    }

    let mut out_of_range = HashSet::new();
    let mut seen_indices: HashSet<u32> = HashSet::new();
    for section in &draft.sections {
        if section.content.trim().is_empty() {
            errors.push(format!("structural: section \"{}\" has empty content", section.heading));
        }

        let indices = section_indices(&section.content);
        if indices.is_empty() {
            errors.push(format!("missing_citation: section \"{}\" cites no papers", section.heading));
        }
        for n in indices {
            if n == 0 || n as usize > valid_range {
                out_of_range.insert(n);
            } else {
                seen_indices.insert(n);
            }
        }
    }
    for n in out_of_range {
        errors.push(format!("citation_out_of_bounds: {{cite:{n}}} is outside 1..={valid_range}"));
    }

    for n in 1..=valid_range as u32 {
        if !seen_indices.contains(&n) {
            errors.push(format!("uncited_paper: paper [{n}] is never cited in any section"));
        }
    }

    errors
}

pub struct DefaultCritic {
    verification: Option<Arc<dyn ClaimVerificationPipeline>>,
    min_entailment_ratio: f64,
}

impl DefaultCritic {
    pub fn new(verification: Option<Arc<dyn ClaimVerificationPipeline>>, min_entailment_ratio: f64) -> Self {
        Self {
            verification,
            min_entailment_ratio,
        }
    }
}

#[async_trait]
impl Critic for DefaultCritic {
    async fn review(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        let Some(draft) = &state.final_draft else {
            return Ok(PartialStateUpdate {
                qa_errors: Some(vec!["structural: no draft was produced".to_string()]),
                retry_count_increment: Some(1),
                ..PartialStateUpdate::new()
            }
            .log("critic: no draft to review")
            .handoff("writer", "critic"));
        };

        let valid_range = state.citation_index_base().len();
        let rule_errors = rule_check_errors(draft, valid_range);
        if !rule_errors.is_empty() {
            let summary = format!("critic: rule checks failed ({} issue(s))", rule_errors.len());
            return Ok(PartialStateUpdate {
                qa_errors: Some(rule_errors),
                retry_count_increment: Some(1),
                ..PartialStateUpdate::new()
            }
            .log(summary)
            .handoff("writer", "critic"));
        }

        let papers = state.citation_index_base();
        if let Some(pipeline) = &self.verification {
            if papers.is_empty() {
                return Ok(PartialStateUpdate {
                    qa_errors: Some(Vec::new()),
                    ..PartialStateUpdate::new()
                }
                .log("critic: passed (no papers to verify claims against)")
                .handoff("writer", "critic"));
            }

            let summary = pipeline.verify(draft, papers).await?;
            if summary.entailment_ratio() < self.min_entailment_ratio {
                let failed: Vec<String> = summary.failed.iter().take(3).cloned().collect();
                return Ok(PartialStateUpdate {
                    qa_errors: Some(failed),
                    retry_count_increment: Some(1),
                    claim_verification: Some(Some(summary)),
                    ..PartialStateUpdate::new()
                }
                .log("critic: claim verification failed entailment ratio threshold")
                .handoff("writer", "critic"));
            }

            Ok(PartialStateUpdate {
                qa_errors: Some(Vec::new()),
                claim_verification: Some(Some(summary)),
                ..PartialStateUpdate::new()
            }
            .log("critic: passed rule checks and claim verification")
            .handoff("writer", "critic"))
        } else {
            Ok(PartialStateUpdate {
                qa_errors: Some(Vec::new()),
                ..PartialStateUpdate::new()
            }
            .log("critic: passed rule checks (claim verification disabled)")
            .handoff("writer", "critic"))
        }
    }
}

#[async_trait]
impl Agent for DefaultCritic {
    async fn run(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        self.review(state).await
    }
}
