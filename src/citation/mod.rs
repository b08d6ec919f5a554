//! Citation verification pipeline (C7, §4.7): batched claim extraction,
//! bounded-concurrency entailment labeling, optional vector-store-backed
//! evidence retrieval.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::adapters::VectorStoreAdapter;
use crate::agents::{AgentError, ClaimVerificationPipeline};
use crate::errors::ClaimPipelineError;
use crate::llm::{ChatMessage, ChatRole, CompletionRequest, LmAdapter};
use crate::models::{
    Claim, ClaimBatch, ClaimVerificationRecord, ClaimVerificationSummary, Draft, EntailmentJudgment, EntailmentLabel,
    PaperMetadata,
};
use crate::router::TaskType;

/// Abstract text is truncated to this many characters when no vector store
/// is configured (§4.7 step 3 fallback).
const ABSTRACT_FALLBACK_CHARS: usize = 1000;
/// Up to this many retrieved chunks are concatenated as evidence when a
/// vector store is configured.
const MAX_EVIDENCE_CHUNKS: usize = 3;
const EVIDENCE_SCORE_THRESHOLD: f32 = 0.7;
const EVIDENCE_TOP_K: usize = 5;

pub struct CitationPipeline {
    lm: Arc<LmAdapter>,
    claim_verification_semaphore: Arc<Semaphore>,
    claim_batch_size: usize,
    vector_store: Option<Arc<dyn VectorStoreAdapter>>,
}

impl CitationPipeline {
    pub fn new(
        lm: Arc<LmAdapter>,
        claim_verification_semaphore: Arc<Semaphore>,
        claim_batch_size: usize,
        vector_store: Option<Arc<dyn VectorStoreAdapter>>,
    ) -> Self {
        Self {
            lm,
            claim_verification_semaphore,
            claim_batch_size,
            vector_store,
        }
    }

    /// Splits the draft's sections into `claim_batch_size`-sized groups and
    /// extracts claims per group. A multi-section group is extracted with a
    /// single batched call; if that call fails, or for single-section groups,
    /// each section is extracted individually instead (§4.7 step 1, falling
    /// back to a per-section call on batch failure).
    async fn extract_claims(&self, draft: &Draft) -> Vec<Claim> {
        let cited_sections: Vec<(usize, &crate::models::DraftSection)> = draft
            .sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.content.contains("{cite:"))
            .collect();
        let chunks: Vec<Vec<(usize, &crate::models::DraftSection)>> =
            cited_sections.chunks(self.claim_batch_size).map(|c| c.to_vec()).collect();

        let futures = chunks.into_iter().map(|group| async move {
            if group.len() == 1 {
                let (idx, section) = group[0];
                return self.extract_claims_for_section(idx, section).await;
            }

            match self.extract_claim_batch(&group).await {
                Some(claims) => claims,
                None => {
                    let per_section = group.iter().map(|(idx, s)| self.extract_claims_for_section(*idx, s));
                    join_all(per_section).await.into_iter().flatten().collect()
                }
            }
        });

        join_all(futures).await.into_iter().flatten().collect()
    }

    /// A single combined call covering every section in `group`. Returns
    /// `None` on LM failure so the caller can fall back to per-section calls.
    /// Each returned claim's id is keyed to the section it actually came from
    /// via `ExtractedClaim::section_index`, not the group's first section.
    async fn extract_claim_batch(&self, group: &[(usize, &crate::models::DraftSection)]) -> Option<Vec<Claim>> {
        let combined = group
            .iter()
            .enumerate()
            .map(|(local_idx, (_, s))| format!("Section {local_idx} — {}:\n{}", s.heading, s.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let system = "Extract the atomic factual claims from the following sections. For each \
            claim, list the {cite:N} citation indices it relies on (as plain integers, without \
            braces), and report section_index as the 0-based position of the source section \
            among the sections given above (the first section is 0)."
            .to_string();
        let result = self
            .lm
            .structured_completion::<ClaimBatch>(CompletionRequest {
                messages: vec![
                    ChatMessage {
                        role: ChatRole::System,
                        content: system,
                    },
                    ChatMessage {
                        role: ChatRole::User,
                        content: combined,
                    },
                ],
                temperature: 0.1,
                max_tokens: Some(1200),
                model_id: None,
                task_type: Some(TaskType::Qa),
                token_callback: None,
            })
            .await;

        let (batch, _usage) = result.ok()?;
        let mut counters = vec![0usize; group.len()];
        Some(
            batch
                .claims
                .into_iter()
                .map(|c| {
                    let local_idx = c.section_index.min(group.len().saturating_sub(1));
                    let abs_idx = group[local_idx].0;
                    let seq = counters[local_idx];
                    counters[local_idx] += 1;
                    Claim {
                        claim_id: format!("s{abs_idx}_c{seq}"),
                        text: c.text,
                        citation_indices: c.citation_indices,
                    }
                })
                .collect(),
        )
    }

    /// Extracts claims from a single section via its own LM call (§4.7 step 1
    /// per-section fallback).
    async fn extract_claims_for_section(&self, idx: usize, section: &crate::models::DraftSection) -> Vec<Claim> {
        let system = "Extract the atomic factual claims from the following section. For each \
            claim, list the {cite:N} citation indices it relies on (as plain integers, without \
            braces)."
            .to_string();
        let user = format!("Section {idx} — {}:\n{}", section.heading, section.content);
        let result = self
            .lm
            .structured_completion::<ClaimBatch>(CompletionRequest {
                messages: vec![
                    ChatMessage {
                        role: ChatRole::System,
                        content: system,
                    },
                    ChatMessage {
                        role: ChatRole::User,
                        content: user,
                    },
                ],
                temperature: 0.1,
                max_tokens: Some(600),
                model_id: None,
                task_type: Some(TaskType::Qa),
                token_callback: None,
            })
            .await;

        match result {
            Ok((batch, _usage)) => batch
                .claims
                .into_iter()
                .enumerate()
                .map(|(i, c)| Claim {
                    claim_id: format!("s{idx}_c{i}"),
                    text: c.text,
                    citation_indices: c.citation_indices,
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Evidence text for a (claim, paper) pair: vector-store retrieval when
    /// configured, else the paper's abstract truncated to
    /// `ABSTRACT_FALLBACK_CHARS` (§4.7 step 3).
    async fn evidence_for(&self, claim: &Claim, paper: &PaperMetadata) -> String {
        if let Some(store) = &self.vector_store {
            let fake_embedding = vec![0.0f32; 8];
            if let Ok(hits) = store
                .search(&fake_embedding, EVIDENCE_TOP_K, Some(EVIDENCE_SCORE_THRESHOLD), Some(&paper.paper_id))
                .await
            {
                let texts: Vec<String> = hits
                    .into_iter()
                    .filter(|h| h.score >= EVIDENCE_SCORE_THRESHOLD)
                    .take(MAX_EVIDENCE_CHUNKS)
                    .filter_map(|h| h.payload.get("text").and_then(|v| v.as_str()).map(|s| s.to_string()))
                    .collect();
                if !texts.is_empty() {
                    return texts.join("\n---\n");
                }
            }
        }
        let _ = claim;
        paper
            .abstract_text
            .as_deref()
            .map(|a| a.chars().take(ABSTRACT_FALLBACK_CHARS).collect())
            .unwrap_or_default()
    }

    async fn judge_one(&self, claim: Claim, paper: PaperMetadata) -> Result<ClaimVerificationRecord, ClaimPipelineError> {
        let _permit = self
            .claim_verification_semaphore
            .acquire()
            .await
            .expect("semaphore never closed");

        let evidence = self.evidence_for(&claim, &paper).await;
        let system = "Judge whether the evidence entails the claim. Respond with label \
            (entails, insufficient, or contradicts), a confidence in [0,1], the supporting \
            evidence snippet, and a brief rationale."
            .to_string();
        let user = format!("Claim: {}\n\nEvidence from \"{}\":\n{evidence}", claim.text, paper.title);

        let result = self
            .lm
            .structured_completion::<EntailmentJudgment>(CompletionRequest {
                messages: vec![
                    ChatMessage {
                        role: ChatRole::System,
                        content: system,
                    },
                    ChatMessage {
                        role: ChatRole::User,
                        content: user,
                    },
                ],
                temperature: 0.0,
                max_tokens: Some(400),
                model_id: None,
                task_type: Some(TaskType::Qa),
                token_callback: None,
            })
            .await;

        match result {
            Ok((judgment, _usage)) => Ok(ClaimVerificationRecord {
                claim_id: claim.claim_id,
                paper_id: paper.paper_id,
                label: judgment.label,
                confidence: judgment.confidence,
                evidence_snippet: judgment.evidence_snippet,
                rationale: judgment.rationale,
            }),
            Err(e) => Err(ClaimPipelineError::VerificationFailed {
                claim_id: claim.claim_id,
                citation_index: 0,
                detail: e.to_string(),
            }),
        }
    }

    pub async fn run(&self, draft: &Draft, papers: &[PaperMetadata]) -> ClaimVerificationSummary {
        let claims = self.extract_claims(draft).await;
        let total_claims = claims.len();

        let mut units = Vec::new();
        for claim in claims {
            for idx in &claim.citation_indices {
                if let Some(paper) = papers.get(*idx as usize - 1) {
                    units.push((claim.clone(), paper.clone()));
                }
            }
        }

        let results = join_all(units.into_iter().map(|(claim, paper)| self.judge_one(claim, paper))).await;

        let mut summary = ClaimVerificationSummary {
            total_claims,
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(record) => {
                    summary.total_verifications += 1;
                    match record.label {
                        EntailmentLabel::Entails => summary.entails += 1,
                        EntailmentLabel::Insufficient => {
                            summary.insufficient += 1;
                            summary.failed.push(format!(
                                "claim {} was not entailed by paper {} (insufficient): {}",
                                record.claim_id, record.paper_id, record.rationale
                            ));
                        }
                        EntailmentLabel::Contradicts => {
                            summary.contradicts += 1;
                            summary.failed.push(format!(
                                "claim {} contradicts paper {}: {}",
                                record.claim_id, record.paper_id, record.rationale
                            ));
                        }
                    }
                }
                Err(e) => {
                    summary.total_verifications += 1;
                    summary.insufficient += 1;
                    summary.failed.push(e.to_string());
                }
            }
        }
        summary
    }
}

#[async_trait]
impl ClaimVerificationPipeline for CitationPipeline {
    async fn verify(&self, draft: &Draft, papers: &[PaperMetadata]) -> Result<ClaimVerificationSummary, AgentError> {
        Ok(self.run(draft, papers).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CostLedger, LmSemaphores, MockLmBackend};
    use crate::models::{DraftSection, SourceTag};
    use crate::router::{CostTier, ModelConfig, ModelRegistry};

    fn registry() -> Arc<ModelRegistry> {
        Arc::new(ModelRegistry::new(vec![ModelConfig {
            model_id: "mock:model".into(),
            provider: "mock".into(),
            model_name: "mock-model".into(),
            api_base: None,
            api_key_env: None,
            supports_json_mode: true,
            supports_structured_output: true,
            supports_long_context: true,
            max_output_tokens: 4000,
            is_local: true,
            cost_tier: CostTier::Low,
            reasoning_score: 5.0,
            creativity_score: 5.0,
            latency_score: 5.0,
            enabled: true,
        }]))
    }

    fn paper(id: &str) -> PaperMetadata {
        let mut p = PaperMetadata::new(id, format!("Title {id}"), SourceTag::Arxiv);
        p.abstract_text = Some("This paper shows X improves Y significantly.".to_string());
        p
    }

    #[tokio::test]
    async fn extracts_and_verifies_claims_against_cited_papers() {
        let backend = Arc::new(MockLmBackend::with_queue(vec![
            r#"{"claims": [{"text": "X improves Y", "citation_indices": [1]}]}"#.to_string(),
            r#"{"label": "entails", "confidence": 0.9, "evidence_snippet": "X improves Y", "rationale": "direct support"}"#
                .to_string(),
        ]));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let pipeline = CitationPipeline::new(lm, Arc::new(Semaphore::new(2)), 3, None);
        let draft = Draft {
            title: "T".into(),
            sections: vec![DraftSection {
                heading: "Intro".into(),
                content: "X improves Y {cite:1}".into(),
                cited_paper_ids: vec![],
            }],
        };
        let summary = pipeline.run(&draft, &[paper("p1")]).await;
        assert_eq!(summary.total_claims, 1);
        assert_eq!(summary.total_verifications, 1);
        assert_eq!(summary.entails, 1);
        assert!((summary.entailment_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn multi_section_batch_attributes_claims_to_true_section() {
        let backend = Arc::new(MockLmBackend::with_queue(vec![r#"{"claims": [
            {"text": "X improves Y", "citation_indices": [1], "section_index": 0},
            {"text": "Z is robust", "citation_indices": [2], "section_index": 1}
        ]}"#
        .to_string()]));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let pipeline = CitationPipeline::new(lm, Arc::new(Semaphore::new(2)), 3, None);
        let draft = Draft {
            title: "T".into(),
            sections: vec![
                DraftSection {
                    heading: "Intro".into(),
                    content: "X improves Y {cite:1}".into(),
                    cited_paper_ids: vec![],
                },
                DraftSection {
                    heading: "Related".into(),
                    content: "Z is robust {cite:2}".into(),
                    cited_paper_ids: vec![],
                },
            ],
        };
        let claims = pipeline.extract_claims(&draft).await;
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].claim_id, "s0_c0");
        assert_eq!(claims[1].claim_id, "s1_c0");
    }

    #[tokio::test]
    async fn batch_failure_falls_back_to_per_section_calls() {
        let backend = Arc::new(MockLmBackend::with_queue(vec![
            "not valid json".to_string(),
            r#"{"claims": [{"text": "X improves Y", "citation_indices": [1]}]}"#.to_string(),
            r#"{"claims": [{"text": "Z is robust", "citation_indices": [2]}]}"#.to_string(),
        ]));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let pipeline = CitationPipeline::new(lm, Arc::new(Semaphore::new(2)), 3, None);
        let draft = Draft {
            title: "T".into(),
            sections: vec![
                DraftSection {
                    heading: "Intro".into(),
                    content: "X improves Y {cite:1}".into(),
                    cited_paper_ids: vec![],
                },
                DraftSection {
                    heading: "Related".into(),
                    content: "Z is robust {cite:2}".into(),
                    cited_paper_ids: vec![],
                },
            ],
        };
        let mut claims = pipeline.extract_claims(&draft).await;
        claims.sort_by(|a, b| a.claim_id.cmp(&b.claim_id));
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].claim_id, "s0_c0");
        assert_eq!(claims[1].claim_id, "s1_c0");
    }

    #[tokio::test]
    async fn no_claims_yields_empty_summary_with_full_ratio() {
        let backend = Arc::new(MockLmBackend::with_fixed_response(r#"{"claims": []}"#.to_string()));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let pipeline = CitationPipeline::new(lm, Arc::new(Semaphore::new(2)), 3, None);
        let draft = Draft {
            title: "T".into(),
            sections: vec![DraftSection {
                heading: "Intro".into(),
                content: "no citations here".into(),
                cited_paper_ids: vec![],
            }],
        };
        let summary = pipeline.run(&draft, &[paper("p1")]).await;
        assert_eq!(summary.total_claims, 0);
        assert!((summary.entailment_ratio() - 1.0).abs() < f64::EPSILON);
    }
}
