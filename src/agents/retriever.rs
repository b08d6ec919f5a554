//! Retriever (C5.2, §4.5.2).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::adapters::ScholarSourceRegistry;
use crate::models::{PaperMetadata, PartialStateUpdate, SessionState, SourceTag};
use crate::resilience::SourceFailureTracker;

use super::{Agent, AgentError};

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError>;
}

/// Fallback per-dispatch result limit when a sub-question's
/// `estimated_papers` is zero (§4.5.2).
const DEFAULT_RESULT_LIMIT: usize = 10;

pub struct DefaultRetriever {
    sources: ScholarSourceRegistry,
    failure_tracker: Arc<SourceFailureTracker>,
}

impl DefaultRetriever {
    pub fn new(sources: ScholarSourceRegistry, failure_tracker: Arc<SourceFailureTracker>) -> Self {
        Self {
            sources,
            failure_tracker,
        }
    }

    async fn dispatch(&self, source: SourceTag, keywords: &[String], limit: usize, logs: &mut Vec<String>) -> Vec<PaperMetadata> {
        if self.failure_tracker.is_skipped(source.as_str()) {
            logs.push(format!("retriever: skipping {} (recent failure threshold reached)", source.as_str()));
            return Vec::new();
        }
        let Some(adapter) = self.sources.get(source) else {
            logs.push(format!("retriever: no adapter configured for {}", source.as_str()));
            return Vec::new();
        };
        match adapter.search(keywords, limit.max(1)).await {
            Ok(papers) => papers,
            Err(e) => {
                self.failure_tracker.record_failure(source.as_str());
                logs.push(format!("retriever: source {} failed: {}", source.as_str(), e));
                Vec::new()
            }
        }
    }
}

fn dedup_by_paper_id(papers: Vec<PaperMetadata>) -> Vec<PaperMetadata> {
    let mut seen = HashSet::new();
    papers
        .into_iter()
        .filter(|p| seen.insert(p.paper_id.clone()))
        .collect()
}

#[async_trait]
impl Retriever for DefaultRetriever {
    async fn retrieve(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        if state.search_keywords.is_empty() {
            return Ok(PartialStateUpdate {
                candidate_papers: Some(Vec::new()),
                ..PartialStateUpdate::new()
            }
            .log("retriever: no search keywords, returning no candidates")
            .handoff("planner", "retriever"));
        }

        let mut logs = Vec::new();
        let all_papers: Vec<PaperMetadata>;

        if let Some(plan) = &state.research_plan {
            if plan.sub_questions.is_empty() {
                all_papers = Vec::new();
            } else {
                let futures = plan.sub_questions.iter().map(|sq| {
                    let limit = if sq.estimated_papers == 0 {
                        DEFAULT_RESULT_LIMIT
                    } else {
                        sq.estimated_papers as usize
                    };
                    self.dispatch_quiet(sq.preferred_source, &sq.keywords, limit)
                });
                let results = join_all(futures).await;
                let mut combined = Vec::new();
                for (sq, (papers, sub_logs)) in plan.sub_questions.iter().zip(results) {
                    logs.extend(sub_logs);
                    logs.push(format!(
                        "retriever: sub-question \"{}\" ({}) returned {} papers",
                        sq.question,
                        sq.preferred_source.as_str(),
                        papers.len()
                    ));
                    combined.extend(papers);
                }
                all_papers = combined;
            }
        } else {
            let mut dispatches = Vec::new();
            for keyword in &state.search_keywords {
                for source in &state.search_sources {
                    dispatches.push((keyword.clone(), *source));
                }
            }
            let futures = dispatches
                .iter()
                .map(|(kw, source)| self.dispatch_quiet(*source, std::slice::from_ref(kw), DEFAULT_RESULT_LIMIT));
            let results = join_all(futures).await;
            let mut combined = Vec::new();
            for ((keyword, source), (papers, sub_logs)) in dispatches.iter().zip(results) {
                logs.extend(sub_logs);
                logs.push(format!(
                    "retriever: keyword \"{keyword}\" on {} returned {} papers",
                    source.as_str(),
                    papers.len()
                ));
                combined.extend(papers);
            }
            all_papers = combined;
        }

        let deduped = dedup_by_paper_id(all_papers);
        logs.push(format!("retriever: {} unique candidate papers after dedup", deduped.len()));

        let mut update = PartialStateUpdate {
            candidate_papers: Some(deduped),
            ..PartialStateUpdate::new()
        };
        for line in logs {
            update = update.log(line);
        }
        Ok(update.handoff("planner", "retriever"))
    }
}

impl DefaultRetriever {
    /// Wraps `dispatch` so failures recorded in the tracker are visible to
    /// the caller without a shared mutable logs vec across concurrent tasks.
    async fn dispatch_quiet(&self, source: SourceTag, keywords: &[String], limit: usize) -> (Vec<PaperMetadata>, Vec<String>) {
        let mut logs = Vec::new();
        let papers = self.dispatch(source, keywords, limit, &mut logs).await;
        (papers, logs)
    }
}

#[async_trait]
impl Agent for DefaultRetriever {
    async fn run(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        self.retrieve(state).await
    }
}
