//! Scheduler / graph runtime (C6, §4.6) and the `Engine` control surface
//! (§6.1). Grounded in the teacher's `LoopController` (`orchestrator/loop_controller.rs`):
//! a driver that steps named phases against injected collaborators, inspects
//! the resulting state to decide the next phase, and persists intermediate
//! output along the way — generalized here from two fixed phases to a
//! six-node conditional graph with a human-in-the-loop pause and a
//! continuation re-entry point.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::agents::{Agent, AgentError};
use crate::errors::{ApprovalError, StoreError, WorkflowTimeout};
use crate::llm::CostLedger;
use crate::models::{
    Draft, Message, OutputLanguage, PartialStateUpdate, Reflection as ReflectionModel, ResearchPlan, RetryTarget,
    SessionState, SourceTag,
};
use crate::router::ModelConfig;
use crate::store::CheckpointStore;

static CITE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{cite:(\d+)\}").unwrap());

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Timeout(#[from] WorkflowTimeout),
}

/// Events forwarded to a `stream` consumer while a turn runs (§4.4, §6.1).
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Log(String),
    ResearchPlan(ResearchPlan),
    Reflection(ReflectionModel),
    CostUpdate(crate::llm::cost::CostSummary),
    Completed(Box<SessionState>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Planner,
    Retriever,
    Extractor,
    Writer,
    Critic,
    Reflection,
}

impl Node {
    fn as_str(&self) -> &'static str {
        match self {
            Node::Planner => "planner",
            Node::Retriever => "retriever",
            Node::Extractor => "extractor",
            Node::Writer => "writer",
            Node::Critic => "critic",
            Node::Reflection => "reflection",
        }
    }
}

/// Routing decision after a node completes (§4.6's conditional edges).
enum Next {
    Continue(Node),
    End,
}

/// Bundles every collaborator the graph needs: the checkpoint store, the six
/// agents, the model registry (for the `models` endpoint), and the cost
/// ledger (for `status`'s cost snapshot). Cheaply `Clone`, since every field
/// is itself reference-counted — needed so `stream` can hand a copy to a
/// spawned task (§6.1).
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn CheckpointStore>,
    planner: Arc<dyn Agent>,
    retriever: Arc<dyn Agent>,
    extractor: Arc<dyn Agent>,
    writer: Arc<dyn Agent>,
    critic: Arc<dyn Agent>,
    reflection: Arc<dyn Agent>,
    registry: Arc<crate::router::ModelRegistry>,
    cost_ledger: Arc<CostLedger>,
    max_qa_retries: u32,
    workflow_timeout: Duration,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        planner: Arc<dyn Agent>,
        retriever: Arc<dyn Agent>,
        extractor: Arc<dyn Agent>,
        writer: Arc<dyn Agent>,
        critic: Arc<dyn Agent>,
        reflection: Arc<dyn Agent>,
        registry: Arc<crate::router::ModelRegistry>,
        cost_ledger: Arc<CostLedger>,
        max_qa_retries: u32,
        workflow_timeout: Duration,
    ) -> Self {
        Self {
            store,
            planner,
            retriever,
            extractor,
            writer,
            critic,
            reflection,
            registry,
            cost_ledger,
            max_qa_retries,
            workflow_timeout,
        }
    }

    fn agent_for(&self, node: Node) -> &Arc<dyn Agent> {
        match node {
            Node::Planner => &self.planner,
            Node::Retriever => &self.retriever,
            Node::Extractor => &self.extractor,
            Node::Writer => &self.writer,
            Node::Critic => &self.critic,
            Node::Reflection => &self.reflection,
        }
    }

    /// Runs one node: fetch, invoke, checkpoint, re-fetch. Returns the new
    /// state plus the log lines this step appended, so a streaming caller
    /// can forward them without re-diffing state.
    async fn step(&self, task_id: &str, node: Node) -> Result<(SessionState, Vec<String>), EngineError> {
        let state = self.store.get(task_id).await?;
        let update = self.agent_for(node).run(&state).await?;
        let logs = update.logs_append.clone();
        self.store.update(task_id, update, Some(node.as_str())).await?;
        let state = self.store.get(task_id).await?;
        Ok((state, logs))
    }

    /// The conditional edge out of a just-completed node (§4.6).
    fn next_after(&self, node: Node, state: &SessionState) -> Next {
        match node {
            Node::Planner => Next::Continue(Node::Retriever),
            // Reached directly by `start`, which steps planner then retriever
            // itself and pauses for human approval without consulting
            // `next_after`. The only way `run_chain`'s loop lands here is a
            // reflection-driven retry (below), which re-runs retriever as
            // part of the same automatic QA retry loop the writer-targeted
            // retry already uses — no new human approval is solicited, since
            // the retry is system-initiated, not user-initiated.
            Node::Retriever => Next::Continue(Node::Extractor),
            Node::Extractor => Next::Continue(Node::Writer),
            Node::Writer => Next::Continue(Node::Critic),
            Node::Critic => {
                if state.qa_errors.is_empty() {
                    Next::End
                } else if state.retry_count >= self.max_qa_retries {
                    Next::End
                } else {
                    Next::Continue(Node::Reflection)
                }
            }
            Node::Reflection => {
                let should_retry = state.reflection.as_ref().map(|r| r.should_retry).unwrap_or(true);
                if !should_retry {
                    return Next::End;
                }
                match state.reflection.as_ref().map(|r| r.retry_target).unwrap_or_default() {
                    RetryTarget::Retriever => Next::Continue(Node::Retriever),
                    RetryTarget::Writer => Next::Continue(Node::Writer),
                }
            }
        }
    }

    /// Drives the graph from `start` to its terminal node, optionally
    /// forwarding events to `sender` (§4.4, §6.1 `stream`). Runs citation
    /// normalization exactly once, at the end (§4.6).
    async fn run_chain(
        &self,
        task_id: &str,
        start: Node,
        sender: Option<&mpsc::UnboundedSender<SchedulerEvent>>,
    ) -> Result<SessionState, EngineError> {
        let mut current = start;
        let mut state;
        loop {
            let (next_state, logs) = self.step(task_id, current).await?;
            state = next_state;
            if let Some(tx) = sender {
                for line in &logs {
                    let _ = tx.send(SchedulerEvent::Log(line.clone()));
                }
                if let Some(plan) = &state.research_plan {
                    let _ = tx.send(SchedulerEvent::ResearchPlan(plan.clone()));
                }
                if let Some(r) = &state.reflection {
                    let _ = tx.send(SchedulerEvent::Reflection(r.clone()));
                }
                let _ = tx.send(SchedulerEvent::CostUpdate(self.cost_ledger.summary()));
            }
            match self.next_after(current, &state) {
                Next::Continue(next) => current = next,
                Next::End => break,
            }
        }

        self.normalize_citations(task_id, &mut state).await?;
        self.store.set_next_nodes(task_id, HashSet::new()).await?;
        if let Some(tx) = sender {
            let _ = tx.send(SchedulerEvent::Completed(Box::new(state.clone())));
        }
        Ok(state)
    }

    /// Converts every `{cite:N}` placeholder to `[N]` and fills each
    /// section's `cited_paper_ids`, indexed against
    /// `state.citation_index_base()` (Open Question ii). Idempotent: a
    /// second pass finds no more `{cite:N}` markers to replace.
    async fn normalize_citations(&self, task_id: &str, state: &mut SessionState) -> Result<(), EngineError> {
        let Some(draft) = state.final_draft.clone() else {
            return Ok(());
        };
        let papers = state.citation_index_base().to_vec();

        let mut new_sections = Vec::with_capacity(draft.sections.len());
        for mut section in draft.sections {
            let mut cited = Vec::new();
            let mut seen = HashSet::new();
            let content = CITE_RE
                .replace_all(&section.content, |caps: &regex::Captures| {
                    let n: usize = caps[1].parse().unwrap_or(0);
                    if n >= 1 && n <= papers.len() {
                        let paper_id = papers[n - 1].paper_id.clone();
                        if seen.insert(paper_id.clone()) {
                            cited.push(paper_id);
                        }
                        format!("[{n}]")
                    } else {
                        caps[0].to_string()
                    }
                })
                .into_owned();
            section.content = content;
            section.cited_paper_ids = cited;
            new_sections.push(section);
        }

        let normalized = Draft {
            title: draft.title,
            sections: new_sections,
        };
        let update = PartialStateUpdate {
            final_draft: Some(Some(normalized.clone())),
            ..PartialStateUpdate::new()
        }
        .log("scheduler: normalized citation markers");
        self.store.update(task_id, update, Some("normalize")).await?;
        state.final_draft = Some(normalized);
        Ok(())
    }

    async fn with_timeout<F, T>(&self, fut: F) -> Result<T, EngineError>
    where
        F: std::future::Future<Output = Result<T, EngineError>>,
    {
        match tokio::time::timeout(self.workflow_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(WorkflowTimeout {
                elapsed_secs: self.workflow_timeout.as_secs(),
                limit_secs: self.workflow_timeout.as_secs(),
            })),
        }
    }

    /// `start(task_id, user_query, ...)` (§6.1): creates the session, runs
    /// planner then retriever, then pauses for human approval (Design Note
    /// "Pause/resume").
    pub async fn start(
        &self,
        task_id: &str,
        user_query: impl Into<String>,
        output_language: OutputLanguage,
        search_sources: Vec<SourceTag>,
    ) -> Result<SessionState, EngineError> {
        let initial = SessionState::new(task_id, user_query, output_language, search_sources);
        self.store.create(initial).await?;

        self.with_timeout(async {
            self.step(task_id, Node::Planner).await?;
            let (state, _logs) = self.step(task_id, Node::Retriever).await?;
            self.store
                .set_next_nodes(task_id, HashSet::from(["extractor".to_string()]))
                .await?;
            Ok(state)
        })
        .await
    }

    /// `approve(task_id, paper_ids)` (§6.1): marks the matching candidates
    /// approved. Leaves the pause intact — the caller still must call
    /// `resume` to drive extraction onward.
    pub async fn approve(&self, task_id: &str, approved_paper_ids: &[String]) -> Result<SessionState, EngineError> {
        let next = self.store.next_nodes(task_id).await?;
        if !next.contains("extractor") {
            return Err(EngineError::Approval(ApprovalError::NotPausedAtExtractor {
                task_id: task_id.to_string(),
            }));
        }

        let mut state = self.store.get(task_id).await?;
        let mut matched = false;
        for paper in state.candidate_papers.iter_mut() {
            if approved_paper_ids.iter().any(|id| id == &paper.paper_id) {
                paper.is_approved = true;
                matched = true;
            }
        }
        if !matched {
            return Err(EngineError::Approval(ApprovalError::NoMatchingApproval {
                task_id: task_id.to_string(),
            }));
        }

        let update = PartialStateUpdate {
            candidate_papers: Some(state.candidate_papers),
            ..PartialStateUpdate::new()
        }
        .log(format!("approved {} paper(s)", approved_paper_ids.len()));
        self.store.update(task_id, update, Some("approve")).await?;
        Ok(self.store.get(task_id).await?)
    }

    /// The resume primitive (Design Note §9): drives extractor through
    /// critic/reflection to a terminal node. Requires a prior `approve` (or
    /// at least a pause at `extractor`).
    pub async fn resume(&self, task_id: &str) -> Result<SessionState, EngineError> {
        let next = self.store.next_nodes(task_id).await?;
        if !next.contains("extractor") {
            return Err(EngineError::Approval(ApprovalError::NotPausedAtExtractor {
                task_id: task_id.to_string(),
            }));
        }
        self.with_timeout(self.run_chain(task_id, Node::Extractor, None)).await
    }

    /// `continue_turn(task_id, message)` (§6.1): re-enters the graph at the
    /// writer, skipping planner/retriever/extractor entirely (§4.6
    /// "Continuation re-entry").
    pub async fn continue_turn(&self, task_id: &str, message: impl Into<String>) -> Result<SessionState, EngineError> {
        let mut update = PartialStateUpdate {
            is_continuation: Some(true),
            qa_errors: Some(Vec::new()),
            ..PartialStateUpdate::new()
        }
        .log("continuation turn started");
        update.messages_append.push(Message::user(message));
        self.store.update(task_id, update, Some("continue")).await?;

        self.with_timeout(self.run_chain(task_id, Node::Writer, None)).await
    }

    /// `status(task_id)` (§6.1): a read-only snapshot, with a fresh cost
    /// summary stamped in (not persisted — cost is cheap to recompute and
    /// always current).
    pub async fn status(&self, task_id: &str) -> Result<SessionState, EngineError> {
        let mut state = self.store.get(task_id).await?;
        state.cost_summary = serde_json::to_value(self.cost_ledger.summary()).ok();
        Ok(state)
    }

    /// `models()` (§6.1): the router's configured model list.
    pub fn models(&self) -> Vec<ModelConfig> {
        self.registry.all().to_vec()
    }

    /// `stream(task_id)` (§6.1, §4.4): runs the same node sequence `resume`
    /// or `continue_turn` would, forwarding [`SchedulerEvent`]s as they
    /// happen instead of returning only the final state.
    pub fn stream(&self, task_id: String) -> mpsc::UnboundedReceiver<SchedulerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = self.clone();
        tokio::spawn(async move {
            let next = engine.store.next_nodes(&task_id).await.unwrap_or_default();
            let start = if next.contains("extractor") { Node::Extractor } else { Node::Writer };
            let result = engine
                .with_timeout(engine.run_chain(&task_id, start, Some(&tx)))
                .await;
            if let Err(e) = result {
                let _ = tx.send(SchedulerEvent::Log(format!("scheduler: stream ended with error: {e}")));
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DraftSection, PaperMetadata, PartialStateUpdate as Update, RetryTarget};
    use crate::router::ModelRegistry;
    use crate::store::InMemoryCheckpointStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedAgent(Update);
    #[async_trait]
    impl Agent for FixedAgent {
        async fn run(&self, _state: &SessionState) -> Result<Update, AgentError> {
            Ok(self.0.clone())
        }
    }

    fn engine_with(
        planner: Update,
        retriever: Update,
        extractor: Update,
        writer: Update,
        critic_responses: Vec<Update>,
        reflection: Update,
    ) -> Engine {
        struct SequencedAgent {
            responses: std::sync::Mutex<Vec<Update>>,
            idx: AtomicU32,
        }
        #[async_trait]
        impl Agent for SequencedAgent {
            async fn run(&self, _state: &SessionState) -> Result<Update, AgentError> {
                let mut guard = self.responses.lock().unwrap();
                let i = self.idx.fetch_add(1, Ordering::SeqCst) as usize;
                Ok(guard.get_mut(i.min(guard.len() - 1)).unwrap().clone())
            }
        }

        Engine::new(
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(FixedAgent(planner)),
            Arc::new(FixedAgent(retriever)),
            Arc::new(FixedAgent(extractor)),
            Arc::new(FixedAgent(writer)),
            Arc::new(SequencedAgent {
                responses: std::sync::Mutex::new(critic_responses),
                idx: AtomicU32::new(0),
            }),
            Arc::new(FixedAgent(reflection)),
            Arc::new(ModelRegistry::new(Vec::new())),
            Arc::new(CostLedger::new()),
            3,
            Duration::from_secs(30),
        )
    }

    fn draft_update(content: &str) -> Update {
        Update {
            final_draft: Some(Some(Draft {
                title: "T".into(),
                sections: vec![DraftSection {
                    heading: "Intro".into(),
                    content: content.into(),
                    cited_paper_ids: vec![],
                }],
            })),
            ..Update::new()
        }
    }

    fn pass_update() -> Update {
        Update {
            qa_errors: Some(Vec::new()),
            ..Update::new()
        }
    }

    fn fail_update(reason: &str) -> Update {
        Update {
            qa_errors: Some(vec![reason.to_string()]),
            retry_count_increment: Some(1),
            ..Update::new()
        }
    }

    #[tokio::test]
    async fn start_pauses_after_retriever() {
        let engine = engine_with(
            Update::new(),
            Update {
                candidate_papers: Some(vec![PaperMetadata::new("p1", "Title", SourceTag::Arxiv)]),
                ..Update::new()
            },
            Update::new(),
            Update::new(),
            vec![pass_update()],
            Update::new(),
        );
        let state = engine.start("t1", "query", OutputLanguage::En, vec![SourceTag::Arxiv]).await.unwrap();
        assert_eq!(state.candidate_papers.len(), 1);
        assert!(engine.store.next_nodes("t1").await.unwrap().contains("extractor"));
    }

    #[tokio::test]
    async fn approve_requires_a_pause_at_extractor() {
        let engine = engine_with(
            Update::new(),
            Update::new(),
            Update::new(),
            Update::new(),
            vec![pass_update()],
            Update::new(),
        );
        engine
            .store
            .create(SessionState::new("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]))
            .await
            .unwrap();
        let result = engine.approve("t1", &["p1".to_string()]).await;
        assert!(matches!(result, Err(EngineError::Approval(ApprovalError::NotPausedAtExtractor { .. }))));
    }

    #[tokio::test]
    async fn resume_runs_to_completion_on_first_pass_qa() {
        let engine = engine_with(
            Update::new(),
            Update {
                candidate_papers: Some(vec![PaperMetadata::new("p1", "Title", SourceTag::Arxiv)]),
                ..Update::new()
            },
            Update {
                approved_papers: Some(vec![PaperMetadata::new("p1", "Title", SourceTag::Arxiv)]),
                selected_papers: Some(vec![PaperMetadata::new("p1", "Title", SourceTag::Arxiv)]),
                ..Update::new()
            },
            draft_update("some claim {cite:1}"),
            vec![pass_update()],
            Update::new(),
        );
        engine.start("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]).await.unwrap();
        let state = engine.resume("t1").await.unwrap();
        assert!(state.qa_errors.is_empty());
        assert_eq!(state.final_draft.unwrap().sections[0].content, "some claim [1]");
        assert!(engine.store.next_nodes("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reflection_routes_back_to_writer_then_terminates_on_pass() {
        let engine = engine_with(
            Update::new(),
            Update::new(),
            Update::new(),
            draft_update("claim {cite:1}"),
            vec![fail_update("missing_citation: x"), pass_update()],
            Update {
                reflection: Some(Some(crate::models::Reflection {
                    entries: vec![],
                    should_retry: true,
                    retry_target: RetryTarget::Writer,
                    summary: "retry".into(),
                })),
                ..Update::new()
            },
        );
        engine
            .store
            .create(SessionState::new("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]))
            .await
            .unwrap();
        engine.store.set_next_nodes("t1", HashSet::from(["extractor".to_string()])).await.unwrap();
        let state = engine.resume("t1").await.unwrap();
        assert!(state.qa_errors.is_empty());
        assert_eq!(state.retry_count, 1);
    }

    #[tokio::test]
    async fn reflection_routes_to_retriever_when_retry_target_is_retriever() {
        let engine = engine_with(
            Update::new(),
            Update {
                candidate_papers: Some(vec![PaperMetadata::new("p1", "Title", SourceTag::Arxiv)]),
                ..Update::new()
            },
            Update::new(),
            draft_update("claim {cite:1}"),
            vec![fail_update("uncited_paper: x"), pass_update()],
            Update {
                reflection: Some(Some(crate::models::Reflection {
                    entries: vec![],
                    should_retry: true,
                    retry_target: RetryTarget::Retriever,
                    summary: "need more papers".into(),
                })),
                ..Update::new()
            },
        );
        engine
            .store
            .create(SessionState::new("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]))
            .await
            .unwrap();
        engine.store.set_next_nodes("t1", HashSet::from(["extractor".to_string()])).await.unwrap();
        let state = engine.resume("t1").await.unwrap();
        assert!(state.qa_errors.is_empty());
        assert_eq!(state.retry_count, 1);
        // The retriever re-ran as part of the retry and re-populated candidates.
        assert_eq!(state.candidate_papers.len(), 1);
        assert!(engine.store.next_nodes("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn qa_retries_exhausted_terminates_with_last_draft() {
        let engine = engine_with(
            Update::new(),
            Update::new(),
            Update::new(),
            draft_update("claim {cite:1}"),
            vec![fail_update("a"), fail_update("b"), fail_update("c"), fail_update("d")],
            Update {
                reflection: Some(Some(crate::models::Reflection {
                    entries: vec![],
                    should_retry: true,
                    retry_target: RetryTarget::Writer,
                    summary: "keep trying".into(),
                })),
                ..Update::new()
            },
        );
        engine
            .store
            .create(SessionState::new("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]))
            .await
            .unwrap();
        engine.store.set_next_nodes("t1", HashSet::from(["extractor".to_string()])).await.unwrap();
        let state = engine.resume("t1").await.unwrap();
        assert_eq!(state.retry_count, 3);
        assert!(!state.qa_errors.is_empty());
        assert!(state.final_draft.is_some());
    }

    #[tokio::test]
    async fn continue_turn_reenters_at_writer_and_resets_qa_errors() {
        let engine = engine_with(
            Update::new(),
            Update::new(),
            Update::new(),
            draft_update("addendum {cite:1}"),
            vec![pass_update()],
            Update::new(),
        );
        let mut state = SessionState::new("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]);
        state.selected_papers = vec![PaperMetadata::new("p1", "Title", SourceTag::Arxiv)];
        state.qa_errors = vec!["stale error".to_string()];
        engine.store.create(state).await.unwrap();

        let state = engine.continue_turn("t1", "follow-up question").await.unwrap();
        assert!(state.is_continuation);
        assert!(state.qa_errors.is_empty());
        assert_eq!(state.messages.len(), 1);
    }

    #[tokio::test]
    async fn models_returns_registry_snapshot() {
        let engine = engine_with(
            Update::new(),
            Update::new(),
            Update::new(),
            Update::new(),
            vec![pass_update()],
            Update::new(),
        );
        assert!(engine.models().is_empty());
    }
}
