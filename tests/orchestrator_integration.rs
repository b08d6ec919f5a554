//! End-to-end coverage of the six scenarios the design doc's testable
//! properties call out (SPEC_FULL.md §8), driven through a real `Engine`
//! wired with the production agents and an offline `MockLmBackend` queue
//! instead of unit-level `FixedAgent` stubs.

use std::sync::Arc;
use std::time::Duration;

use scholar_forge::adapters::{MockScholarSourceAdapter, ScholarSourceRegistry};
use scholar_forge::router::{CostTier, ModelConfig, ModelRegistry, TaskType};
use scholar_forge::store::InMemoryCheckpointStore;
use scholar_forge::streaming::{StreamEvent, StreamingEventBus};
use scholar_forge::{
    CostLedger, DefaultCritic, DefaultExtractor, DefaultPlanner, DefaultReflection, DefaultRetriever, DefaultWriter,
    Engine, LmAdapter, LmSemaphores, MockLmBackend, OutputLanguage, PaperMetadata, SourceFailureTracker, SourceTag,
};

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
        max_output_tokens: 8000,
        is_local: true,
        cost_tier: CostTier::Low,
        reasoning_score: 7.0,
        creativity_score: 7.0,
        latency_score: 7.0,
        enabled: true,
    }]))
}

fn paper(id: &str, title: &str) -> PaperMetadata {
    let mut p = PaperMetadata::new(id, title, SourceTag::Arxiv);
    p.abstract_text = Some(format!("An abstract about {title}."));
    p
}

/// Wires the six production agents plus an in-memory checkpoint store
/// against a scripted `MockLmBackend` queue and a single-source
/// `MockScholarSourceAdapter`, mirroring `main.rs`'s `build_engine`.
fn build_engine(queue: Vec<&str>, papers: Vec<PaperMetadata>) -> Engine {
    let backend = Arc::new(MockLmBackend::with_queue(queue.into_iter().map(String::from).collect()));
    let reg = registry();
    let cost_ledger = Arc::new(CostLedger::new());
    let semaphores = Arc::new(LmSemaphores::new(8, 8, 8));
    let lm = Arc::new(LmAdapter::new(backend, reg.clone(), semaphores.clone(), cost_ledger.clone()));

    let sources = ScholarSourceRegistry::new().with(SourceTag::Arxiv, Arc::new(MockScholarSourceAdapter::new("arxiv", papers)));
    let failure_tracker = Arc::new(SourceFailureTracker::default());

    let planner = Arc::new(DefaultPlanner::new(lm.clone(), 5, 5));
    let retriever = Arc::new(DefaultRetriever::new(sources, failure_tracker));
    let extractor = Arc::new(DefaultExtractor::new(lm.clone(), None, semaphores.clone(), 200));
    let writer = Arc::new(DefaultWriter::new(lm.clone(), 200, 100, 40_000, 5));
    let critic = Arc::new(DefaultCritic::new(None, 0.8));
    let reflection = Arc::new(DefaultReflection::new(lm));

    Engine::new(
        Arc::new(InMemoryCheckpointStore::new()),
        planner,
        retriever,
        extractor,
        writer,
        critic,
        reflection,
        reg,
        cost_ledger,
        3,
        Duration::from_secs(30),
    )
}

/// Scenario 1 (§8): full start → approve → resume flow against two
/// candidates, both approved, ending in a passing draft with every
/// `{cite:N}` placeholder normalized to `[N]` against the right paper id.
#[tokio::test]
async fn full_start_approve_resume_flow_produces_normalized_passing_draft() {
    let engine = build_engine(
        vec![
            r#"{"keywords": ["bert"]}"#,
            r#"{"core_contribution": "p1 shows one thing"}"#,
            "{}",
            r#"{"core_contribution": "p2 shows another thing"}"#,
            "{}",
            r#"{"title": "A Literature Review", "section_titles": ["Overview"]}"#,
            r#"{"content": "p1 shows one thing {cite:1} and p2 shows another {cite:2}."}"#,
        ],
        vec![paper("p1", "Paper One"), paper("p2", "Paper Two")],
    );

    let started = engine.start("t-scenario1", "bert", OutputLanguage::En, vec![SourceTag::Arxiv]).await.unwrap();
    assert_eq!(started.candidate_papers.len(), 2);

    engine.approve("t-scenario1", &["p1".to_string(), "p2".to_string()]).await.unwrap();
    let state = engine.resume("t-scenario1").await.unwrap();

    assert!(state.qa_errors.is_empty(), "expected a passing draft, got: {:?}", state.qa_errors);
    assert_eq!(state.selected_papers.len(), 2);
    let draft = state.final_draft.unwrap();
    assert_eq!(draft.sections.len(), 1);
    assert_eq!(draft.sections[0].content, "p1 shows one thing [1] and p2 shows another [2].");
    assert_eq!(draft.sections[0].cited_paper_ids, vec!["p1".to_string(), "p2".to_string()]);
}

/// Scenario 2 (§8): the writer first omits a citation, the critic flags an
/// `uncited_paper` error, reflection routes the retry back to the writer,
/// and the retry fixes it — ending at `retry_count == 1`.
#[tokio::test]
async fn uncited_paper_triggers_one_retry_then_passes() {
    let engine = build_engine(
        vec![
            r#"{"keywords": ["bert"]}"#,
            r#"{"core_contribution": "p1 shows one thing"}"#,
            "{}",
            r#"{"core_contribution": "p2 shows another thing"}"#,
            "{}",
            r#"{"title": "Draft One", "section_titles": ["Overview"]}"#,
            r#"{"content": "p1 shows progress {cite:1}."}"#,
            r#"{"entries": [{"error_category": "uncited_paper", "error_detail": "paper [2] is never cited",
                "fix_strategy": "cite paper 2 in the overview section", "fixable_by_writer": true}],
                "should_retry": true, "retry_target": "writer", "summary": "cite paper 2"}"#,
            r#"{"title": "Draft One", "sections": [{"heading": "Overview",
                "content": "p1 shows progress {cite:1} and p2 extends it {cite:2}."}]}"#,
        ],
        vec![paper("p1", "Paper One"), paper("p2", "Paper Two")],
    );

    engine.start("t-scenario2", "bert", OutputLanguage::En, vec![SourceTag::Arxiv]).await.unwrap();
    engine.approve("t-scenario2", &["p1".to_string(), "p2".to_string()]).await.unwrap();
    let state = engine.resume("t-scenario2").await.unwrap();

    assert_eq!(state.retry_count, 1);
    assert!(state.qa_errors.is_empty());
    let draft = state.final_draft.unwrap();
    assert_eq!(draft.sections[0].content, "p1 shows progress [1] and p2 extends it [2].");
}

/// Scenario 3 (§8): a writer that keeps citing an out-of-bounds index
/// exhausts `max_qa_retries` and the graph terminates with the last draft
/// preserved instead of looping forever.
#[tokio::test]
async fn out_of_bounds_citation_exhausts_retries_and_terminates() {
    let engine = build_engine(
        vec![
            r#"{"keywords": ["bert"]}"#,
            r#"{"core_contribution": "p1 core contribution"}"#,
            "{}",
            r#"{"title": "Draft", "section_titles": ["Overview"]}"#,
            r#"{"content": "an unverifiable claim {cite:99}"}"#,
            r#"{"entries": [{"error_category": "citation_out_of_bounds", "error_detail": "cite 99 invalid",
                "fix_strategy": "cite an in-range paper", "fixable_by_writer": true}],
                "should_retry": true, "retry_target": "writer", "summary": "fix the out-of-range citation"}"#,
            r#"{"title": "Draft", "sections": [{"heading": "Overview", "content": "still cites {cite:99}"}]}"#,
            r#"{"entries": [{"error_category": "citation_out_of_bounds", "error_detail": "cite 99 invalid",
                "fix_strategy": "cite an in-range paper", "fixable_by_writer": true}],
                "should_retry": true, "retry_target": "writer", "summary": "fix the out-of-range citation"}"#,
            r#"{"title": "Draft", "sections": [{"heading": "Overview", "content": "still cites {cite:99}"}]}"#,
        ],
        vec![paper("p1", "Paper One")],
    );

    engine.start("t-scenario3", "bert", OutputLanguage::En, vec![SourceTag::Arxiv]).await.unwrap();
    engine.approve("t-scenario3", &["p1".to_string()]).await.unwrap();
    let state = engine.resume("t-scenario3").await.unwrap();

    assert_eq!(state.retry_count, 3);
    assert!(!state.qa_errors.is_empty());
    assert!(state.qa_errors.iter().any(|e| e.contains("citation_out_of_bounds")));
    let draft = state.final_draft.unwrap();
    assert!(draft.sections[0].content.contains("{cite:99}"));
}

/// Scenario 4 (§8): a `continue_turn` re-enters at the writer with a single
/// `FullDraft` call, skipping planner/retriever/extractor, and the new
/// draft's citations stay in range.
#[tokio::test]
async fn continuation_turn_reenters_at_writer_with_single_call() {
    let engine = build_engine(
        vec![
            r#"{"keywords": ["bert"]}"#,
            r#"{"core_contribution": "p1 core contribution"}"#,
            "{}",
            r#"{"title": "Draft", "section_titles": ["Overview"]}"#,
            r#"{"content": "initial claim {cite:1}."}"#,
            r#"{"title": "Draft", "sections": [{"heading": "Overview", "content": "addendum claim {cite:1}."}]}"#,
        ],
        vec![paper("p1", "Paper One")],
    );

    engine.start("t-scenario4", "bert", OutputLanguage::En, vec![SourceTag::Arxiv]).await.unwrap();
    engine.approve("t-scenario4", &["p1".to_string()]).await.unwrap();
    let first = engine.resume("t-scenario4").await.unwrap();
    assert!(first.qa_errors.is_empty());

    let state = engine.continue_turn("t-scenario4", "is there follow-up work?").await.unwrap();
    assert!(state.is_continuation);
    assert!(state.qa_errors.is_empty());
    assert_eq!(state.messages.len(), 1);
    let draft = state.final_draft.unwrap();
    assert_eq!(draft.sections[0].content, "addendum claim [1].");
}

/// Scenario 5 (§8): the router deterministically prefers a high-reasoning
/// model for planning and the better-scoring low-cost-tier model for QA.
#[tokio::test]
async fn router_selects_models_matching_task_requirements() {
    let reg = ModelRegistry::new(vec![
        ModelConfig {
            model_id: "openai:gpt-4o".into(),
            provider: "openai".into(),
            model_name: "gpt-4o".into(),
            api_base: None,
            api_key_env: Some("LLM_API_KEY".into()),
            supports_json_mode: true,
            supports_structured_output: true,
            supports_long_context: true,
            max_output_tokens: 16000,
            is_local: false,
            cost_tier: CostTier::High,
            reasoning_score: 8.0,
            creativity_score: 8.0,
            latency_score: 6.0,
            enabled: true,
        },
        ModelConfig {
            model_id: "openai:gpt-4o-mini".into(),
            provider: "openai".into(),
            model_name: "gpt-4o-mini".into(),
            api_base: None,
            api_key_env: Some("LLM_API_KEY".into()),
            supports_json_mode: true,
            supports_structured_output: true,
            supports_long_context: true,
            max_output_tokens: 16000,
            is_local: false,
            cost_tier: CostTier::Low,
            reasoning_score: 6.0,
            creativity_score: 5.0,
            latency_score: 9.0,
            enabled: true,
        },
        ModelConfig {
            model_id: "deepseek:deepseek-chat".into(),
            provider: "deepseek".into(),
            model_name: "deepseek-chat".into(),
            api_base: None,
            api_key_env: Some("LLM_API_KEY".into()),
            supports_json_mode: true,
            supports_structured_output: true,
            supports_long_context: true,
            max_output_tokens: 8000,
            is_local: false,
            cost_tier: CostTier::Low,
            reasoning_score: 7.0,
            creativity_score: 6.0,
            latency_score: 7.0,
            enabled: true,
        },
    ]);

    let planning_choice = reg.select(TaskType::Planning).unwrap();
    assert_eq!(planning_choice.model_id, "openai:gpt-4o");

    // Both mini models are eligible for Qa (cost_tier <= Medium excludes
    // gpt-4o's High tier); deepseek-chat's higher reasoning_score wins the
    // weighted score deterministically.
    let qa_choice = reg.select(TaskType::Qa).unwrap();
    assert_eq!(qa_choice.model_id, "deepseek:deepseek-chat");

    let chain = reg.fallback_chain(TaskType::Qa);
    assert_eq!(chain[0], qa_choice.model_id);
    assert!(!chain.contains(&"openai:gpt-4o".to_string()));
}

/// Scenario 6 (§8): boundary characters flush immediately regardless of
/// script, and a long run of boundary-free tokens still compresses at
/// least 5x through the debounce timer.
#[tokio::test]
async fn streaming_bus_flushes_on_boundary_characters() {
    let bus = StreamingEventBus::new();
    bus.push("你").await;
    bus.push("好").await;
    bus.push("。").await;
    assert_eq!(bus.consume().await, StreamEvent::Chunk("你好。".to_string()));
}

#[tokio::test(start_paused = true)]
async fn streaming_bus_compresses_boundary_free_tokens_via_debounce_timer() {
    let bus = StreamingEventBus::new();
    for _ in 0..100 {
        bus.push("x").await;
        tokio::time::advance(Duration::from_millis(10)).await;
    }
    bus.close().await;

    let mut chunks = 0u64;
    loop {
        match bus.consume().await {
            StreamEvent::Chunk(_) => chunks += 1,
            StreamEvent::Closed => break,
            StreamEvent::Heartbeat => continue,
        }
    }
    assert!(chunks <= 20, "expected <=20 consumer chunks, got {chunks}");
    let stats = bus.get_stats().await;
    assert!(stats.compression_ratio() >= 5.0);
}
