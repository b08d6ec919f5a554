use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scholar_forge::{
    CostLedger, DefaultCritic, DefaultExtractor, DefaultPlanner, DefaultReflection, DefaultRetriever, DefaultWriter,
    Engine, EngineConfig, FileCheckpointStore, LmAdapter, LmSemaphores, MockFullTextAdapter, MockLmBackend,
    MockScholarSourceAdapter, OutputLanguage, PaperMetadata, ReqwestLmBackend, ScholarSourceRegistry, SourceTag,
};
use scholar_forge::citation::CitationPipeline;
use scholar_forge::llm::LmBackend;

/// Scholar Forge: a checkpointed agent graph that orchestrates automated
/// literature reviews.
#[derive(Parser, Debug)]
#[command(name = "scholar-forge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML engine configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding checkpointed session state.
    #[arg(long, global = true, default_value = "./dev/sessions")]
    store_dir: PathBuf,

    /// Force the demo's offline mock LM backend even if LLM_API_KEY is set.
    #[arg(long, global = true)]
    offline: bool,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new literature review session: runs the planner and
    /// retriever, then pauses for paper approval.
    Start {
        /// The user's research query.
        #[arg(short, long)]
        query: String,

        /// Session identifier. A fresh UUID is used if omitted.
        #[arg(long)]
        task_id: Option<String>,

        /// Output language for the final draft.
        #[arg(long, default_value = "en")]
        output_language: String,

        /// Comma-separated scholarly sources to search (arxiv, pubmed, semantic_scholar).
        #[arg(long, default_value = "arxiv")]
        sources: String,
    },

    /// Approve candidate papers surfaced by `start`, by id.
    Approve {
        #[arg(long)]
        task_id: String,

        /// Comma-separated paper ids to approve.
        #[arg(long)]
        paper_ids: String,
    },

    /// Resume a session paused at extractor after approval.
    Resume {
        #[arg(long)]
        task_id: String,
    },

    /// Continue a completed session with a new follow-up message.
    Continue {
        #[arg(long)]
        task_id: String,

        #[arg(short, long)]
        message: String,
    },

    /// Print the current state and cost summary for a session.
    Status {
        #[arg(long)]
        task_id: String,
    },

    /// List the configured models available to the router.
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let engine = build_engine(&cli).context("failed to build engine")?;

    match cli.command {
        Command::Start {
            query,
            task_id,
            output_language,
            sources,
        } => {
            let task_id = task_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let output_language = parse_output_language(&output_language)?;
            let search_sources = parse_sources(&sources)?;
            info!(task_id = %task_id, "starting literature review session");
            let state = engine.start(&task_id, query, output_language, search_sources).await?;
            println!("task_id: {task_id}");
            println!("candidate papers: {}", state.candidate_papers.len());
            for paper in &state.candidate_papers {
                println!("  - {} ({})", paper.paper_id, paper.title);
            }
            println!("\nApprove papers with:\n  scholar-forge approve --task-id {task_id} --paper-ids <id,id,...>");
        }
        Command::Approve { task_id, paper_ids } => {
            let ids: Vec<String> = paper_ids.split(',').map(|s| s.trim().to_string()).collect();
            let state = engine.approve(&task_id, &ids).await?;
            let approved = state.candidate_papers.iter().filter(|p| p.is_approved).count();
            println!("approved {approved} paper(s). Run `scholar-forge resume --task-id {task_id}` to continue.");
        }
        Command::Resume { task_id } => {
            let state = engine.resume(&task_id).await?;
            print_draft(&state);
        }
        Command::Continue { task_id, message } => {
            let state = engine.continue_turn(&task_id, message).await?;
            print_draft(&state);
        }
        Command::Status { task_id } => {
            let state = engine.status(&task_id).await?;
            println!("task_id: {}", state.task_id);
            println!("retry_count: {}", state.retry_count);
            println!("qa_errors: {}", state.qa_errors.len());
            if let Some(cost) = &state.cost_summary {
                println!("cost_summary: {cost}");
            }
        }
        Command::Models => {
            for model in engine.models() {
                println!("{} ({}, {:?}, enabled={})", model.model_id, model.provider, model.cost_tier, model.enabled);
            }
        }
    }

    Ok(())
}

fn print_draft(state: &scholar_forge::SessionState) {
    match &state.final_draft {
        Some(draft) => {
            println!("# {}\n", draft.title);
            for section in &draft.sections {
                println!("## {}\n{}\n", section.heading, section.content);
            }
        }
        None => println!("no draft produced"),
    }
    if !state.qa_errors.is_empty() {
        println!("qa_errors (retry_count={}):", state.retry_count);
        for e in &state.qa_errors {
            println!("  - {e}");
        }
    }
}

fn parse_output_language(s: &str) -> Result<OutputLanguage> {
    match s.to_lowercase().as_str() {
        "en" => Ok(OutputLanguage::En),
        "zh" => Ok(OutputLanguage::Zh),
        other => anyhow::bail!("unsupported output language: {other} (expected en or zh)"),
    }
}

fn parse_sources(s: &str) -> Result<Vec<SourceTag>> {
    s.split(',')
        .map(|tag| match tag.trim().to_lowercase().as_str() {
            "arxiv" => Ok(SourceTag::Arxiv),
            "pubmed" => Ok(SourceTag::Pubmed),
            "semantic_scholar" => Ok(SourceTag::SemanticScholar),
            other => anyhow::bail!("unsupported source: {other}"),
        })
        .collect()
}

/// A handful of deterministic demo papers per source, standing in for a
/// real scholarly search API — no such adapter is in scope (§6 "Out of
/// scope"), so the CLI always searches against this fixture set.
fn demo_papers(tag: SourceTag) -> Vec<PaperMetadata> {
    let label = tag.as_str();
    (1..=5)
        .map(|i| {
            let mut paper = PaperMetadata::new(format!("{label}-{i}"), format!("{label} demo paper {i}"), tag);
            paper.abstract_text = Some(format!(
                "A demo abstract for {label} paper {i}, included for offline exploration of scholar-forge."
            ));
            paper
        })
        .collect()
}

fn build_engine(cli: &Cli) -> Result<Engine> {
    let config = EngineConfig::load_with_env(cli.config.as_ref())?;
    let constants = &config.constants;

    let registry = Arc::new(scholar_forge::router::load_registry(config.model_config_path.as_deref())?);
    let cost_ledger = Arc::new(CostLedger::new());
    let semaphores = Arc::new(LmSemaphores::new(
        config.concurrency.llm_concurrency,
        config.concurrency.claim_verification_concurrency,
        config.concurrency.fulltext_concurrency,
    ));

    let use_offline = cli.offline || config.llm.api_key_env.is_none();
    let backend: Arc<dyn LmBackend> = if use_offline {
        info!("running with the offline mock LM backend (no LLM_API_KEY configured)");
        Arc::new(MockLmBackend::with_fixed_response(
            r#"{"title": "Demo Draft", "sections": [{"heading": "Overview", "content": "This is an offline demo draft."}]}"#
                .to_string(),
        ))
    } else {
        let api_key = config
            .llm
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_default();
        let base_url = config.llm.base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Arc::new(ReqwestLmBackend::new(api_key, base_url))
    };

    let lm = Arc::new(LmAdapter::new(backend, registry.clone(), semaphores.clone(), cost_ledger.clone()));

    let mut source_registry = ScholarSourceRegistry::new();
    for tag in [SourceTag::Arxiv, SourceTag::Pubmed, SourceTag::SemanticScholar] {
        source_registry = source_registry.with(tag, Arc::new(MockScholarSourceAdapter::new(tag.as_str(), demo_papers(tag))));
    }
    let failure_tracker = Arc::new(scholar_forge::SourceFailureTracker::new(
        constants.source_skip_threshold,
        Duration::from_secs(constants.source_skip_window_seconds),
    ));

    let verification = if config.verification.enabled {
        Some(Arc::new(CitationPipeline::new(
            lm.clone(),
            semaphores.claim_verification.clone(),
            constants.claim_batch_size,
            None,
        )) as Arc<dyn scholar_forge::ClaimVerificationPipeline>)
    } else {
        None
    };

    let planner = Arc::new(DefaultPlanner::new(lm.clone(), constants.max_keywords, constants.max_conversation_turns));
    let retriever = Arc::new(DefaultRetriever::new(source_registry, failure_tracker));
    let extractor = Arc::new(DefaultExtractor::new(
        lm.clone(),
        Some(Arc::new(MockFullTextAdapter)),
        semaphores.clone(),
        constants.context_max_papers,
    ));
    let writer = Arc::new(DefaultWriter::new(
        lm.clone(),
        constants.context_max_papers,
        constants.context_overflow_warning_threshold,
        constants.context_token_budget,
        constants.max_conversation_turns,
    ));
    let critic = Arc::new(DefaultCritic::new(verification, constants.min_entailment_ratio));
    let reflection = Arc::new(DefaultReflection::new(lm));

    let store = Arc::new(FileCheckpointStore::new(cli.store_dir.clone()));

    Ok(Engine::new(
        store,
        planner,
        retriever,
        extractor,
        writer,
        critic,
        reflection,
        registry,
        cost_ledger,
        constants.max_qa_retries,
        Duration::from_secs(constants.workflow_timeout_seconds),
    ))
}
