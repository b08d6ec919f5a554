pub mod adapters;
pub mod agents;
pub mod citation;
pub mod config;
pub mod errors;
pub mod llm;
pub mod models;
pub mod resilience;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod streaming;

pub use adapters::{
    FullTextAdapter, MockFullTextAdapter, MockScholarSourceAdapter, MockVectorStoreAdapter, ScholarSourceAdapter,
    ScholarSourceRegistry, VectorSearchHit, VectorStoreAdapter,
};
pub use agents::{
    ClaimVerificationPipeline, Critic, DefaultCritic, DefaultExtractor, DefaultPlanner, DefaultReflection,
    DefaultRetriever, DefaultWriter, Extractor, Planner, Reflection as ReflectionAgent, Retriever, Writer,
};
pub use citation::CitationPipeline;
pub use config::{ConcurrencyConfig, EngineConfig, EngineConstants, LlmConfig, VerificationConfig};
pub use llm::{ChatMessage, ChatRole, CostLedger, LmAdapter, LmSemaphores, MockLmBackend, ReqwestLmBackend};
pub use models::{
    Draft, DraftOutline, DraftSection, OutputLanguage, PaperMetadata, PartialStateUpdate, ResearchPlan,
    SessionState, SourceTag,
};
pub use resilience::{CircuitBreaker, SourceFailureTracker};
pub use router::{ModelConfig, ModelRegistry, TaskType};
pub use scheduler::{Engine, EngineError, SchedulerEvent};
pub use store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
