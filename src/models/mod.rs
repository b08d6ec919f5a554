pub mod draft;
pub mod message;
pub mod paper;
pub mod plan;
pub mod reflection;
pub mod state;
pub mod verification;

pub use draft::{Draft, DraftOutline, DraftSection, FullDraft, FullDraftSection, MethodComparisonEntry, SectionDraft};
pub use message::{Message, MessageRole};
pub use paper::{PaperMetadata, SourceTag, StructuredContribution};
pub use plan::{prioritize_by_subquestions, FlatKeywordList, ResearchPlan, SubQuestion};
pub use reflection::{ErrorCategory, Reflection, ReflectionEntry, RetryTarget};
pub use state::{OutputLanguage, PartialStateUpdate, SessionState, SCHEMA_VERSION};
pub use verification::{
    Claim, ClaimBatch, ClaimVerificationRecord, ClaimVerificationSummary, EntailmentJudgment,
    EntailmentLabel, ExtractedClaim,
};
