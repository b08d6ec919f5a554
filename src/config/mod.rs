pub mod settings;

pub use settings::{ConcurrencyConfig, EngineConfig, EngineConstants, LlmConfig, VerificationConfig};
