// ABOUTME: Shared configuration for the arena orchestrator
// ABOUTME: Environment variable names and the parsed OrchestratorConfig

pub mod constants;
pub mod settings;

pub use settings::{ConfigError, OrchestratorConfig, ProviderKind};
