// ABOUTME: Shared plumbing for the arena binary: context bootstrap, challenge files, output
// ABOUTME: Kept in a library so the command handlers stay thin and testable

pub mod challenges;
pub mod context;
pub mod output;

pub use context::{AppContext, ContextError};

/// Install the global tracing subscriber. Honors `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .try_init();
}
