pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod perception;
pub mod planner;
pub mod telemetry;

/// Process-level setup: env filter from `RUST_LOG` (default `info`) and a
/// `.env` file if one is present. Call once from the embedding binary.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();
}
