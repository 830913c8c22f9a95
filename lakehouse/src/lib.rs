pub mod processor;
pub mod schema;
pub mod services;
pub mod storage;
pub mod utils;

use common::Result;
use common::config::{LoggingConfig, Settings};
use processor::StageReport;
use services::{PipelineService, Stage};
use std::sync::Once;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static LOGGING: Once = Once::new();

/// Installs the global subscriber once. `RUST_LOG` wins over the configured level.
pub fn init_logging(logging: &LoggingConfig) {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&logging.level));

        let registry = tracing_subscriber::registry().with(filter);
        let result = if logging.json {
            registry.with(fmt::layer().json()).try_init()
        } else {
            registry.with(fmt::layer().with_target(false)).try_init()
        };
        if let Err(e) = result {
            eprintln!("Logging already initialized: {}", e);
        }
    });
}

/// Loads the settings at `config_path` and runs `stages` in order
pub async fn run_lakehouse_pipeline(config_path: &str, stages: &[Stage]) -> Result<Vec<StageReport>> {
    let settings = Settings::new(config_path)?;
    init_logging(&settings.logging);
    info!(config = config_path, stages = stages.len(), "Loaded configuration");

    PipelineService::new(settings)?.run(stages).await
}
