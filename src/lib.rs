pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod store;

pub use client::BungieClient;
pub use config::{CliArgs, RunConfig};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use logging::{LoggingConfig, init_logging};
pub use model::{DefinitionKind, EntityDictionary, EntityRecord, Manifest};
pub use pipeline::{Pipeline, PipelineSettings, RunReport, filter_by_mode, merge};
pub use store::{CacheStore, CacheWriter, RedisStore, StoreError, WriteFailurePolicy};

/// Connect to the configured store and API, then refresh the cache once.
pub async fn run(config: &RunConfig) -> PipelineResult<RunReport> {
    let client = BungieClient::new(
        config.base_url.clone(),
        config.language.clone(),
        config.api_key.as_deref(),
        config.request_timeout(),
    )?;

    let settings = config.pipeline_settings();
    let budget = settings.deadline;
    let deadline_at = tokio::time::Instant::now() + budget;
    let store =
        match tokio::time::timeout_at(deadline_at, RedisStore::connect(&config.redis_url)).await {
            Ok(Ok(store)) => store,
            Ok(Err(source)) => return Err(PipelineError::Connect { source }),
            Err(_) => return Err(PipelineError::DeadlineExceeded(budget)),
        };

    tracing::info!(
        base_url = %config.base_url,
        language = %config.language,
        activity_mode = config.activity_mode,
        policy = %config.write_failure_policy,
        "starting cache refresh"
    );

    let writer = CacheWriter::new(store, config.write_failure_policy);
    let mut pipeline = Pipeline::new(client, writer, settings);
    pipeline.run_until(deadline_at).await
}
