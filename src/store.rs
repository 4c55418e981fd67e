//! Destination key-value store and the writer that replaces its contents.

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::error::{PipelineError, PipelineResult};
use crate::model::EntityDictionary;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error("could not encode value: {0}")]
    Encode(#[from] serde_json::Error),

    /// Failure reported by a store other than Redis
    #[error("{0}")]
    Backend(String),
}

/// Minimal surface the cache writer needs from a key-value store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Remove every key in the store.
    async fn flush_all(&mut self) -> Result<(), StoreError>;

    /// Store `value` under `key` with no expiry.
    async fn set(&mut self, key: &str, value: String) -> Result<(), StoreError>;
}

/// Redis-backed store using a multiplexed async connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("connected to redis");
        Ok(Self { conn })
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn flush_all(&mut self) -> Result<(), StoreError> {
        let _: () = redis::cmd("FLUSHALL").query_async(&mut self.conn).await?;
        Ok(())
    }

    async fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }
}

/// What to do when a single key cannot be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteFailurePolicy {
    /// Stop at the first failing key
    #[default]
    Abort,
    /// Attempt every key, then report the first failure
    Continue,
}

impl fmt::Display for WriteFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteFailurePolicy::Abort => write!(f, "abort"),
            WriteFailurePolicy::Continue => write!(f, "continue"),
        }
    }
}

/// Replaces the cache contents with a merged dictionary.
pub struct CacheWriter<S> {
    store: S,
    policy: WriteFailurePolicy,
}

impl<S: CacheStore> CacheWriter<S> {
    pub fn new(store: S, policy: WriteFailurePolicy) -> Self {
        Self { store, policy }
    }

    /// Flush the store, then write every entry. Nothing is written if the flush fails.
    pub async fn reset_and_persist(&mut self, entities: &EntityDictionary) -> PipelineResult<usize> {
        self.clear().await?;
        self.persist(entities).await
    }

    pub async fn clear(&mut self) -> PipelineResult<()> {
        self.store.flush_all().await.map_err(|source| {
            error!(error = %source, "cache flush failed");
            PipelineError::Flush { source }
        })?;
        info!("cache cleared");
        Ok(())
    }

    /// Write each entry as JSON under its own key, in ascending key order.
    ///
    /// Returns the number of keys written.
    pub async fn persist(&mut self, entities: &EntityDictionary) -> PipelineResult<usize> {
        info!(count = entities.len(), policy = %self.policy, "saving entries to cache");

        let mut written = 0usize;
        let mut first_failure: Option<(String, StoreError)> = None;
        let mut failed = 0usize;

        for (key, record) in entities {
            let outcome = match serde_json::to_string(record) {
                Ok(value) => self.store.set(key, value).await,
                Err(e) => Err(StoreError::from(e)),
            };

            match outcome {
                Ok(()) => {
                    debug!(key = %key, "cache entry written");
                    written += 1;
                }
                Err(source) => {
                    error!(key = %key, error = %source, "cache write failed");
                    failed += 1;
                    if self.policy == WriteFailurePolicy::Abort {
                        return Err(PipelineError::Write {
                            key: key.clone(),
                            failed,
                            source,
                        });
                    }
                    if first_failure.is_none() {
                        first_failure = Some((key.clone(), source));
                    }
                }
            }
        }

        if let Some((key, source)) = first_failure {
            return Err(PipelineError::Write {
                key,
                failed,
                source,
            });
        }

        info!(written, "finished saving entries to cache");
        Ok(written)
    }
}
