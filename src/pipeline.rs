//! Fetch, filter, merge and persist stages of a cache refresh run.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{Instrument, info, info_span};

use crate::client::BungieClient;
use crate::error::{PipelineError, PipelineResult};
use crate::model::{DefinitionKind, EntityDictionary, Manifest};
use crate::store::{CacheStore, CacheWriter};

/// Mode value selecting which activities are kept.
pub const DEFAULT_ACTIVITY_MODE: i32 = 4;

/// Entries whose mode is present and equal to `target_mode`.
pub fn filter_by_mode(entities: &EntityDictionary, target_mode: i32) -> EntityDictionary {
    entities
        .iter()
        .filter(|(_, record)| record.mode == Some(target_mode))
        .map(|(key, record)| (key.clone(), record.clone()))
        .collect()
}

/// Union of `dictionaries`; on key collision the later dictionary wins.
pub fn merge<I>(dictionaries: I) -> EntityDictionary
where
    I: IntoIterator<Item = EntityDictionary>,
{
    let mut merged = EntityDictionary::new();
    for dictionary in dictionaries {
        merged.extend(dictionary);
    }
    merged
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub activity_mode: i32,
    pub sequential_fetch: bool,
    pub deadline: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            activity_mode: DEFAULT_ACTIVITY_MODE,
            sequential_fetch: false,
            deadline: Duration::from_secs(300),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub races: usize,
    pub classes: usize,
    pub genders: usize,
    pub activities: usize,
    pub activities_retained: usize,
    pub merged: usize,
    pub written: usize,
    pub elapsed: Duration,
}

/// Raw tables as downloaded, before filtering.
#[derive(Debug, Clone, Default)]
pub struct DefinitionSet {
    pub races: EntityDictionary,
    pub classes: EntityDictionary,
    pub genders: EntityDictionary,
    pub activities: EntityDictionary,
}

pub struct Pipeline<S> {
    client: BungieClient,
    writer: CacheWriter<S>,
    settings: PipelineSettings,
}

impl<S: CacheStore> Pipeline<S> {
    pub fn new(client: BungieClient, writer: CacheWriter<S>, settings: PipelineSettings) -> Self {
        Self {
            client,
            writer,
            settings,
        }
    }

    /// Run every stage under the configured deadline, starting now.
    pub async fn run(&mut self) -> PipelineResult<RunReport> {
        let deadline_at = Instant::now() + self.settings.deadline;
        self.run_until(deadline_at).await
    }

    /// Run every stage, failing once `deadline_at` passes.
    ///
    /// Callers that spend part of the budget before the pipeline starts pass
    /// the instant they computed, so the whole run shares one deadline.
    pub async fn run_until(&mut self, deadline_at: Instant) -> PipelineResult<RunReport> {
        let budget = self.settings.deadline;
        match tokio::time::timeout_at(deadline_at, self.run_stages()).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::DeadlineExceeded(budget)),
        }
    }

    async fn run_stages(&mut self) -> PipelineResult<RunReport> {
        let started = Instant::now();

        self.writer
            .clear()
            .instrument(info_span!("clear_cache"))
            .await?;

        let manifest = self
            .client
            .resolve_manifest()
            .instrument(info_span!("resolve_manifest", base_url = %self.client.base_url()))
            .await?;

        let definitions = self
            .fetch_definitions(&manifest)
            .instrument(info_span!("fetch_definitions", sequential = self.settings.sequential_fetch))
            .await?;

        let activities = {
            let _span = info_span!("filter_activities", mode = self.settings.activity_mode).entered();
            info!(count = definitions.activities.len(), "activities before filtering");
            let retained = filter_by_mode(&definitions.activities, self.settings.activity_mode);
            info!(count = retained.len(), "activities after filtering");
            retained
        };

        let mut report = RunReport {
            races: definitions.races.len(),
            classes: definitions.classes.len(),
            genders: definitions.genders.len(),
            activities: definitions.activities.len(),
            activities_retained: activities.len(),
            ..RunReport::default()
        };

        let DefinitionSet {
            races,
            classes,
            genders,
            ..
        } = definitions;
        let merged = merge([races, classes, genders, activities]);
        report.merged = merged.len();
        info!(count = report.merged, "definitions merged");

        report.written = self
            .writer
            .persist(&merged)
            .instrument(info_span!("persist"))
            .await?;
        report.elapsed = started.elapsed();
        Ok(report)
    }

    async fn fetch_definitions(&self, manifest: &Manifest) -> PipelineResult<DefinitionSet> {
        let client = &self.client;
        if self.settings.sequential_fetch {
            return Ok(DefinitionSet {
                races: client.fetch_entities(manifest, DefinitionKind::Race).await?,
                classes: client.fetch_entities(manifest, DefinitionKind::Class).await?,
                genders: client.fetch_entities(manifest, DefinitionKind::Gender).await?,
                activities: client.fetch_entities(manifest, DefinitionKind::Activity).await?,
            });
        }

        let (races, classes, genders, activities) = tokio::try_join!(
            client.fetch_entities(manifest, DefinitionKind::Race),
            client.fetch_entities(manifest, DefinitionKind::Class),
            client.fetch_entities(manifest, DefinitionKind::Gender),
            client.fetch_entities(manifest, DefinitionKind::Activity),
        )?;
        Ok(DefinitionSet {
            races,
            classes,
            genders,
            activities,
        })
    }
}
