//! HTTP access to the Bungie manifest and its definition tables.

use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::model::{DefinitionKind, EntityDictionary, Manifest, ManifestEnvelope};

pub const MANIFEST_PATH: &str = "/Platform/Destiny2/Manifest";
const API_KEY_HEADER: &str = "x-api-key";

/// Join a base URL and an absolute resource path with exactly one `/` between them.
pub fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[derive(Debug, Clone)]
pub struct BungieClient {
    base_url: String,
    language: String,
    client: reqwest::Client,
}

impl BungieClient {
    pub fn new(
        base_url: impl Into<String>,
        language: impl Into<String>,
        api_key: Option<&str>,
        request_timeout: Duration,
    ) -> PipelineResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let mut value = HeaderValue::from_str(key).map_err(|e| PipelineError::Client {
                component: "http client",
                reason: format!("invalid API key header: {e}"),
            })?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| PipelineError::Client {
                component: "http client",
                reason: e.to_string(),
            })?;

        Ok(Self {
            base_url: base_url.into(),
            language: language.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path taken verbatim from the manifest.
    pub fn resource_url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Fetch the manifest and select the definition paths for the configured language.
    pub async fn resolve_manifest(&self) -> PipelineResult<Manifest> {
        let url = self.resource_url(MANIFEST_PATH);
        let envelope: ManifestEnvelope = self.get_json("manifest", &url).await?;

        let mut languages = envelope.response.json_world_component_content_paths;
        let mut paths = languages.remove(&self.language).ok_or_else(|| {
            PipelineError::decode(
                "manifest",
                &url,
                format!("no content paths for language '{}'", self.language),
            )
        })?;

        let mut take = |kind: DefinitionKind| {
            paths.remove(kind.table_name()).ok_or_else(|| {
                PipelineError::decode(
                    "manifest",
                    &url,
                    format!("language '{}' has no {} path", self.language, kind),
                )
            })
        };

        let manifest = Manifest {
            language: self.language.clone(),
            activity: take(DefinitionKind::Activity)?,
            class: take(DefinitionKind::Class)?,
            gender: take(DefinitionKind::Gender)?,
            race: take(DefinitionKind::Race)?,
        };

        info!(language = %manifest.language, "manifest resolved");
        Ok(manifest)
    }

    /// Download one definition table referenced by the manifest.
    pub async fn fetch_entities(
        &self,
        manifest: &Manifest,
        kind: DefinitionKind,
    ) -> PipelineResult<EntityDictionary> {
        let url = self.resource_url(manifest.path_for(kind));
        let entities: EntityDictionary = self.get_json(kind.table_name(), &url).await?;
        info!(definition = %kind, count = entities.len(), "definitions fetched");
        Ok(entities)
    }

    async fn get_json<T: DeserializeOwned>(&self, resource: &str, url: &str) -> PipelineResult<T> {
        debug!(resource, url, "requesting");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::fetch(resource, url, e))?;

        let status = resp.status();
        if !status.is_success() {
            warn!(resource, url, status = status.as_u16(), "request rejected");
            return Err(PipelineError::fetch(
                resource,
                url,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::fetch(resource, url, e))?;
        debug!(resource, bytes = body.len(), "response received");

        serde_json::from_slice(&body).map_err(|e| PipelineError::decode(resource, url, e))
    }
}
