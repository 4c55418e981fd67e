//! Wire and cache types for manifest content definitions.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Keyed collection of content definitions for one category, keyed by the
/// definition hash rendered as a string.
pub type EntityDictionary = BTreeMap<String, EntityRecord>;

/// The four definition tables the cache is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    Race,
    Class,
    Gender,
    Activity,
}

impl DefinitionKind {
    /// Name of the definition table as it appears in the manifest.
    pub fn table_name(&self) -> &'static str {
        match self {
            DefinitionKind::Race => "DestinyRaceDefinition",
            DefinitionKind::Class => "DestinyClassDefinition",
            DefinitionKind::Gender => "DestinyGenderDefinition",
            DefinitionKind::Activity => "DestinyActivityDefinition",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Top-level envelope returned by `GET /Platform/Destiny2/Manifest`.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEnvelope {
    #[serde(rename = "Response")]
    pub response: ManifestBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestBody {
    #[serde(rename = "jsonWorldComponentContentPaths")]
    pub json_world_component_content_paths: HashMap<String, HashMap<String, String>>,
}

/// Resolved definition paths for one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub language: String,
    pub activity: String,
    pub class: String,
    pub gender: String,
    pub race: String,
}

impl Manifest {
    pub fn path_for(&self, kind: DefinitionKind) -> &str {
        match kind {
            DefinitionKind::Race => &self.race,
            DefinitionKind::Class => &self.class,
            DefinitionKind::Gender => &self.gender,
            DefinitionKind::Activity => &self.activity,
        }
    }
}

/// Decodes an explicit JSON `null` the same way as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single content definition. Fields not listed here are dropped on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EntityRecord {
    #[serde(rename = "directActivityModeType", default)]
    pub mode: Option<i32>,
    #[serde(rename = "displayProperties", default, deserialize_with = "null_as_default")]
    pub display_properties: DisplayProperties,
    #[serde(
        rename = "originalDisplayProperties",
        default,
        deserialize_with = "null_as_default"
    )]
    pub original_display_properties: DisplayProperties,
    #[serde(rename = "releaseIcon", default, deserialize_with = "null_as_default")]
    pub release_icon: String,
    #[serde(rename = "releaseTime", default, deserialize_with = "null_as_default")]
    pub release_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DisplayProperties {
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub icon: String,
    #[serde(rename = "hasIcon", default, deserialize_with = "null_as_default")]
    pub has_icon: bool,
}
