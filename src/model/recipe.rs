//! Recipe definitions as loaded from recipe files.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::hashing::sha256_hex;

/// Named variables passed between recipe steps.
///
/// BTreeMap keeps serialization order stable, which trust hashing relies on.
pub type Variables = BTreeMap<String, serde_json::Value>;

/// Every known recipe, keyed by identifier.
pub type RecipeSet = BTreeMap<RecipeId, RecipeDefinition>;

/// Unique recipe identifier, e.g. `com.github.autopkg.download.Firefox`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipeId(String);

impl RecipeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecipeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecipeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One step of a recipe's `Process` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorStep {
    #[serde(rename = "Processor")]
    pub processor: String,
    #[serde(rename = "Arguments", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: Variables,
}

impl ProcessorStep {
    pub fn new(processor: impl Into<String>) -> Self {
        Self {
            processor: processor.into(),
            arguments: Variables::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Processor name without the providing recipe prefix.
    pub fn name(&self) -> &str {
        match self.processor.rsplit_once('/') {
            Some((_, name)) => name,
            None => &self.processor,
        }
    }

    /// Recipe that ships this processor, for `recipe.id/Processor` references.
    pub fn provider(&self) -> Option<RecipeId> {
        self.processor
            .rsplit_once('/')
            .map(|(provider, _)| RecipeId::from(provider))
    }
}

/// Recorded hashes of a recipe and every recipe in its parent chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustInfo {
    /// Hash of the recipe itself.
    #[serde(default)]
    pub sha256: String,
    /// Hash of each ancestor, keyed by identifier.
    #[serde(default)]
    pub parent_recipes: BTreeMap<RecipeId, String>,
}

/// A recipe as found on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecipeDefinition {
    pub identifier: RecipeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_recipe: Option<RecipeId>,
    #[serde(default)]
    pub input: Variables,
    #[serde(default)]
    pub process: Vec<ProcessorStep>,
    #[serde(
        default,
        alias = "ParentRecipeTrustInfo",
        skip_serializing_if = "Option::is_none"
    )]
    pub trust_info: Option<TrustInfo>,
}

impl RecipeDefinition {
    pub fn new(identifier: impl Into<RecipeId>) -> Self {
        Self {
            identifier: identifier.into(),
            description: None,
            parent_recipe: None,
            input: Variables::new(),
            process: Vec::new(),
            trust_info: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<RecipeId>) -> Self {
        self.parent_recipe = Some(parent.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.input.insert(key.into(), value.into());
        self
    }

    pub fn with_step(mut self, step: ProcessorStep) -> Self {
        self.process.push(step);
        self
    }

    pub fn with_trust(mut self, trust: TrustInfo) -> Self {
        self.trust_info = Some(trust);
        self
    }

    /// Hash of the recipe content, excluding its own trust record.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        let unsigned = RecipeDefinition {
            trust_info: None,
            ..self.clone()
        };
        // Struct fields serialize in declaration order and maps are BTreeMaps,
        // so the JSON form is canonical.
        let canonical = serde_json::to_vec(&unsigned)?;
        Ok(sha256_hex(canonical))
    }

    /// Providers of shared processors referenced by this recipe's own steps.
    pub fn providers(&self) -> Vec<RecipeId> {
        let mut providers: Vec<RecipeId> = self
            .process
            .iter()
            .filter_map(ProcessorStep::provider)
            .filter(|p| p != &self.identifier)
            .collect();
        providers.sort();
        providers.dedup();
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_name_and_provider() {
        let step = ProcessorStep::new("com.example.shared/VersionSplitter");
        assert_eq!(step.name(), "VersionSplitter");
        assert_eq!(step.provider(), Some(RecipeId::from("com.example.shared")));

        let core = ProcessorStep::new("URLDownloader");
        assert_eq!(core.name(), "URLDownloader");
        assert!(core.provider().is_none());
    }

    #[test]
    fn test_content_hash_ignores_trust_info() {
        let plain = RecipeDefinition::new("a").with_input("NAME", "Firefox");
        let trusted = plain.clone().with_trust(TrustInfo {
            sha256: "deadbeef".into(),
            parent_recipes: BTreeMap::new(),
        });
        assert_eq!(plain.content_hash().unwrap(), trusted.content_hash().unwrap());
    }

    #[test]
    fn test_content_hash_changes_with_content() {
        let a = RecipeDefinition::new("a").with_input("NAME", "Firefox");
        let b = RecipeDefinition::new("a").with_input("NAME", "Chrome");
        assert_ne!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn test_content_hash_is_sha256_of_canonical_json() {
        let recipe = RecipeDefinition::new("a").with_input("NAME", "Firefox");
        let hash = recipe.content_hash().unwrap();
        assert_eq!(hash, sha256_hex(serde_json::to_vec(&recipe).unwrap()));
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, sha256_hex(Vec::new()));
    }

    #[test]
    fn test_parse_autopkg_yaml() {
        let yaml = r#"
Identifier: com.example.munki.Firefox
ParentRecipe: com.example.download.Firefox
MinimumVersion: "2.3"
Input:
  NAME: Firefox
  pkginfo:
    catalogs: [testing]
Process:
  - Processor: MunkiImporter
    Arguments:
      repo_subdirectory: apps
  - Processor: com.example.shared/VersionSplitter
"#;
        let recipe: RecipeDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(recipe.identifier.as_str(), "com.example.munki.Firefox");
        assert_eq!(
            recipe.parent_recipe,
            Some(RecipeId::from("com.example.download.Firefox"))
        );
        assert_eq!(recipe.input["NAME"], serde_json::json!("Firefox"));
        assert_eq!(recipe.process.len(), 2);
        assert_eq!(recipe.providers(), vec![RecipeId::from("com.example.shared")]);
        assert!(recipe.trust_info.is_none());
    }
}
