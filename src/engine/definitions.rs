//! Process-definition cache.
//!
//! Deployed definitions are immutable and shared via `Arc`. Deployment is
//! de-duplicated by content digest: redeploying identical content returns
//! the existing version, changed content bumps the version. Call
//! activities resolve the latest version of a process id at activation
//! time.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::domain::{DeployedDefinition, ProcessDefinition};

/// All deployed definitions, addressable by key and by process id.
#[derive(Debug, Clone, Default)]
pub struct DefinitionCache {
    by_key: HashMap<u64, DeployedDefinition>,
    /// Process id → definition keys, in version order
    versions: HashMap<String, Vec<u64>>,
    next_key: u64,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            versions: HashMap::new(),
            next_key: 1,
        }
    }

    /// Deploy a definition. Validates it, then assigns a key and version
    /// unless identical content is already deployed.
    pub fn deploy(&mut self, definition: ProcessDefinition) -> Result<DeployedDefinition> {
        definition
            .validate()
            .with_context(|| format!("Invalid process definition '{}'", definition.id))?;

        let digest = content_digest(&definition)?;

        if let Some(latest) = self.latest_by_id(&definition.id) {
            if latest.digest == digest {
                return Ok(latest.clone());
            }
        }

        let keys = self.versions.entry(definition.id.clone()).or_default();
        let deployed = DeployedDefinition {
            key: self.next_key,
            version: keys.len() as u32 + 1,
            digest,
            definition: Arc::new(definition),
        };
        keys.push(deployed.key);
        self.by_key.insert(deployed.key, deployed.clone());
        self.next_key += 1;

        Ok(deployed)
    }

    /// The latest deployed version of a process id.
    pub fn latest_by_id(&self, id: &str) -> Option<&DeployedDefinition> {
        let key = self.versions.get(id)?.last()?;
        self.by_key.get(key)
    }

    pub fn by_key(&self, key: u64) -> Option<&DeployedDefinition> {
        self.by_key.get(&key)
    }

    /// Every latest version, ordered by process id.
    pub fn latest_versions(&self) -> Vec<&DeployedDefinition> {
        let mut ids: Vec<_> = self.versions.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.latest_by_id(id))
            .collect()
    }
}

/// Digest of the canonical JSON rendering of a definition.
fn content_digest(definition: &ProcessDefinition) -> Result<String> {
    let canonical =
        serde_json::to_vec(definition).context("Failed to serialize definition for digest")?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(id: &str) -> ProcessDefinition {
        ProcessDefinition::from_yaml(&format!(
            r#"
id: {id}
elements:
  - id: start
    kind: start_event
"#
        ))
        .unwrap()
    }

    #[test]
    fn test_deploy_assigns_key_and_version() {
        let mut cache = DefinitionCache::new();
        let deployed = cache.deploy(minimal("order")).unwrap();

        assert_eq!(deployed.key, 1);
        assert_eq!(deployed.version, 1);
        assert!(cache.by_key(1).is_some());
    }

    #[test]
    fn test_identical_content_is_deduplicated() {
        let mut cache = DefinitionCache::new();
        let first = cache.deploy(minimal("order")).unwrap();
        let second = cache.deploy(minimal("order")).unwrap();

        assert_eq!(first.key, second.key);
        assert_eq!(first.digest, second.digest);
        assert_eq!(second.version, 1);
    }

    #[test]
    fn test_changed_content_bumps_version() {
        let mut cache = DefinitionCache::new();
        let first = cache.deploy(minimal("order")).unwrap();

        let mut changed = minimal("order");
        changed.elements[0].id = "begin".to_string();
        let second = cache.deploy(changed).unwrap();

        assert_ne!(first.key, second.key);
        assert_eq!(second.version, 2);
        assert_eq!(cache.latest_by_id("order").unwrap().key, second.key);
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let mut cache = DefinitionCache::new();
        let definition = ProcessDefinition {
            id: String::new(),
            elements: Vec::new(),
        };
        assert!(cache.deploy(definition).is_err());
    }
}
