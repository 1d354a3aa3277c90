//! Instance descriptors and the master-side slave registry

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

/// Address and public RPC token of one scanner instance.
///
/// Instances are identified purely at the RPC-address level; the grid never
/// shares in-memory handles between processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub url: String,
    pub token: String,
}

impl InstanceInfo {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }

    /// Reject descriptors missing either required field.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::MissingField("url".to_string()));
        }
        if self.token.trim().is_empty() {
            return Err(Error::MissingField("token".to_string()));
        }
        Ok(())
    }
}

/// Tracks enslaved instances and which of them have finished their share.
#[derive(Debug, Default, Clone)]
pub struct InstanceRegistry {
    instances: Vec<InstanceInfo>,
    done: HashSet<String>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new slave. Duplicate URLs are ignored.
    pub fn add(&mut self, instance: InstanceInfo) {
        if !self.instances.iter().any(|i| i.url == instance.url) {
            self.instances.push(instance);
        }
    }

    pub fn list(&self) -> &[InstanceInfo] {
        &self.instances
    }

    pub fn get(&self, url: &str) -> Option<&InstanceInfo> {
        self.instances.iter().find(|i| i.url == url)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Record that a slave finished. Idempotent over the done set.
    pub fn mark_done(&mut self, url: &str) {
        if self.instances.iter().any(|i| i.url == url) {
            self.done.insert(url.to_string());
        }
    }

    pub fn is_done(&self, url: &str) -> bool {
        self.done.contains(url)
    }

    pub fn running(&self) -> Vec<&InstanceInfo> {
        self.instances
            .iter()
            .filter(|i| !self.done.contains(&i.url))
            .collect()
    }

    /// True once every registered slave has reported done.
    pub fn all_done(&self) -> bool {
        self.instances.iter().all(|i| self.done.contains(&i.url))
    }
}
