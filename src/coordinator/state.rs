//! Join state record and the versioned store contract it lives behind
//!
//! Stores:
//! - One `ClusterJoinState` per cluster key
//! - A monotonically increasing version per record, used for conditional writes

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::common::{Error, Result};

/// Node identifier: `<instance>[:<host>][:<public address>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentifier {
    raw: String,
}

impl NodeIdentifier {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidRequest("node identifier wasn't supplied".into()));
        }
        if raw.split(':').next().map_or(true, str::is_empty) {
            return Err(Error::InvalidRequest(format!(
                "node identifier {raw:?} has no instance name"
            )));
        }
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    /// Pool-level instance name; the membership key
    pub fn instance_name(&self) -> &str {
        instance_name_of(&self.raw)
    }

    /// Host name used by the cluster software
    pub fn host_name(&self) -> &str {
        self.raw
            .split(':')
            .nth(1)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.instance_name())
    }

    pub fn public_address(&self) -> Option<&str> {
        self.raw.split(':').nth(2).filter(|s| !s.is_empty())
    }

    /// Index within the compute pool, from a `<pool>_<index>` instance name
    pub fn pool_index(&self) -> Option<u32> {
        let (_, index) = self.instance_name().rsplit_once('_')?;
        index.parse().ok()
    }

    /// Attach a resolved public address
    pub fn with_public_address(&self, address: &str) -> Self {
        let mut parts = self.raw.split(':');
        let instance = parts.next().unwrap_or_default();
        let host = parts.next().unwrap_or(instance);
        Self {
            raw: format!("{instance}:{host}:{address}"),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn instance_name_of(raw: &str) -> &str {
    raw.split(':').next().unwrap_or(raw)
}

/// The single shared record per cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterJoinState {
    /// Registered identifiers, in commit order
    pub instances: Vec<String>,
    pub expected_size: usize,
}

impl ClusterJoinState {
    pub fn new(expected_size: usize) -> Self {
        Self {
            instances: Vec::with_capacity(expected_size),
            expected_size,
        }
    }

    pub fn is_full(&self) -> bool {
        self.instances.len() >= self.expected_size
    }

    /// Position (0-based) of the node with this instance name
    pub fn position_of(&self, node: &NodeIdentifier) -> Option<usize> {
        self.instances
            .iter()
            .position(|entry| instance_name_of(entry) == node.instance_name())
    }

    pub fn contains(&self, node: &NodeIdentifier) -> bool {
        self.position_of(node).is_some()
    }

    /// Whether this node's registration is the one that filled the record
    pub fn closed_by(&self, node: &NodeIdentifier) -> bool {
        self.is_full() && self.position_of(node) == Some(self.instances.len() - 1)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = Result<NodeIdentifier>> + '_ {
        self.instances.iter().map(|s| NodeIdentifier::parse(s))
    }
}

/// A value together with the store version it was read at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { version: u64 },
    Conflict,
}

/// Key-value store with conditional (version-checked) writes
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Versioned<ClusterJoinState>>>;

    /// Write only if the record is still at `expected` (`None` = must not exist)
    async fn write_if_version(
        &self,
        key: &str,
        value: &ClusterJoinState,
        expected: Option<u64>,
    ) -> Result<WriteOutcome>;
}

/// In-process store for tests and single-instance runs
#[derive(Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, Versioned<ClusterJoinState>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Versioned<ClusterJoinState>>>> {
        self.records
            .lock()
            .map_err(|_| Error::StoreUnavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn read(&self, key: &str) -> Result<Option<Versioned<ClusterJoinState>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn write_if_version(
        &self,
        key: &str,
        value: &ClusterJoinState,
        expected: Option<u64>,
    ) -> Result<WriteOutcome> {
        let mut records = self.lock()?;
        let current = records.get(key).map(|r| r.version);
        if current != expected {
            return Ok(WriteOutcome::Conflict);
        }
        let version = current.map_or(1, |v| v + 1);
        records.insert(
            key.to_string(),
            Versioned {
                value: value.clone(),
                version,
            },
        );
        Ok(WriteOutcome::Written { version })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_parts() {
        let id = NodeIdentifier::parse("pfx-c-vmss_3:node-3:20.1.2.3").unwrap();
        assert_eq!(id.instance_name(), "pfx-c-vmss_3");
        assert_eq!(id.host_name(), "node-3");
        assert_eq!(id.public_address(), Some("20.1.2.3"));
        assert_eq!(id.pool_index(), Some(3));

        let bare = NodeIdentifier::parse("solo").unwrap();
        assert_eq!(bare.host_name(), "solo");
        assert_eq!(bare.public_address(), None);
        assert_eq!(bare.pool_index(), None);
    }

    #[test]
    fn test_identifier_rejects_empty() {
        assert!(NodeIdentifier::parse("").is_err());
        assert!(NodeIdentifier::parse("   ").is_err());
        assert!(NodeIdentifier::parse(":host").is_err());
    }

    #[test]
    fn test_with_public_address() {
        let id = NodeIdentifier::parse("vmss_0:host-0").unwrap();
        assert_eq!(id.with_public_address("1.2.3.4").as_str(), "vmss_0:host-0:1.2.3.4");

        let bare = NodeIdentifier::parse("vmss_1").unwrap();
        assert_eq!(bare.with_public_address("1.2.3.5").as_str(), "vmss_1:vmss_1:1.2.3.5");
    }

    #[test]
    fn test_membership_by_instance_name() {
        let mut state = ClusterJoinState::new(2);
        state.instances.push("vmss_0:host-0:1.1.1.1".to_string());

        let retry = NodeIdentifier::parse("vmss_0:host-0").unwrap();
        assert!(state.contains(&retry));
        assert!(!state.is_full());

        state.instances.push("vmss_1:host-1".to_string());
        let other = NodeIdentifier::parse("vmss_1:host-1").unwrap();
        assert!(state.closed_by(&other));
        assert!(!state.closed_by(&retry));
    }

    #[tokio::test]
    async fn test_memory_store_versions() {
        let store = MemoryStateStore::new();
        let state = ClusterJoinState::new(3);

        assert!(store.read("c").await.unwrap().is_none());
        assert_eq!(
            store.write_if_version("c", &state, None).await.unwrap(),
            WriteOutcome::Written { version: 1 }
        );
        // Create-if-absent fails once the record exists
        assert_eq!(
            store.write_if_version("c", &state, None).await.unwrap(),
            WriteOutcome::Conflict
        );
        // Stale version
        assert_eq!(
            store.write_if_version("c", &state, Some(7)).await.unwrap(),
            WriteOutcome::Conflict
        );
        assert_eq!(
            store.write_if_version("c", &state, Some(1)).await.unwrap(),
            WriteOutcome::Written { version: 2 }
        );
        assert_eq!(store.read("c").await.unwrap().unwrap().version, 2);
    }
}
