//! Static, configuration-driven collaborators
//!
//! Addresses and secrets come from the `[inventory]` config section.
//! Containers and grants are tracked in memory so repeated assembly runs see
//! the effects of earlier ones.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::cloud::{AccessControl, NodeAddressResolver, ObjectStorageProvisioner, SecretResolver};
use crate::common::{Error, InventoryConfig, Result};

/// A recorded data-access grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub pool_identity: String,
    pub account: String,
    pub container: String,
}

pub struct Inventory {
    config: InventoryConfig,
    containers: Mutex<HashMap<(String, String), String>>,
    grants: Mutex<Vec<Grant>>,
}

impl Inventory {
    pub fn new(config: InventoryConfig) -> Self {
        Self {
            config,
            containers: Mutex::new(HashMap::new()),
            grants: Mutex::new(Vec::new()),
        }
    }

    pub fn grants(&self) -> Vec<Grant> {
        self.grants.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().map(|c| c.len()).unwrap_or_default()
    }

    fn generate_access_key() -> String {
        let mut bytes = [0u8; 48];
        rand::thread_rng().fill_bytes(&mut bytes);
        STANDARD.encode(bytes)
    }
}

#[async_trait]
impl NodeAddressResolver for Inventory {
    async fn resolve_public_address(&self, pool: &str, node_index: u32) -> Result<String> {
        self.config
            .public_addresses
            .get(&node_index.to_string())
            .cloned()
            .ok_or_else(|| {
                Error::Provider(format!("no public address for {pool} index {node_index}"))
            })
    }

    async fn resolve_private_addresses(&self, _pool: &str) -> Result<HashMap<String, String>> {
        Ok(self.config.private_addresses.clone())
    }
}

#[async_trait]
impl ObjectStorageProvisioner for Inventory {
    async fn create_container(&self, account: &str, container: &str) -> Result<String> {
        if account.is_empty() || container.is_empty() {
            return Err(Error::Provider("account and container names are required".into()));
        }
        let mut containers = self
            .containers
            .lock()
            .map_err(|_| Error::Internal("container registry lock poisoned".into()))?;
        let key = containers
            .entry((account.to_string(), container.to_string()))
            .or_insert_with(|| {
                tracing::info!(account, container, "Provisioned object storage container");
                Self::generate_access_key()
            });
        Ok(key.clone())
    }
}

#[async_trait]
impl AccessControl for Inventory {
    async fn grant_data_access(
        &self,
        pool_identity: &str,
        account: &str,
        container: &str,
    ) -> Result<()> {
        let grant = Grant {
            pool_identity: pool_identity.to_string(),
            account: account.to_string(),
            container: container.to_string(),
        };
        let mut grants = self
            .grants
            .lock()
            .map_err(|_| Error::Internal("grant registry lock poisoned".into()))?;
        if !grants.contains(&grant) {
            grants.push(grant);
        }
        Ok(())
    }
}

#[async_trait]
impl SecretResolver for Inventory {
    async fn get_secret(&self, vault_uri: &str, name: &str) -> Result<String> {
        self.config
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Secret {
                name: name.to_string(),
                reason: format!("not present in {vault_uri}"),
            })
    }
}
