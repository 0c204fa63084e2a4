//! External collaborators consumed during registration and assembly
//!
//! Each boundary is a narrow async trait. `inventory` provides a
//! configuration-driven implementation of all of them.

pub mod inventory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::Result;

pub use inventory::Inventory;

/// Node network identity lookup
#[async_trait]
pub trait NodeAddressResolver: Send + Sync {
    async fn resolve_public_address(&self, pool: &str, node_index: u32) -> Result<String>;

    /// Instance name -> private address, for every node in the pool
    async fn resolve_private_addresses(&self, pool: &str) -> Result<HashMap<String, String>>;
}

/// Object storage container provisioning. Must be idempotent.
#[async_trait]
pub trait ObjectStorageProvisioner: Send + Sync {
    /// Returns the access credential for the container
    async fn create_container(&self, account: &str, container: &str) -> Result<String>;
}

#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn grant_data_access(&self, pool_identity: &str, account: &str, container: &str)
        -> Result<()>;
}

#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn get_secret(&self, vault_uri: &str, name: &str) -> Result<String>;
}

/// The full set of collaborators a coordinator needs
#[derive(Clone)]
pub struct Providers {
    pub addresses: Arc<dyn NodeAddressResolver>,
    pub object_storage: Arc<dyn ObjectStorageProvisioner>,
    pub access: Arc<dyn AccessControl>,
    pub secrets: Arc<dyn SecretResolver>,
}

impl Providers {
    /// Back every collaborator with one shared inventory
    pub fn from_inventory(inventory: Arc<Inventory>) -> Self {
        Self {
            addresses: inventory.clone(),
            object_storage: inventory.clone(),
            access: inventory.clone(),
            secrets: inventory,
        }
    }
}
