//! Configuration for the clusterize coordinator
//!
//! Loaded from an optional TOML file, then overlaid with `CLUSTERIZE__`
//! prefixed environment variables (`CLUSTERIZE__CLUSTER__HOSTS_NUM=6`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{Error, Result};

/// Environment prefix for config overrides
pub const ENV_PREFIX: &str = "CLUSTERIZE";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cluster: ClusterConfig,
    pub tiering: TieringConfig,
    pub secrets: SecretsConfig,
    pub store: StoreConfig,
    pub report: ReportConfig,
    pub inventory: InventoryConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cluster: ClusterConfig::default(),
            tiering: TieringConfig::default(),
            secrets: SecretsConfig::default(),
            store: StoreConfig::default(),
            report: ReportConfig::default(),
            inventory: InventoryConfig::default(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP invocation endpoint
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7070)),
        }
    }
}

/// Cluster scoping and formation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub name: String,
    /// Resource prefix, used to derive the pool name
    pub prefix: String,
    /// Expected number of nodes in the pool
    pub hosts_num: usize,
    /// Drives per node
    pub nvmes_num: usize,
    pub install_dpdk: bool,
    pub smbw_enabled: bool,
    pub frontend_containers: u32,
    pub proxy_url: Option<String>,
    pub home_url: Option<String>,
    pub data_protection: DataProtectionConfig,
    /// Name of the clustering binary invoked by generated scripts
    pub binary: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "cluster".to_string(),
            prefix: "clusterize".to_string(),
            hosts_num: 6,
            nvmes_num: 1,
            install_dpdk: true,
            smbw_enabled: false,
            frontend_containers: 0,
            proxy_url: None,
            home_url: None,
            data_protection: DataProtectionConfig::default(),
            binary: "weka".to_string(),
        }
    }
}

impl ClusterConfig {
    /// Name of the compute pool (scale set) hosting the nodes
    pub fn pool_name(&self) -> String {
        format!("{}-{}-vmss", self.prefix, self.name)
    }
}

/// Zero means "let the cluster software pick"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataProtectionConfig {
    pub stripe_width: u32,
    pub protection_level: u32,
    pub hotspare: u32,
}

/// Object storage tiering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TieringConfig {
    pub enabled: bool,
    pub account_name: String,
    pub container_name: String,
    /// Pre-provisioned access key; provisioning runs when absent
    pub access_key: Option<String>,
    pub ssd_percent: u32,
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            account_name: String::new(),
            container_name: String::new(),
            access_key: None,
            ssd_percent: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub vault_uri: String,
    pub password_secret: String,
    /// Secret holding the key the report endpoint expects, if any
    pub report_key_secret: Option<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            vault_uri: "inventory://secrets".to_string(),
            password_secret: "cluster-password".to_string(),
            report_key_secret: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: Option<PathBuf>,
    /// Conditional append attempts before giving up
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
            max_attempts: 16,
            backoff_ms: 10,
        }
    }
}

impl StoreConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Base URL nodes use to reach `/report`; no reporting when unset
    pub base_url: Option<String>,
}

/// Static collaborator data for the inventory providers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Instance name -> private address
    pub private_addresses: HashMap<String, String>,
    /// Pool index (as written in the instance name) -> public address
    pub public_addresses: HashMap<String, String>,
    /// Secret name -> value
    pub secrets: HashMap<String, String>,
}

impl Config {
    /// Load config from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("clusterize").required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.hosts_num == 0 {
            return Err(Error::InvalidConfig("cluster.hosts_num must be positive".into()));
        }
        if self.cluster.name.is_empty() {
            return Err(Error::InvalidConfig("cluster.name must be set".into()));
        }
        let dp = &self.cluster.data_protection;
        if dp.stripe_width > 0
            && dp.protection_level > 0
            && (dp.stripe_width + dp.protection_level) as usize > self.cluster.hosts_num
        {
            return Err(Error::InvalidConfig(format!(
                "stripe width {} + protection level {} exceeds {} hosts",
                dp.stripe_width, dp.protection_level, self.cluster.hosts_num
            )));
        }
        if self.store.max_attempts == 0 {
            return Err(Error::InvalidConfig("store.max_attempts must be positive".into()));
        }
        if self.store.backend == StoreBackend::Sled && self.store.path.is_none() {
            return Err(Error::InvalidConfig("sled backend requires store.path".into()));
        }
        if self.tiering.enabled
            && (self.tiering.account_name.is_empty() || self.tiering.container_name.is_empty())
        {
            return Err(Error::InvalidConfig(
                "tiering requires account_name and container_name".into(),
            ));
        }
        if self.tiering.enabled && !(1..=100).contains(&self.tiering.ssd_percent) {
            return Err(Error::InvalidConfig(format!(
                "tiering.ssd_percent must be within 1..=100, got {}",
                self.tiering.ssd_percent
            )));
        }
        Ok(())
    }
}
