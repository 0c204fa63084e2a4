//! Cluster assembly planning
//!
//! Runs only for the node whose registration closed the barrier. Turns the
//! final join state into an `AssemblyPlan` by resolving addresses, setting up
//! tiering storage and fetching the admin credential. Any failing sub-step
//! aborts with an error naming that step. Side effects of earlier steps are
//! kept; every step is safe to repeat on a later run.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cloud::Providers;
use crate::common::{
    ClusterConfig, Config, DataProtectionConfig, Error, Result, TieringConfig,
};
use crate::coordinator::state::ClusterJoinState;

/// Username of the cluster administrator created at formation
pub const ADMIN_USERNAME: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyStep {
    ResolveAddresses,
    ProvisionObjectStorage,
    GrantAccess,
    ResolveSecret,
}

impl fmt::Display for AssemblyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssemblyStep::ResolveAddresses => "address resolution",
            AssemblyStep::ProvisionObjectStorage => "object storage provisioning",
            AssemblyStep::GrantAccess => "access grant",
            AssemblyStep::ResolveSecret => "secret resolution",
        };
        f.write_str(name)
    }
}

fn step_failed(step: AssemblyStep) -> impl FnOnce(Error) -> Error {
    move |e| Error::Assembly {
        step,
        message: e.to_string(),
    }
}

/// Everything assembly needs beyond the join state
#[derive(Debug, Clone)]
pub struct FormationParams {
    pub cluster: ClusterConfig,
    pub tiering: TieringConfig,
    pub vault_uri: String,
    pub password_secret: String,
}

impl From<&Config> for FormationParams {
    fn from(config: &Config) -> Self {
        Self {
            cluster: config.cluster.clone(),
            tiering: config.tiering.clone(),
            vault_uri: config.secrets.vault_uri.clone(),
            password_secret: config.secrets.password_secret.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedNode {
    pub name: String,
    pub address: String,
    pub public_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TieringPlan {
    pub account: String,
    pub container: String,
    #[serde(skip_serializing)]
    pub access_key: String,
    pub ssd_percent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub install_dpdk: bool,
    pub smbw_enabled: bool,
    pub frontend_containers: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyPlan {
    pub cluster_name: String,
    /// In registration order
    pub nodes: Vec<PlannedNode>,
    pub credentials: Credentials,
    pub tiering: Option<TieringPlan>,
    pub data_protection: DataProtectionConfig,
    pub features: FeatureFlags,
    pub drives_per_node: usize,
    pub proxy_url: Option<String>,
    pub home_url: Option<String>,
    pub binary: String,
}

pub struct ClusterAssembler {
    providers: Providers,
}

impl ClusterAssembler {
    pub fn new(providers: Providers) -> Self {
        Self { providers }
    }

    pub async fn assemble(
        &self,
        state: &ClusterJoinState,
        params: &FormationParams,
    ) -> Result<AssemblyPlan> {
        let pool = params.cluster.pool_name();
        tracing::info!(
            cluster = %params.cluster.name,
            nodes = state.instances.len(),
            "This is the last node in the cluster, assembling"
        );

        let nodes = self
            .resolve_nodes(state, &pool)
            .await
            .map_err(step_failed(AssemblyStep::ResolveAddresses))?;

        let tiering = if params.tiering.enabled {
            Some(self.prepare_tiering(&params.tiering, &pool).await?)
        } else {
            None
        };

        let password = self
            .providers
            .secrets
            .get_secret(&params.vault_uri, &params.password_secret)
            .await
            .map_err(step_failed(AssemblyStep::ResolveSecret))?;

        let cluster = &params.cluster;
        let plan = AssemblyPlan {
            cluster_name: cluster.name.clone(),
            nodes,
            credentials: Credentials {
                username: ADMIN_USERNAME.to_string(),
                password,
            },
            tiering,
            data_protection: cluster.data_protection,
            features: FeatureFlags {
                install_dpdk: cluster.install_dpdk,
                smbw_enabled: cluster.smbw_enabled,
                frontend_containers: cluster.frontend_containers,
            },
            drives_per_node: cluster.nvmes_num,
            proxy_url: cluster.proxy_url.clone(),
            home_url: cluster.home_url.clone(),
            binary: cluster.binary.clone(),
        };

        tracing::info!(cluster = %plan.cluster_name, "Assembly plan ready");
        Ok(plan)
    }

    async fn resolve_nodes(&self, state: &ClusterJoinState, pool: &str) -> Result<Vec<PlannedNode>> {
        let private = self.providers.addresses.resolve_private_addresses(pool).await?;

        state
            .identifiers()
            .map(|id| -> Result<PlannedNode> {
                let id = id?;
                let address = private.get(id.instance_name()).cloned().ok_or_else(|| {
                    Error::Provider(format!("no private address for {}", id.instance_name()))
                })?;
                Ok(PlannedNode {
                    name: id.host_name().to_string(),
                    address,
                    public_address: id.public_address().map(str::to_string),
                })
            })
            .collect()
    }

    async fn prepare_tiering(&self, tiering: &TieringConfig, pool: &str) -> Result<TieringPlan> {
        let access_key = match &tiering.access_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => self
                .providers
                .object_storage
                .create_container(&tiering.account_name, &tiering.container_name)
                .await
                .map_err(step_failed(AssemblyStep::ProvisionObjectStorage))?,
        };

        self.providers
            .access
            .grant_data_access(pool, &tiering.account_name, &tiering.container_name)
            .await
            .map_err(step_failed(AssemblyStep::GrantAccess))?;

        Ok(TieringPlan {
            account: tiering.account_name.clone(),
            container: tiering.container_name.clone(),
            access_key,
            ssd_percent: tiering.ssd_percent,
        })
    }
}
