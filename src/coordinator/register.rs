//! Join coordinator
//!
//! Admits a registration into the shared join state and classifies it. The
//! assembler is never elected separately: it is whichever call observes the
//! record reach its expected size right after its own append. Because
//! appends are serialized by the store, exactly one call can observe that
//! transition.
//!
//! Keep the membership check and the append inside the single conditional
//! append. Appending and then re-reading to ask "am I last?" would let two
//! nodes both see a full record and both assemble.

use std::sync::Arc;

use crate::cloud::Providers;
use crate::common::{Config, Error, Result};
use crate::coordinator::assembly::{AssemblyPlan, ClusterAssembler, FormationParams};
use crate::coordinator::join_store::{AppendStatus, JoinStateStore};
use crate::coordinator::script::ReportChannel;
use crate::coordinator::state::{ClusterJoinState, NodeIdentifier};

/// One node boot attempt
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub node: NodeIdentifier,
    pub cluster: String,
    pub expected_size: usize,
    /// Used only if this node turns out to be last
    pub formation: FormationParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Registered; the barrier is still open
    Waiting { registered: usize, expected: usize },
    /// This registration closed the barrier; the caller must assemble
    Last(ClusterJoinState),
    /// The barrier closed before this node arrived
    Overflow { expected: usize },
}

/// What the calling node is told to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionOutcome {
    Wait {
        node: String,
        registered: usize,
        expected: usize,
    },
    FormCluster(Box<AssemblyPlan>),
    ShutDown,
    Error(String),
}

impl InstructionOutcome {
    /// Error outcome for `err`. Transient failures say the node may retry.
    pub fn failed(err: &Error) -> Self {
        if err.is_retryable() {
            InstructionOutcome::Error(format!("{err} (transient, retry the registration)"))
        } else {
            InstructionOutcome::Error(err.to_string())
        }
    }
}

/// An outcome plus the channel its script reports through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub outcome: InstructionOutcome,
    pub report: Option<ReportChannel>,
}

impl Instruction {
    pub fn render(&self) -> String {
        crate::coordinator::script::render(&self.outcome, self.report.as_ref())
    }
}

#[derive(Clone)]
pub struct JoinCoordinator {
    store: JoinStateStore,
    assembler: Arc<ClusterAssembler>,
    providers: Providers,
    config: Arc<Config>,
}

impl JoinCoordinator {
    pub fn new(store: JoinStateStore, providers: Providers, config: Arc<Config>) -> Self {
        Self {
            store,
            assembler: Arc::new(ClusterAssembler::new(providers.clone())),
            providers,
            config,
        }
    }

    pub fn store(&self) -> &JoinStateStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build a request scoped to the configured cluster
    pub fn request_for(&self, node: NodeIdentifier) -> RegistrationRequest {
        RegistrationRequest {
            node,
            cluster: self.config.cluster.name.clone(),
            expected_size: self.config.cluster.hosts_num,
            formation: FormationParams::from(self.config.as_ref()),
        }
    }

    /// Admit `request.node` and classify the result.
    pub async fn register(&self, request: &RegistrationRequest) -> Result<RegistrationOutcome> {
        let result = self
            .store
            .conditional_append(&request.cluster, &request.node)
            .await?;
        let state = result.state;

        if state.expected_size != request.expected_size {
            tracing::warn!(
                cluster = %request.cluster,
                stored = state.expected_size,
                requested = request.expected_size,
                "Expected size differs from the join record; using the record"
            );
        }

        let outcome = match result.status {
            AppendStatus::Full => {
                tracing::warn!(
                    cluster = %request.cluster,
                    node = %request.node,
                    expected = state.expected_size,
                    "Registration after the barrier closed, node is surplus"
                );
                RegistrationOutcome::Overflow {
                    expected: state.expected_size,
                }
            }
            // A retry from the closing node re-delegates assembly
            AppendStatus::Appended | AppendStatus::AlreadyMember
                if state.closed_by(&request.node) =>
            {
                RegistrationOutcome::Last(state)
            }
            AppendStatus::Appended | AppendStatus::AlreadyMember => {
                RegistrationOutcome::Waiting {
                    registered: state.instances.len(),
                    expected: state.expected_size,
                }
            }
        };
        Ok(outcome)
    }

    /// Full invocation: registration, assembly when last, and the outcome
    /// the node's startup agent acts on. Never fails; errors become
    /// `InstructionOutcome::Error`.
    pub async fn clusterize(&self, mut request: RegistrationRequest) -> Instruction {
        if let Some(index) = request.node.pool_index() {
            let pool = request.formation.cluster.pool_name();
            match self
                .providers
                .addresses
                .resolve_public_address(&pool, index)
                .await
            {
                Ok(address) => request.node = request.node.with_public_address(&address),
                Err(e) => tracing::error!(node = %request.node, error = %e, "Failed to fetch public ip"),
            }
        }

        let report = match self.report_channel().await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Failed to resolve report channel");
                return Instruction {
                    outcome: InstructionOutcome::failed(&e),
                    report: None,
                };
            }
        };

        let outcome = match self.register(&request).await {
            Ok(RegistrationOutcome::Waiting {
                registered,
                expected,
            }) => {
                tracing::info!(
                    node = %request.node.instance_name(),
                    registered,
                    expected,
                    "Node is ready for clusterization"
                );
                InstructionOutcome::Wait {
                    node: request.node.instance_name().to_string(),
                    registered,
                    expected,
                }
            }
            Ok(RegistrationOutcome::Overflow { .. }) => InstructionOutcome::ShutDown,
            Ok(RegistrationOutcome::Last(state)) => {
                match self.assembler.assemble(&state, &request.formation).await {
                    Ok(plan) => InstructionOutcome::FormCluster(Box::new(plan)),
                    Err(e) => {
                        tracing::error!(cluster = %request.cluster, error = %e, "Assembly failed");
                        InstructionOutcome::failed(&e)
                    }
                }
            }
            Err(e) => {
                tracing::error!(node = %request.node, error = %e, "Registration failed");
                InstructionOutcome::failed(&e)
            }
        };

        Instruction { outcome, report }
    }

    /// Key the report endpoint expects, when one is configured
    pub async fn report_key(&self) -> Result<Option<String>> {
        match &self.config.secrets.report_key_secret {
            Some(name) => Ok(Some(
                self.providers
                    .secrets
                    .get_secret(&self.config.secrets.vault_uri, name)
                    .await?,
            )),
            None => Ok(None),
        }
    }

    async fn report_channel(&self) -> Result<Option<ReportChannel>> {
        let Some(base_url) = &self.config.report.base_url else {
            return Ok(None);
        };
        let key = self.report_key().await?;
        Ok(Some(ReportChannel::new(
            base_url,
            &self.config.cluster.name,
            key,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::Inventory;
    use crate::coordinator::join_store::RetryPolicy;
    use crate::coordinator::state::{MemoryStateStore, StateStore, Versioned, WriteOutcome};
    use async_trait::async_trait;

    /// Store whose backend is down
    struct UnavailableStore;

    #[async_trait]
    impl StateStore for UnavailableStore {
        async fn read(&self, _key: &str) -> Result<Option<Versioned<ClusterJoinState>>> {
            Err(Error::StoreUnavailable("blob 503".into()))
        }

        async fn write_if_version(
            &self,
            _key: &str,
            _value: &ClusterJoinState,
            _expected: Option<u64>,
        ) -> Result<WriteOutcome> {
            Err(Error::StoreUnavailable("blob 503".into()))
        }
    }

    async fn coordinator(config: Config) -> JoinCoordinator {
        let store = JoinStateStore::new(Arc::new(MemoryStateStore::new()), RetryPolicy::default());
        store
            .initialize(&config.cluster.name, config.cluster.hosts_num)
            .await
            .unwrap();
        let providers =
            Providers::from_inventory(Arc::new(Inventory::new(config.inventory.clone())));
        JoinCoordinator::new(store, providers, Arc::new(config))
    }

    fn config(hosts: usize) -> Config {
        let mut config = Config::default();
        config.cluster.hosts_num = hosts;
        for i in 0..hosts + 2 {
            config
                .inventory
                .private_addresses
                .insert(format!("vmss_{i}"), format!("10.0.0.{i}"));
        }
        config
            .inventory
            .secrets
            .insert("cluster-password".into(), "pw".into());
        config
    }

    fn req(coord: &JoinCoordinator, raw: &str) -> RegistrationRequest {
        coord.request_for(NodeIdentifier::parse(raw).unwrap())
    }

    #[tokio::test]
    async fn test_three_node_barrier() {
        let coord = coordinator(config(3)).await;

        assert_eq!(
            coord.register(&req(&coord, "vmss_0")).await.unwrap(),
            RegistrationOutcome::Waiting {
                registered: 1,
                expected: 3
            }
        );
        assert_eq!(
            coord.register(&req(&coord, "vmss_1")).await.unwrap(),
            RegistrationOutcome::Waiting {
                registered: 2,
                expected: 3
            }
        );
        match coord.register(&req(&coord, "vmss_2")).await.unwrap() {
            RegistrationOutcome::Last(state) => assert_eq!(state.instances.len(), 3),
            other => panic!("expected Last, got {other:?}"),
        }
        assert_eq!(
            coord.register(&req(&coord, "vmss_3")).await.unwrap(),
            RegistrationOutcome::Overflow { expected: 3 }
        );
    }

    #[tokio::test]
    async fn test_retry_returns_same_wait() {
        let coord = coordinator(config(3)).await;
        let first = coord.register(&req(&coord, "vmss_0")).await.unwrap();
        let second = coord.register(&req(&coord, "vmss_0")).await.unwrap();
        assert_eq!(first, second);
        let state = coord.store().read("cluster").await.unwrap().unwrap();
        assert_eq!(state.instances.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_close() {
        let coord = coordinator(config(2)).await;
        coord.register(&req(&coord, "vmss_0")).await.unwrap();
        coord.register(&req(&coord, "vmss_1")).await.unwrap();

        // The closing node retrying is delegated again
        assert!(matches!(
            coord.register(&req(&coord, "vmss_1")).await.unwrap(),
            RegistrationOutcome::Last(_)
        ));
        // An earlier node retrying just waits
        assert_eq!(
            coord.register(&req(&coord, "vmss_0")).await.unwrap(),
            RegistrationOutcome::Waiting {
                registered: 2,
                expected: 2
            }
        );
    }

    #[tokio::test]
    async fn test_clusterize_outcomes() {
        let coord = coordinator(config(2)).await;

        let first = coord.clusterize(req(&coord, "vmss_0:host-0")).await;
        assert_eq!(
            first.outcome,
            InstructionOutcome::Wait {
                node: "vmss_0".into(),
                registered: 1,
                expected: 2
            }
        );
        assert!(first.report.is_none());

        let last = coord.clusterize(req(&coord, "vmss_1:host-1")).await;
        match last.outcome {
            InstructionOutcome::FormCluster(plan) => {
                let names: Vec<_> = plan.nodes.iter().map(|n| n.name.as_str()).collect();
                assert_eq!(names, vec!["host-0", "host-1"]);
            }
            other => panic!("expected FormCluster, got {other:?}"),
        }

        let late = coord.clusterize(req(&coord, "vmss_2:host-2")).await;
        assert_eq!(late.outcome, InstructionOutcome::ShutDown);
    }

    #[tokio::test]
    async fn test_public_address_is_attached() {
        let mut cfg = config(2);
        cfg.inventory
            .public_addresses
            .insert("0".into(), "52.0.0.10".into());
        let coord = coordinator(cfg).await;

        coord.clusterize(req(&coord, "vmss_0:host-0")).await;
        // No public address for index 1; registration still proceeds
        coord.clusterize(req(&coord, "vmss_1:host-1")).await;

        let state = coord.store().read("cluster").await.unwrap().unwrap();
        assert_eq!(
            state.instances,
            vec!["vmss_0:host-0:52.0.0.10".to_string(), "vmss_1:host-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_report_key_fails_before_registering() {
        let mut cfg = config(2);
        cfg.report.base_url = Some("http://coord:7070".into());
        cfg.secrets.report_key_secret = Some("report-key".into());
        let coord = coordinator(cfg).await;

        let instruction = coord.clusterize(req(&coord, "vmss_0")).await;
        assert!(matches!(instruction.outcome, InstructionOutcome::Error(_)));
        assert!(instruction.report.is_none());
        let state = coord.store().read("cluster").await.unwrap().unwrap();
        assert!(state.instances.is_empty());
    }

    #[tokio::test]
    async fn test_uninitialized_cluster_is_error() {
        let config = config(2);
        let store = JoinStateStore::new(Arc::new(MemoryStateStore::new()), RetryPolicy::default());
        let providers =
            Providers::from_inventory(Arc::new(Inventory::new(config.inventory.clone())));
        let coord = JoinCoordinator::new(store, providers, Arc::new(config));

        let instruction = coord.clusterize(req(&coord, "vmss_0")).await;
        match instruction.outcome {
            InstructionOutcome::Error(msg) => assert!(msg.contains("not found")),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unavailable_store_is_error_script() {
        let config = config(2);
        let store = JoinStateStore::new(Arc::new(UnavailableStore), RetryPolicy::default());
        let providers =
            Providers::from_inventory(Arc::new(Inventory::new(config.inventory.clone())));
        let coord = JoinCoordinator::new(store, providers, Arc::new(config));

        let instruction = coord.clusterize(req(&coord, "vmss_0")).await;
        match &instruction.outcome {
            InstructionOutcome::Error(msg) => {
                assert!(msg.contains("State store unavailable: blob 503"));
                assert!(msg.contains("retry the registration"));
            }
            other => panic!("expected Error, got {other:?}"),
        }
        assert!(instruction.render().ends_with("exit 1\n"));
    }

    #[test]
    fn test_failed_outcome_wording() {
        assert_eq!(
            InstructionOutcome::failed(&Error::StateNotFound("c".into())),
            InstructionOutcome::Error("Join state not found for cluster c".into())
        );
        match InstructionOutcome::failed(&Error::ConflictRetriesExhausted { attempts: 3 }) {
            InstructionOutcome::Error(msg) => assert!(msg.ends_with("(transient, retry the registration)")),
            other => panic!("expected Error, got {other:?}"),
        }
    }
}
