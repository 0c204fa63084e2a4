//! Conditional append over a versioned `StateStore`
//!
//! Registration is a read-modify-write loop: read the record and its version,
//! decide, then write only if the version is unchanged. A conflict means
//! another node committed first; back off and re-read. The membership check
//! and the append happen against the same read, so no decision is ever made
//! on a state that was not the one written over.

use std::sync::Arc;
use std::time::Duration;

use crate::common::{backoff_with_jitter, Error, Result, StoreConfig};
use crate::coordinator::state::{ClusterJoinState, NodeIdentifier, StateStore, WriteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendStatus {
    /// This call added the node
    Appended,
    /// The node was already registered; nothing changed
    AlreadyMember,
    /// The record is at its expected size and the node is not in it
    Full,
}

#[derive(Debug, Clone)]
pub struct AppendResult {
    pub state: ClusterJoinState,
    pub status: AppendStatus,
}

impl AppendResult {
    pub fn appended(&self) -> bool {
        self.status == AppendStatus::Appended
    }
}

/// Retry budget for conflicting conditional writes
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for RetryPolicy {
    fn from(config: &StoreConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff(),
        }
    }
}

#[derive(Clone)]
pub struct JoinStateStore {
    store: Arc<dyn StateStore>,
    retry: RetryPolicy,
}

impl JoinStateStore {
    pub fn new(store: Arc<dyn StateStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn read(&self, cluster: &str) -> Result<Option<ClusterJoinState>> {
        Ok(self.store.read(cluster).await?.map(|r| r.value))
    }

    /// Create the cluster's record. Idempotent for the same expected size.
    pub async fn initialize(&self, cluster: &str, expected_size: usize) -> Result<ClusterJoinState> {
        if expected_size == 0 {
            return Err(Error::InvalidRequest("expected size must be positive".into()));
        }

        let fresh = ClusterJoinState::new(expected_size);
        for _ in 0..self.retry.max_attempts {
            if let Some(existing) = self.store.read(cluster).await? {
                if existing.value.expected_size != expected_size {
                    return Err(Error::ExpectedSizeMismatch {
                        cluster: cluster.to_string(),
                        existing: existing.value.expected_size,
                        requested: expected_size,
                    });
                }
                return Ok(existing.value);
            }
            match self.store.write_if_version(cluster, &fresh, None).await? {
                WriteOutcome::Written { .. } => {
                    tracing::info!(cluster, expected_size, "Join state initialized");
                    return Ok(fresh);
                }
                // Someone else created it; re-read and compare sizes
                WriteOutcome::Conflict => continue,
            }
        }
        Err(Error::ConflictRetriesExhausted {
            attempts: self.retry.max_attempts,
        })
    }

    /// Append `node` unless it is already present or the record is full.
    pub async fn conditional_append(
        &self,
        cluster: &str,
        node: &NodeIdentifier,
    ) -> Result<AppendResult> {
        for attempt in 0..self.retry.max_attempts {
            let current = self
                .store
                .read(cluster)
                .await?
                .ok_or_else(|| Error::StateNotFound(cluster.to_string()))?;

            if current.value.contains(node) {
                return Ok(AppendResult {
                    state: current.value,
                    status: AppendStatus::AlreadyMember,
                });
            }
            if current.value.is_full() {
                return Ok(AppendResult {
                    state: current.value,
                    status: AppendStatus::Full,
                });
            }

            let mut next = current.value;
            next.instances.push(node.as_str().to_string());

            match self
                .store
                .write_if_version(cluster, &next, Some(current.version))
                .await?
            {
                WriteOutcome::Written { version } => {
                    tracing::debug!(
                        cluster,
                        node = %node,
                        version,
                        registered = next.instances.len(),
                        "Node appended to join state"
                    );
                    return Ok(AppendResult {
                        state: next,
                        status: AppendStatus::Appended,
                    });
                }
                WriteOutcome::Conflict => {
                    let delay = backoff_with_jitter(self.retry.backoff, attempt);
                    tracing::debug!(
                        cluster,
                        node = %node,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Join state version conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        tracing::warn!(cluster, node = %node, attempts = self.retry.max_attempts, "Conditional append exhausted retries");
        Err(Error::ConflictRetriesExhausted {
            attempts: self.retry.max_attempts,
        })
    }
}
