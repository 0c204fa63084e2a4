//! Status reports posted back by generated scripts
//!
//! Kept in memory, bounded per cluster. Reports are diagnostics for
//! operators; nothing in the join protocol reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Reports retained per cluster
pub const MAX_REPORTS_PER_CLUSTER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Progress,
    Error,
    Debug,
}

/// Body posted to `/report`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMessage {
    pub cluster: String,
    pub hostname: String,
    #[serde(rename = "type")]
    pub kind: ReportKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub report: ReportMessage,
}

#[derive(Default)]
pub struct ReportLog {
    entries: Mutex<HashMap<String, VecDeque<ReportEntry>>>,
}

impl ReportLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, report: ReportMessage) {
        match report.kind {
            ReportKind::Error => tracing::error!(
                cluster = %report.cluster,
                hostname = %report.hostname,
                "{}", report.message
            ),
            _ => tracing::info!(
                cluster = %report.cluster,
                hostname = %report.hostname,
                "{}", report.message
            ),
        }

        let mut entries = self.lock();
        let log = entries.entry(report.cluster.clone()).or_default();
        if log.len() == MAX_REPORTS_PER_CLUSTER {
            log.pop_front();
        }
        log.push_back(ReportEntry {
            received_at: Utc::now(),
            report,
        });
    }

    /// Most recent reports for a cluster, oldest first
    pub fn recent(&self, cluster: &str, limit: usize) -> Vec<ReportEntry> {
        self.lock()
            .get(cluster)
            .map(|log| {
                let skip = log.len().saturating_sub(limit);
                log.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<ReportEntry>>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Report log lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
