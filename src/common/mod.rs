//! Common utilities and types shared across clusterize

pub mod config;
pub mod error;
pub mod tracing_middleware;
pub mod utils;

pub use config::{
    ClusterConfig, Config, DataProtectionConfig, InventoryConfig, StoreBackend, StoreConfig,
    TieringConfig,
};
pub use error::{Error, Result};
pub use utils::{backoff_with_jitter, heredoc_safe, shell_quote, timestamp_now};
