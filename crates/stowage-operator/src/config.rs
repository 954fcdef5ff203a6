//! Operator configuration

use std::time::Duration;

use clap::Args;

/// Flags of `stowage run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Only watch resources in this namespace (all namespaces when unset)
    #[arg(short, long, env = "STOWAGE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Seconds between periodic re-reconciles of healthy resources
    #[arg(long, env = "STOWAGE_REQUEUE_INTERVAL", default_value_t = 300)]
    pub requeue_interval: u64,

    /// Deadline in seconds for each cluster or fetch operation
    #[arg(long, env = "STOWAGE_OPERATION_TIMEOUT", default_value_t = 60)]
    pub operation_timeout: u64,

    /// Seconds to wait for workloads to become available after a retry
    #[arg(long, env = "STOWAGE_AWAIT_TIMEOUT", default_value_t = 300)]
    pub await_timeout: u64,
}

/// Settings shared by every controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    pub namespace: Option<String>,
    pub requeue_interval: Duration,
    pub operation_timeout: Duration,
    pub await_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            requeue_interval: Duration::from_secs(300),
            operation_timeout: Duration::from_secs(60),
            await_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&RunArgs> for OperatorConfig {
    fn from(args: &RunArgs) -> Self {
        Self {
            namespace: args.namespace.clone().filter(|ns| !ns.is_empty()),
            requeue_interval: Duration::from_secs(args.requeue_interval),
            operation_timeout: Duration::from_secs(args.operation_timeout),
            await_timeout: Duration::from_secs(args.await_timeout),
        }
    }
}
