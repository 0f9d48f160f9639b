//! C2 — pluggable routing policies: round-robin, cache-affinity, load-balance.

pub mod cache_affinity;
pub mod load_balance;
pub mod round_robin;

use crate::core::{DeployMode, RequestBody, RequestType, RoutingDecision};
use crate::errors::Result;
use crate::node_store::NodeStore;

pub use cache_affinity::{CacheAffinityConfig, CacheAffinityPolicy};
pub use load_balance::LoadBalancePolicy;
pub use round_robin::RoundRobinPolicy;

/// Common interface every routing policy implements.
pub trait RoutingPolicy: Send + Sync {
    fn pick(
        &self,
        store: &NodeStore,
        mode: DeployMode,
        request_type: RequestType,
        body: &RequestBody,
    ) -> Result<RoutingDecision>;

    fn name(&self) -> &'static str;
}

/// Accepted values of `algorithm_type` in the scheduler config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmType {
    RoundRobin,
    CacheAffinity,
    LoadBalance,
}

impl AlgorithmType {
    /// Unknown algorithms degrade to round-robin with a warning, per the
    /// scheduler config contract.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "cache_affinity" => AlgorithmType::CacheAffinity,
            "round_robin" => AlgorithmType::RoundRobin,
            "load_balance" => AlgorithmType::LoadBalance,
            other => {
                tracing::warn!(algorithm = other, "unknown algorithm_type, defaulting to round_robin");
                AlgorithmType::RoundRobin
            }
        }
    }
}

/// Builds a boxed [`RoutingPolicy`] from configuration. Replaces the source's
/// static-init factory registration with an explicit constructor enumerated
/// here; no process-global registry of policy constructors survives.
pub struct PolicyFactory;

impl PolicyFactory {
    pub fn create(algorithm: AlgorithmType, cache_affinity: CacheAffinityConfig) -> Box<dyn RoutingPolicy> {
        match algorithm {
            AlgorithmType::RoundRobin => Box::new(RoundRobinPolicy::new()),
            AlgorithmType::CacheAffinity => Box::new(CacheAffinityPolicy::new(cache_affinity)),
            AlgorithmType::LoadBalance => Box::new(LoadBalancePolicy::new()),
        }
    }
}
