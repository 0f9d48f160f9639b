//! LoadBalance policy: declared but not implemented. Kept as a stable
//! placeholder so the configuration surface (`algorithm_type=load_balance`)
//! does not regress if selected.

use crate::core::{DeployMode, RequestBody, RequestType, RoutingDecision};
use crate::errors::{CoordinatorError, Feature, Module, Result};
use crate::node_store::NodeStore;

use super::RoutingPolicy;

pub struct LoadBalancePolicy;

impl Default for LoadBalancePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancePolicy {
    pub fn new() -> Self {
        Self
    }
}

impl RoutingPolicy for LoadBalancePolicy {
    fn pick(
        &self,
        _store: &NodeStore,
        _mode: DeployMode,
        _request_type: RequestType,
        _body: &RequestBody,
    ) -> Result<RoutingDecision> {
        Err(CoordinatorError::Unavailable {
            module: Module::Policy,
            feature: Feature::LoadBalance,
        })
    }

    fn name(&self) -> &'static str {
        "load_balance"
    }
}
