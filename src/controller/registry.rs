//! C6 — the controller name -> instance registry.
//!
//! The reference source resolves controller types through a static-init
//! singleton factory (`REGISTER_CONTROLLER` macro populating a process-global
//! map before `main` runs). Per this project's concurrency redesign, that's
//! replaced with an explicit `ControllerRegistry` value built once at startup
//! and threaded through the HTTP layer, rather than relying on static
//! initialization order.

use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::{CoordinatorError, Feature, Module, Result};

use super::cross_node::CrossNodeController;

/// Holds every live `CrossNodeController`, keyed by the server name the
/// caller supplied at deploy time.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: DashMap<String, Arc<CrossNodeController>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, server_name: String, controller: Arc<CrossNodeController>) {
        self.controllers.insert(server_name, controller);
    }

    pub fn get(&self, server_name: &str) -> Result<Arc<CrossNodeController>> {
        self.controllers
            .get(server_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordinatorError::NotFound {
                module: Module::Controller,
                feature: Feature::Generic,
                message: format!("no controller registered for server \"{server_name}\""),
            })
    }

    pub fn remove(&self, server_name: &str) -> Option<Arc<CrossNodeController>> {
        self.controllers.remove(server_name).map(|(_, v)| v)
    }

    pub fn names(&self) -> Vec<String> {
        self.controllers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::kube_client::fake::FakeKubeClient;
    use crate::controller::status_file::StatusHandler;
    use crate::config::CrossNodeConfig;

    fn sample_controller() -> Arc<CrossNodeController> {
        let kube = Arc::new(FakeKubeClient::new(vec![]));
        let dir = std::env::temp_dir().join(format!("digs-registry-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let status_handler = Arc::new(StatusHandler::new(dir.join("status.json"), 4));
        Arc::new(CrossNodeController::new(kube, status_handler, CrossNodeConfig::default()))
    }

    #[test]
    fn insert_then_get_round_trips() {
        let registry = ControllerRegistry::new();
        registry.insert("demo".into(), sample_controller());
        assert!(registry.get("demo").is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_missing_returns_not_found() {
        let registry = ControllerRegistry::new();
        assert!(matches!(registry.get("missing"), Err(CoordinatorError::NotFound { .. })));
    }

    #[test]
    fn remove_drops_the_entry() {
        let registry = ControllerRegistry::new();
        registry.insert("demo".into(), sample_controller());
        assert!(registry.remove("demo").is_some());
        assert!(registry.is_empty());
    }
}
