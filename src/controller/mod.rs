//! C5/C6 — the cross-node deployment controller and its name -> factory registry.

pub mod cross_node;
pub mod kube_client;
pub mod manifests;
pub mod registry;
pub mod status_file;

pub use cross_node::CrossNodeController;
pub use kube_client::KubeClient;
pub use registry::ControllerRegistry;
