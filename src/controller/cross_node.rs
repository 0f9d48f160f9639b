//! C5 — the CrossNode `InferenceController` variant: owns the K8s resources
//! backing one replica, discovers its master pod through a ranktable, and
//! restarts it when health monitoring observes it abnormal.
//!
//! Grounded on `CrossNodeServer.cpp`: `Deploy`/`ClearResources` for replica
//! creation and rollback, `FindAndLabelMasterPod`/`LabelMasterPod` for
//! discovery, and the Unready/Ready/Abnormal transition table plus
//! `RecoverInstance`'s delete-recreate-relabel sequence for monitoring.

#[cfg(test)]
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::CrossNodeConfig;
use crate::errors::{CoordinatorError, Feature, Module, Result};

use super::kube_client::{require_success, KubeClient, KubeMethod};
use super::manifests::{
    create_config_map_json, create_deploy_json, create_service_json, deployment_name, master_label_value,
    ranktable_name, service_name, MASTER_POD_LABEL_KEY,
};
use super::status_file::{ServerSaveStatus, StatusHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Creating,
    Created,
    Failed,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    None,
    Recreating,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Unready,
    Ready,
    Abnormal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRequests {
    pub memory: u32,
    pub cpu_core: u32,
    pub npu_type: String,
    pub npu_chip_num: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MindieServerConfig {
    pub infer_port: u32,
    pub management_port: u32,
    pub enable_tls: bool,
    pub mies_install_path: String,
    /// When set, health probes hit `/health/timed-<liveness_timeout>` instead
    /// of `/v2/health/ready`, asking the mindie server to detect and report
    /// its own internal stalls rather than just answering a plain liveness
    /// check.
    #[serde(default)]
    pub detect_inner_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    pub server_name: String,
    pub scheduler: String,
    pub service_type: String,
    pub service_port: u32,
    pub replicas: u32,
    pub cross_node_num: u32,
    pub resource_requests: ResourceRequests,
    pub init_delay: u64,
    pub mindie_server_config: MindieServerConfig,
    pub liveness_timeout: u64,
    pub readiness_timeout: u64,
    pub liveness_failure_threshold: u32,
    pub readiness_failure_threshold: u32,
    #[serde(default = "default_namespace")]
    pub name_space: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Validates a deploy config against §4.5.1's acceptance table. Any
/// violation returns `InvalidInput`; no further processing happens.
pub fn validate_deploy_config(config: &DeployConfig, max_instances: u32, tls_enabled: bool) -> Result<()> {
    let bad = |message: String| CoordinatorError::InvalidInput {
        module: Module::Controller,
        feature: Feature::Deploy,
        message,
    };

    if config.server_name.is_empty() || config.server_name.len() > 48 {
        return Err(bad("server_name must be 1-48 chars".into()));
    }
    if config.scheduler != "default" {
        return Err(bad("scheduler must equal \"default\"".into()));
    }
    if config.service_type != "NodePort" {
        return Err(bad("service_type must equal \"NodePort\"".into()));
    }
    if !(30000..=32767).contains(&config.service_port) {
        return Err(bad("service_port must be in 30000..=32767".into()));
    }
    if config.replicas == 0 || config.replicas > max_instances {
        return Err(bad(format!("replicas must be 1..={max_instances}")));
    }
    if !matches!(config.cross_node_num, 2 | 4) {
        return Err(bad("cross_node_num must be 2 or 4".into()));
    }
    if !(1000..=256000).contains(&config.resource_requests.memory) {
        return Err(bad("resource_requests.memory must be 1000..=256000".into()));
    }
    if !(1000..=256000).contains(&config.resource_requests.cpu_core) {
        return Err(bad("resource_requests.cpu_core must be 1000..=256000".into()));
    }
    if config.resource_requests.npu_type != "Ascend910" {
        return Err(bad("resource_requests.npu_type must equal \"Ascend910\"".into()));
    }
    if config.resource_requests.npu_chip_num != 8 {
        return Err(bad("resource_requests.npu_chip_num must equal 8".into()));
    }
    if !(10..=1800).contains(&config.init_delay) {
        return Err(bad("init_delay must be 10..=1800".into()));
    }
    if !(1024..=65535).contains(&config.mindie_server_config.infer_port)
        || !(1024..=65535).contains(&config.mindie_server_config.management_port)
    {
        return Err(bad("mindie_server_config ports must be 1024..=65535".into()));
    }
    if config.mindie_server_config.enable_tls != tls_enabled {
        return Err(bad("mindie_server_config.enable_tls must match the process-level TLS switch".into()));
    }
    if !config.mindie_server_config.mies_install_path.starts_with('/') {
        return Err(bad("mindie_server_config.mies_install_path must be absolute".into()));
    }
    if !(1..=300).contains(&config.liveness_timeout) || !(1..=300).contains(&config.readiness_timeout) {
        return Err(bad("liveness_timeout/readiness_timeout must be 1..=300".into()));
    }
    if !(1..=10).contains(&config.liveness_failure_threshold) || !(1..=10).contains(&config.readiness_failure_threshold)
    {
        return Err(bad("liveness_failure_threshold/readiness_failure_threshold must be 1..=10".into()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InferInstance {
    pub restore_state: RestoreState,
    pub name_space: String,
    pub master_created_at: Option<DateTime<Utc>>,
    pub master_ip: Option<String>,
    pub deployment_name: String,
    pub ranktable_name: String,
    pub health: Health,
    pub labeled: bool,
}

#[derive(Debug, Clone, Default)]
struct KubeResources {
    name_space: String,
    config_map_names: Vec<String>,
    deployment_names: Vec<String>,
    service_name: Option<String>,
}

pub struct CrossNodeController {
    kube: Arc<dyn KubeClient>,
    http: reqwest::Client,
    status_handler: Arc<StatusHandler>,
    config: CrossNodeConfig,
    server_name: RwLock<String>,
    deploy_status: RwLock<DeployStatus>,
    status_message: RwLock<String>,
    instances: DashMap<u32, InferInstance>,
    kube_resources: RwLock<KubeResources>,
    service_params: RwLock<Option<DeployConfig>>,
}

impl CrossNodeController {
    pub fn new(kube: Arc<dyn KubeClient>, status_handler: Arc<StatusHandler>, config: CrossNodeConfig) -> Self {
        Self {
            kube,
            http: reqwest::Client::new(),
            status_handler,
            config,
            server_name: RwLock::new(String::new()),
            deploy_status: RwLock::new(DeployStatus::Creating),
            status_message: RwLock::new(String::new()),
            instances: DashMap::new(),
            kube_resources: RwLock::new(KubeResources::default()),
            service_params: RwLock::new(None),
        }
    }

    pub fn status(&self) -> (DeployStatus, String) {
        (*self.deploy_status.read(), self.status_message.read().clone())
    }

    /// Validates `config`, then creates one ConfigMap + Deployment per
    /// replica, rolling back everything created so far on the first failure.
    pub async fn deploy(&self, config: DeployConfig) -> Result<()> {
        validate_deploy_config(&config, self.config.max_instances, self.config.tls_enabled)?;

        *self.server_name.write() = config.server_name.clone();
        self.kube_resources.write().name_space = config.name_space.clone();

        for i in 0..config.replicas {
            if let Err(err) = self.create_replica(i, &config).await {
                warn!(server_name = %config.server_name, replica = i, error = %err, "replica creation failed, clearing resources");
                if let Err(clear_err) = self.clear_resources().await {
                    warn!(error = %clear_err, "failed to clear resources after deploy failure");
                }
                *self.deploy_status.write() = DeployStatus::Failed;
                return Err(err);
            }
        }

        info!(server_name = %config.server_name, "all replicas created, creating service");
        self.create_service(&config).await?;

        *self.deploy_status.write() = DeployStatus::Created;
        *self.service_params.write() = Some(config.clone());

        self.status_handler
            .save(ServerSaveStatus {
                replicas: config.replicas,
                namespace: config.name_space.clone(),
                server_name: config.server_name.clone(),
                server_type: "mindie_cross_node".to_string(),
                use_service: true,
            })
            .await?;

        Ok(())
    }

    async fn create_replica(&self, index: u32, config: &DeployConfig) -> Result<()> {
        let deploy_name = deployment_name(&config.server_name, index);
        let rank_table_name = ranktable_name(&config.server_name, index);

        let config_map = create_config_map_json(&config.name_space, &rank_table_name);
        let url = format!("/api/v1/namespaces/{}/configmaps", config.name_space);
        let (status, body) = self
            .kube
            .send(&url, KubeMethod::Post, Some("application/json"), config_map.to_string())
            .await?;
        require_success(status, body, Feature::Deploy)?;
        self.kube_resources.write().config_map_names.push(rank_table_name.clone());

        let deployment = create_deploy_json(config, &deploy_name, &rank_table_name);
        let url = format!("/apis/apps/v1/namespaces/{}/deployments", config.name_space);
        let (status, body) = self
            .kube
            .send(&url, KubeMethod::Post, Some("application/json"), deployment.to_string())
            .await?;
        require_success(status, body, Feature::Deploy)?;
        self.kube_resources.write().deployment_names.push(deploy_name.clone());

        self.instances.insert(
            index,
            InferInstance {
                restore_state: RestoreState::None,
                name_space: config.name_space.clone(),
                master_created_at: None,
                master_ip: None,
                deployment_name: deploy_name,
                ranktable_name: rank_table_name,
                health: Health::Unready,
                labeled: false,
            },
        );
        Ok(())
    }

    async fn create_service(&self, config: &DeployConfig) -> Result<()> {
        let svc_name = service_name(&config.server_name);
        let master_label = master_label_value(&config.server_name);
        let manifest = create_service_json(config, MASTER_POD_LABEL_KEY, &master_label, &svc_name);
        let url = format!("/api/v1/namespaces/{}/services", config.name_space);
        let (status, body) = self
            .kube
            .send(&url, KubeMethod::Post, Some("application/json"), manifest.to_string())
            .await?;
        require_success(status, body, Feature::Deploy)?;
        self.kube_resources.write().service_name = Some(svc_name);
        Ok(())
    }

    /// Best-effort delete of every resource created so far by this controller.
    async fn clear_resources(&self) -> Result<()> {
        let resources = self.kube_resources.read().clone();
        for name in &resources.config_map_names {
            let url = format!("/api/v1/namespaces/{}/configmaps/{}", resources.name_space, name);
            let _ = self.kube.send(&url, KubeMethod::Delete, None, String::new()).await;
        }
        for name in &resources.deployment_names {
            let url = format!("/apis/apps/v1/namespaces/{}/deployments/{}", resources.name_space, name);
            let _ = self.kube.send(&url, KubeMethod::Delete, None, String::new()).await;
        }
        if let Some(svc) = &resources.service_name {
            let url = format!("/api/v1/namespaces/{}/services/{}", resources.name_space, svc);
            let _ = self.kube.send(&url, KubeMethod::Delete, None, String::new()).await;
        }
        *self.kube_resources.write() = KubeResources {
            name_space: resources.name_space,
            ..Default::default()
        };
        self.instances.clear();
        Ok(())
    }

    /// Deletes every K8s resource this controller created.
    pub async fn unload(&self) -> Result<()> {
        *self.deploy_status.write() = DeployStatus::Stopping;
        self.clear_resources().await?;
        let server_name = self.server_name.read().clone();
        self.status_handler.remove(&server_name).await?;
        Ok(())
    }

    /// One tick of the master-pod discovery loop: scans every not-yet-labeled
    /// replica concurrently.
    pub async fn run_discovery_tick(&self) -> Result<()> {
        let indices: Vec<u32> = self
            .instances
            .iter()
            .filter(|e| !e.value().labeled)
            .map(|e| *e.key())
            .collect();
        let attempts = future::join_all(indices.iter().map(|&index| self.find_and_label_master_pod(index))).await;
        for (index, result) in indices.into_iter().zip(attempts) {
            if let Err(err) = result {
                warn!(replica = index, error = %err, "discovery step failed");
            }
        }
        Ok(())
    }

    async fn find_and_label_master_pod(&self, index: u32) -> Result<()> {
        let (ranktable_name, name_space) = {
            let instance = self
                .instances
                .get(&index)
                .ok_or_else(|| CoordinatorError::NotFound {
                    module: Module::Controller,
                    feature: Feature::Discovery,
                    message: format!("no replica at index {index}"),
                })?;
            (instance.ranktable_name.clone(), instance.name_space.clone())
        };

        let url = format!("/api/v1/namespaces/{name_space}/configmaps/{ranktable_name}");
        let (status, body) = self.kube.send(&url, KubeMethod::Get, None, String::new()).await?;
        let body = require_success(status, body, Feature::Discovery)?;
        let config_map: Value = serde_json::from_str(&body)?;

        let ranktable_raw = config_map
            .get("data")
            .and_then(|d| d.get("hccl.json"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoordinatorError::InvalidParameter {
                module: Module::Controller,
                feature: Feature::Discovery,
                message: "configmap does not contain data.hccl.json".into(),
            })?;
        let ranktable: Value = serde_json::from_str(ranktable_raw)?;

        let rank_status = ranktable.get("status").and_then(|v| v.as_str()).unwrap_or("");
        if rank_status != "completed" {
            return Ok(());
        }

        let server_list = ranktable
            .get("server_list")
            .and_then(|v| v.as_array())
            .ok_or_else(|| CoordinatorError::InvalidParameter {
                module: Module::Controller,
                feature: Feature::Discovery,
                message: "ranktable missing server_list array".into(),
            })?;
        if !(2..=4).contains(&server_list.len()) {
            self.fail_instance(index, "ranktable server_list length out of range [2,4]".into());
            return Err(CoordinatorError::InvalidParameter {
                module: Module::Controller,
                feature: Feature::Discovery,
                message: "ranktable server_list length out of range".into(),
            });
        }

        let master_ip = server_list[0]
            .get("container_ip")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoordinatorError::InvalidInput {
                module: Module::Controller,
                feature: Feature::Discovery,
                message: "server_list[0] missing container_ip".into(),
            })?
            .to_string();

        self.label_master_pod(index, &master_ip).await
    }

    async fn label_master_pod(&self, index: u32, master_ip: &str) -> Result<()> {
        let url = format!("/api/v1/pods?fieldSelector=status.podIP={master_ip}");
        let (status, body) = self.kube.send(&url, KubeMethod::Get, None, String::new()).await?;
        let body = require_success(status, body, Feature::Discovery)?;
        let response: Value = serde_json::from_str(&body)?;

        let item = response
            .get("items")
            .and_then(|v| v.as_array())
            .and_then(|items| items.first())
            .ok_or_else(|| CoordinatorError::NotFound {
                module: Module::Controller,
                feature: Feature::Discovery,
                message: format!("no pod found with IP {master_ip}"),
            })?;
        let pod_name = item
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoordinatorError::InvalidParameter {
                module: Module::Controller,
                feature: Feature::Discovery,
                message: "pod metadata missing name".into(),
            })?;
        let pod_namespace = item
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoordinatorError::InvalidParameter {
                module: Module::Controller,
                feature: Feature::Discovery,
                message: "pod metadata missing namespace".into(),
            })?;

        let server_name = self.server_name.read().clone();
        let patch = serde_json::json!({
            "metadata": { "labels": { MASTER_POD_LABEL_KEY: master_label_value(&server_name) } }
        });
        let url = format!("/api/v1/namespaces/{pod_namespace}/pods/{pod_name}");
        let (status, body) = self
            .kube
            .send(&url, KubeMethod::Patch, Some("application/strategic-merge-patch+json"), patch.to_string())
            .await?;
        require_success(status, body, Feature::Discovery)?;

        if let Some(mut instance) = self.instances.get_mut(&index) {
            instance.master_ip = Some(master_ip.to_string());
            instance.master_created_at = Some(Utc::now());
            instance.labeled = true;
        }
        info!(replica = index, master_ip, "labeled master pod");
        Ok(())
    }

    fn fail_instance(&self, index: u32, message: String) {
        *self.deploy_status.write() = DeployStatus::Failed;
        *self.status_message.write() = message;
        error!(replica = index, "replica marked failed");
    }

    /// One tick of the health-monitoring loop: probes every labeled replica's
    /// master pod and applies the Unready/Ready/Abnormal transition table.
    pub async fn run_monitor_tick(&self) -> Result<()> {
        let indices: Vec<u32> = self
            .instances
            .iter()
            .filter(|e| e.value().labeled)
            .map(|e| *e.key())
            .collect();
        let init_delay = self
            .service_params
            .read()
            .as_ref()
            .map(|c| c.init_delay)
            .unwrap_or(10);

        let snapshots: Vec<(u32, Health, Option<String>, Option<DateTime<Utc>>)> = indices
            .iter()
            .filter_map(|&index| {
                let instance = self.instances.get(&index)?;
                Some((index, instance.health, instance.master_ip.clone(), instance.master_created_at))
            })
            .collect();

        let probes = future::join_all(snapshots.iter().map(|(_, _, master_ip, _)| async move {
            match master_ip {
                Some(ip) => Some(self.probe_master_health(ip).await),
                None => None,
            }
        }))
        .await;

        for ((index, health, master_ip, created_at), probe_result) in snapshots.into_iter().zip(probes) {
            if master_ip.is_none() {
                continue;
            }
            let Some(probe_ok) = probe_result else { continue };

            let next_health = match (health, probe_ok) {
                (Health::Unready, true) => Health::Ready,
                (Health::Unready, false) => {
                    let elapsed = created_at.map(|t| (Utc::now() - t).num_seconds() as u64).unwrap_or(0);
                    if elapsed > init_delay {
                        Health::Abnormal
                    } else {
                        Health::Unready
                    }
                }
                (Health::Ready, true) => Health::Ready,
                (Health::Ready, false) => Health::Abnormal,
                (Health::Abnormal, _) => Health::Abnormal,
            };

            if let Some(mut instance) = self.instances.get_mut(&index) {
                if next_health == Health::Abnormal && health == Health::Ready {
                    instance.master_ip = None;
                }
                instance.health = next_health;
            }

            if next_health == Health::Abnormal {
                if let Err(err) = self.recover_instance(index).await {
                    warn!(replica = index, error = %err, "recovery attempt failed");
                }
            }
        }
        Ok(())
    }

    /// Probes the master pod's readiness path: `/health/timed-<liveness_timeout>`
    /// when inner-error detection is enabled, else `/v2/health/ready`. Retries
    /// `liveness_failure_threshold - 1` times with `timeout = liveness_timeout`
    /// before reporting the instance unhealthy.
    async fn probe_master_health(&self, master_ip: &str) -> bool {
        let params = self.service_params.read().clone();
        let (management_port, timeout_secs, retries, path) = match &params {
            Some(config) => {
                let path = if config.mindie_server_config.detect_inner_error {
                    format!("/health/timed-{}", config.liveness_timeout)
                } else {
                    "/v2/health/ready".to_string()
                };
                (
                    config.mindie_server_config.management_port,
                    config.liveness_timeout,
                    config.liveness_failure_threshold.saturating_sub(1),
                    path,
                )
            }
            None => (1040, 3, 0, "/v2/health/ready".to_string()),
        };
        let url = format!("http://{master_ip}:{management_port}{path}");
        let timeout = Duration::from_secs(timeout_secs);

        for attempt in 0..=retries {
            match self.http.get(&url).timeout(timeout).send().await {
                Ok(resp) if resp.status().is_success() => return true,
                _ if attempt < retries => continue,
                _ => return false,
            }
        }
        false
    }

    /// `RestoreState::None -> Recreating`: delete and recreate the replica's
    /// ConfigMap/Deployment, then retry discovery up to `recover_retries`
    /// times before settling at `Pending`.
    async fn recover_instance(&self, index: u32) -> Result<()> {
        let restore_state = self.instances.get(&index).map(|i| i.restore_state).unwrap_or(RestoreState::None);

        if restore_state == RestoreState::None {
            warn!(replica = index, "replica abnormal, recreating");
            if let Some(mut instance) = self.instances.get_mut(&index) {
                instance.restore_state = RestoreState::Recreating;
            }
            let (deployment_name, ranktable_name, name_space) = {
                let instance = self.instances.get(&index).unwrap();
                (instance.deployment_name.clone(), instance.ranktable_name.clone(), instance.name_space.clone())
            };

            let url = format!("/api/v1/namespaces/{name_space}/configmaps/{ranktable_name}");
            let _ = self.kube.send(&url, KubeMethod::Delete, None, String::new()).await;
            let url = format!("/apis/apps/v1/namespaces/{name_space}/deployments/{deployment_name}");
            let _ = self.kube.send(&url, KubeMethod::Delete, None, String::new()).await;

            tokio::time::sleep(Duration::from_secs(self.config.recover_retry_delay_secs)).await;

            let config = self
                .service_params
                .read()
                .clone()
                .ok_or_else(|| CoordinatorError::InvalidParameter {
                    module: Module::Controller,
                    feature: Feature::Monitor,
                    message: "no deploy config recorded for recovery".into(),
                })?;
            self.create_replica(index, &config).await?;

            if let Some(mut instance) = self.instances.get_mut(&index) {
                instance.restore_state = RestoreState::Pending;
            }
        }

        for _ in 0..self.config.recover_retries {
            if self.find_and_label_master_pod(index).await.is_ok() {
                if let Some(mut instance) = self.instances.get_mut(&index) {
                    if instance.labeled {
                        instance.restore_state = RestoreState::None;
                        instance.health = Health::Unready;
                        return Ok(());
                    }
                }
            }
            // Jittered backoff so a batch of replicas going abnormal together
            // doesn't hammer the API server in lockstep.
            let jitter_ms = rand::random::<u16>() % 500;
            let delay = Duration::from_secs(self.config.recover_retry_delay_secs) + Duration::from_millis(jitter_ms as u64);
            tokio::time::sleep(delay).await;
        }

        warn!(replica = index, "recovery exhausted retries, staying pending");
        Ok(())
    }

    /// Rehydrates a prior replica from a persisted status-file record without
    /// creating resources. Returns `NotFound` if the Deployment is missing,
    /// in which case the caller should discard the record.
    pub async fn restore_from_status(&self, record: &ServerSaveStatus) -> Result<()> {
        *self.server_name.write() = record.server_name.clone();
        self.kube_resources.write().name_space = record.namespace.clone();

        for i in 0..record.replicas {
            let deploy_name = deployment_name(&record.server_name, i);
            let url = format!("/apis/apps/v1/namespaces/{}/deployments/{}", record.namespace, deploy_name);
            let (status, _) = self.kube.send(&url, KubeMethod::Get, None, String::new()).await?;
            if !matches!(status, 200 | 201 | 202 | 203) {
                return Err(CoordinatorError::NotFound {
                    module: Module::Controller,
                    feature: Feature::Deploy,
                    message: format!("deployment {deploy_name} missing during restore"),
                });
            }

            let rank_table_name = ranktable_name(&record.server_name, i);
            self.instances.insert(
                i,
                InferInstance {
                    restore_state: RestoreState::None,
                    name_space: record.namespace.clone(),
                    master_created_at: None,
                    master_ip: None,
                    deployment_name: deploy_name,
                    ranktable_name: rank_table_name,
                    health: Health::Unready,
                    labeled: false,
                },
            );
        }
        *self.deploy_status.write() = DeployStatus::Created;
        Ok(())
    }

    #[cfg(test)]
    pub fn instance_snapshot(&self) -> HashMap<u32, InferInstance> {
        self.instances.iter().map(|e| (*e.key(), e.value().clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::kube_client::fake::FakeKubeClient;
    use super::*;

    fn sample_config() -> DeployConfig {
        DeployConfig {
            server_name: "demo".into(),
            scheduler: "default".into(),
            service_type: "NodePort".into(),
            service_port: 31000,
            replicas: 1,
            cross_node_num: 2,
            resource_requests: ResourceRequests {
                memory: 2000,
                cpu_core: 2000,
                npu_type: "Ascend910".into(),
                npu_chip_num: 8,
            },
            init_delay: 10,
            mindie_server_config: MindieServerConfig {
                infer_port: 1025,
                management_port: 1026,
                enable_tls: false,
                mies_install_path: "/opt/mindie".into(),
                detect_inner_error: false,
            },
            liveness_timeout: 5,
            readiness_timeout: 5,
            liveness_failure_threshold: 3,
            readiness_failure_threshold: 3,
            name_space: "default".into(),
        }
    }

    #[test]
    fn validate_accepts_a_well_formed_config() {
        assert!(validate_deploy_config(&sample_config(), 1, false).is_ok());
    }

    #[test]
    fn validate_rejects_bad_service_port() {
        let mut config = sample_config();
        config.service_port = 1000;
        assert!(matches!(
            validate_deploy_config(&config, 1, false),
            Err(CoordinatorError::InvalidInput { .. })
        ));
    }

    #[test]
    fn validate_rejects_cross_node_num_outside_two_or_four() {
        let mut config = sample_config();
        config.cross_node_num = 3;
        assert!(matches!(
            validate_deploy_config(&config, 1, false),
            Err(CoordinatorError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn deploy_creates_configmap_deployment_and_service() {
        let kube = Arc::new(FakeKubeClient::new(vec![
            (201, "{}".into()),
            (201, "{}".into()),
            (201, "{}".into()),
        ]));
        let dir = std::env::temp_dir().join(format!("digs-cn-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let status_handler = Arc::new(StatusHandler::new(dir.join("status.json"), 1));
        let controller = CrossNodeController::new(kube.clone(), status_handler, CrossNodeConfig::default());

        controller.deploy(sample_config()).await.unwrap();
        assert_eq!(controller.status().0, DeployStatus::Created);
        assert_eq!(kube.calls.lock().len(), 3);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn deploy_failure_clears_resources_created_so_far() {
        let kube = Arc::new(FakeKubeClient::new(vec![(201, "{}".into()), (500, "boom".into())]));
        let dir = std::env::temp_dir().join(format!("digs-cn-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let status_handler = Arc::new(StatusHandler::new(dir.join("status.json"), 1));
        let controller = CrossNodeController::new(kube.clone(), status_handler, CrossNodeConfig::default());

        let result = controller.deploy(sample_config()).await;
        assert!(result.is_err());
        assert_eq!(controller.status().0, DeployStatus::Failed);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
