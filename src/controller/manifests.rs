//! K8s manifest construction, emitted as raw JSON rather than typed
//! `k8s-openapi` structs, matching the reference source's
//! `CreateConfigMapJson`/`CreateDeployJson`/`CreateServiceJson` shape.

use serde_json::{json, Value};

use super::cross_node::DeployConfig;

pub const RANKTABLE_NAME_PREFIX: &str = "rings-config-";
pub const DEPLOYMENT_NAME_MIDDLE: &str = "-deployment-";
pub const SERVICE_NAME_SUFFIX: &str = "-service";
pub const HCCL_LABEL_KEY: &str = "ring-controller.atlas";
pub const HCCL_LABEL_VALUE: &str = "ascend-910b";
pub const MASTER_POD_LABEL_KEY: &str = "cross-node-app";

pub fn ranktable_name(server_name: &str, index: u32) -> String {
    format!("{RANKTABLE_NAME_PREFIX}{server_name}{DEPLOYMENT_NAME_MIDDLE}{index}")
}

pub fn deployment_name(server_name: &str, index: u32) -> String {
    format!("{server_name}{DEPLOYMENT_NAME_MIDDLE}{index}")
}

pub fn service_name(server_name: &str) -> String {
    format!("{server_name}{SERVICE_NAME_SUFFIX}")
}

pub fn master_label_value(server_name: &str) -> String {
    format!("{server_name}-master-node")
}

/// Creates the initializing-state ranktable ConfigMap for one replica's pod group.
pub fn create_config_map_json(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { HCCL_LABEL_KEY: HCCL_LABEL_VALUE },
        },
        "data": { "hccl.json": "{\"status\":\"initializing\"}" },
    })
}

/// Creates the multi-pod Deployment backing one replica's pod group.
pub fn create_deploy_json(config: &DeployConfig, deployment_name: &str, ranktable_name: &str) -> Value {
    let requests_cpu = format!("{}m", config.resource_requests.cpu_core);
    let requests_mem = format!("{}Mi", config.resource_requests.memory);
    let limits_cpu = format!("{}m", config.resource_requests.cpu_core * 2);
    let limits_mem = format!("{}Mi", config.resource_requests.memory * 2);
    let npu_key = format!("huawei.com/{}", config.resource_requests.npu_type.to_lowercase());

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": deployment_name,
            "namespace": config.name_space,
        },
        "spec": {
            "replicas": config.cross_node_num,
            "selector": { "matchLabels": { "deploy-name": deployment_name } },
            "template": {
                "metadata": { "labels": { "deploy-name": deployment_name } },
                "spec": {
                    "affinity": {
                        "podAntiAffinity": {
                            "requiredDuringSchedulingIgnoredDuringExecution": [{
                                "topologyKey": "kubernetes.io/hostname",
                                "labelSelector": {
                                    "matchLabels": { "deploy-name": deployment_name }
                                }
                            }]
                        }
                    },
                    "containers": [{
                        "name": deployment_name,
                        "command": ["/bin/sh", "-c", mindie_bootstrap_command(ranktable_name)],
                        "env": [
                            { "name": "MINDIE_SERVER_DISTRIBUTE", "value": "1" },
                            { "name": "MINDIE_SERVER_PROBE_ONLY", "value": "1" },
                            { "name": "RANK_TABLE_FILE", "value": "/mnt/ranktable/hccl.json" },
                            { "name": "MIES_CONFIG_JSON_PATH", "value": config.mindie_server_config.mies_install_path.clone() + "/conf/config.json" },
                            { "name": "MIES_INSTALL_PATH", "value": config.mindie_server_config.mies_install_path },
                            { "name": "MINDIE_USE_HTTPS", "value": if config.mindie_server_config.enable_tls { "1" } else { "0" } },
                            { "name": "POD_IP", "valueFrom": { "fieldRef": { "fieldPath": "status.podIP" } } },
                        ],
                        "resources": {
                            "requests": { "cpu": requests_cpu, "memory": requests_mem, &npu_key: config.resource_requests.npu_chip_num },
                            "limits": { "cpu": limits_cpu, "memory": limits_mem, &npu_key: config.resource_requests.npu_chip_num },
                        },
                        "readinessProbe": {
                            "exec": { "command": ["/bin/sh", "/opt/probe.sh"] },
                            "timeoutSeconds": config.readiness_timeout,
                            "failureThreshold": config.readiness_failure_threshold,
                        },
                        "volumeMounts": [{ "name": "ranktable", "mountPath": "/mnt/ranktable" }],
                    }],
                    "volumes": [{
                        "name": "ranktable",
                        "configMap": { "name": ranktable_name },
                    }],
                }
            }
        }
    })
}

fn mindie_bootstrap_command(ranktable_name: &str) -> String {
    format!(
        "while [ \"$(cat /mnt/ranktable/hccl.json | grep -o completed)\" != completed ]; do sleep 1; done; \
         cp /mnt/ranktable/hccl.json /tmp/hccl.json; exec /opt/mindie/bin/mindie-server --rank-table /tmp/hccl.json # ranktable={ranktable_name}"
    )
}

/// Creates the NodePort Service selecting the labeled master pod.
pub fn create_service_json(config: &DeployConfig, selector_key: &str, selector_value: &str, service_name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": service_name,
            "namespace": config.name_space,
        },
        "spec": {
            "type": "NodePort",
            "selector": { selector_key: selector_value },
            "ports": [{
                "port": config.service_port,
                "targetPort": config.mindie_server_config.infer_port,
                "nodePort": config.service_port,
            }],
        }
    })
}
