//! Kubernetes resource builders for KataConfig
//!
//! Pure functions computing the objects the controller owns: the
//! install/uninstall DaemonSets, the dedicated MachineConfigPool, the CRI-O
//! MachineConfig and the RuntimeClass. Builders never touch the API server,
//! and repeated calls for the same KataConfig produce identical objects.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, Container, EnvVar, EnvVarSource, ExecAction, HostPathVolumeSource,
    Lifecycle, LifecycleHandler, PodSpec, PodTemplateSpec, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::api::node::v1::{Overhead, RuntimeClass, Scheduling};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta, OwnerReference,
};
use kube::{Resource, ResourceExt};
use serde_json::json;

use super::config::ControllerConfig;
use super::templates::{encoded_crio_dropin, CRIO_DROPIN_PATH};
use crate::crd::{
    KataConfig, MachineConfig, MachineConfigPool, MachineConfigPoolSpec, MachineConfigSpec,
};
use crate::error::Result;

pub const DAEMON_NAME_PREFIX: &str = "kata-operator-daemon-";
pub const DAEMON_CONTAINER_NAME: &str = "kata-install-pod";
pub const PAYLOAD_CONFIG_MAP: &str = "payload-config";
pub const PAYLOAD_CONFIG_MAP_KEY: &str = "daemon.payload";

/// Name of the MachineConfigPool created when the pool selector does not
/// target a whole node role
pub const KATA_POOL_NAME: &str = "kata-oc";
pub const MACHINE_CONFIG_NAME: &str = "50-kata-crio-dropin";
pub const RUNTIME_CLASS_NAME: &str = "kata";

pub const NODE_ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";
pub const MACHINE_CONFIG_ROLE_LABEL: &str = "machineconfiguration.openshift.io/role";

// Same pod overhead as upstream kata-deploy
pub const RUNTIME_OVERHEAD_CPU: &str = "250m";
pub const RUNTIME_OVERHEAD_MEMORY: &str = "160Mi";

const OSBUILDER_UNIT_NAME: &str = "kata-osbuilder-generate.service";
const OSBUILDER_UNIT_CONTENTS: &str = r#"
[Unit]
Description=Hacky service to enable kata-osbuilder-generate.service
ConditionPathExists=/usr/lib/systemd/system/kata-osbuilder-generate.service
[Service]
Type=oneshot
ExecStart=/usr/libexec/kata-containers/osbuilder/kata-osbuilder.sh
ExecRestart=/usr/libexec/kata-containers/osbuilder/kata-osbuilder.sh
[Install]
WantedBy=multi-user.target
"#;

/// What the on-node daemon is asked to do
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DaemonOperation {
    Install,
    Uninstall,
}

impl DaemonOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonOperation::Install => "install",
            DaemonOperation::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for DaemonOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the CRI-O configuration for the selected nodes is rolled out
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolPlacement {
    /// The pool selector covers a whole node role, so the role's own pool
    /// (`worker` or `master`) receives the configuration
    Role(String),
    /// The pool selector picks a subset of nodes, which are grouped into the
    /// dedicated `kata-oc` pool
    Dedicated { parent_role: String },
}

impl PoolPlacement {
    /// Role whose pool the selected nodes belong to outside of Kata
    pub fn role(&self) -> &str {
        match self {
            PoolPlacement::Role(role) => role,
            PoolPlacement::Dedicated { parent_role } => parent_role,
        }
    }

    pub fn is_dedicated(&self) -> bool {
        matches!(self, PoolPlacement::Dedicated { .. })
    }
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(kc: &KataConfig) -> OwnerReference {
    OwnerReference {
        api_version: KataConfig::api_version(&()).to_string(),
        kind: KataConfig::kind(&()).to_string(),
        name: kc.name_any(),
        uid: kc.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Label selecting every node of a role
pub fn role_labels(role: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(format!("{NODE_ROLE_LABEL_PREFIX}{role}"), String::new())])
}

/// Labels selecting the nodes that receive the runtime
///
/// The user's selector wins; without one every node of `role` is selected.
pub fn effective_pool_labels(kc: &KataConfig, role: &str) -> BTreeMap<String, String> {
    kc.spec
        .pool_match_labels()
        .cloned()
        .unwrap_or_else(|| role_labels(role))
}

pub fn pool_placement(kc: &KataConfig, role: &str) -> PoolPlacement {
    let role_key = format!("{NODE_ROLE_LABEL_PREFIX}{role}");
    if effective_pool_labels(kc, role).contains_key(&role_key) {
        PoolPlacement::Role(role.to_string())
    } else {
        PoolPlacement::Dedicated {
            parent_role: role.to_string(),
        }
    }
}

/// Render a label map as a list selector (`k=v,k2=`)
pub fn label_selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn daemon_set_name(operation: DaemonOperation) -> String {
    format!("{DAEMON_NAME_PREFIX}{operation}")
}

// ============================================================================
// DaemonSet
// ============================================================================

/// Build the privileged DaemonSet running the on-node daemon for `operation`
/// on every node selected for `role`
pub fn build_daemon_set(
    kc: &KataConfig,
    operation: DaemonOperation,
    role: &str,
    config: &ControllerConfig,
) -> DaemonSet {
    let name = daemon_set_name(operation);
    let labels = BTreeMap::from([("name".to_string(), name.clone())]);
    let node_selector = effective_pool_labels(kc, role);

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(config.operator_namespace.clone()),
            owner_references: Some(vec![owner_reference(kc)]),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some("default".to_string()),
                    node_selector: Some(node_selector),
                    containers: vec![build_daemon_container(kc, operation, config)],
                    volumes: Some(vec![Volume {
                        name: "hostroot".to_string(),
                        host_path: Some(HostPathVolumeSource {
                            path: "/".to_string(),
                            type_: None,
                        }),
                        ..Default::default()
                    }]),
                    host_network: Some(true),
                    host_pid: Some(true),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn build_daemon_container(
    kc: &KataConfig,
    operation: DaemonOperation,
    config: &ControllerConfig,
) -> Container {
    Container {
        name: DAEMON_CONTAINER_NAME.to_string(),
        image: Some(config.daemon_image.clone()),
        image_pull_policy: Some("Always".to_string()),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            run_as_user: Some(0),
            ..Default::default()
        }),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        "rm -rf /host/opt/kata-install /host/usr/local/kata/".to_string(),
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!(
                "/daemon --resource {} --operation {}",
                kc.name_any(),
                operation
            ),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "hostroot".to_string(),
            mount_path: "/host".to_string(),
            ..Default::default()
        }]),
        env: Some(vec![EnvVar {
            name: "KATA_PAYLOAD_IMAGE".to_string(),
            value_from: Some(EnvVarSource {
                config_map_key_ref: Some(ConfigMapKeySelector {
                    name: Some(PAYLOAD_CONFIG_MAP.to_string()),
                    key: PAYLOAD_CONFIG_MAP_KEY.to_string(),
                    optional: Some(true),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

// ============================================================================
// MachineConfigPool
// ============================================================================

/// Build the dedicated `kata-oc` pool grouping the selected nodes
pub fn build_machine_config_pool(kc: &KataConfig) -> MachineConfigPool {
    let mut pool = MachineConfigPool::new(
        KATA_POOL_NAME,
        MachineConfigPoolSpec {
            machine_config_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: MACHINE_CONFIG_ROLE_LABEL.to_string(),
                    operator: "In".to_string(),
                    values: Some(vec![KATA_POOL_NAME.to_string(), "worker".to_string()]),
                }]),
                ..Default::default()
            }),
            node_selector: kc.spec.kata_config_pool_selector.clone(),
        },
    );
    pool.metadata.owner_references = Some(vec![owner_reference(kc)]);
    pool
}

// ============================================================================
// MachineConfig
// ============================================================================

/// Build the MachineConfig dropping the CRI-O runtime configuration onto
/// every machine of `pool`
pub fn build_machine_config(
    kc: &KataConfig,
    pool: &str,
    runtime_name: &str,
) -> Result<MachineConfig> {
    let dropin = encoded_crio_dropin(runtime_name)?;

    let ignition = json!({
        "ignition": { "version": "2.2.0" },
        "systemd": {
            "units": [{
                "name": OSBUILDER_UNIT_NAME,
                "enabled": true,
                "contents": OSBUILDER_UNIT_CONTENTS,
            }]
        },
        "storage": {
            "files": [{
                "filesystem": "root",
                "path": CRIO_DROPIN_PATH,
                "mode": 420,
                "contents": {
                    "source": format!("data:text/plain;charset=utf-8;base64,{dropin}"),
                },
            }]
        }
    });

    let mut mc = MachineConfig::new(
        MACHINE_CONFIG_NAME,
        MachineConfigSpec {
            config: Some(ignition),
        },
    );
    mc.metadata.labels = Some(BTreeMap::from([
        (MACHINE_CONFIG_ROLE_LABEL.to_string(), pool.to_string()),
        ("app".to_string(), kc.name_any()),
    ]));
    mc.metadata.owner_references = Some(vec![owner_reference(kc)]);
    Ok(mc)
}

// ============================================================================
// RuntimeClass
// ============================================================================

/// Build the RuntimeClass workloads use to request the Kata runtime
pub fn build_runtime_class(kc: &KataConfig) -> RuntimeClass {
    let pod_fixed = BTreeMap::from([
        ("cpu".to_string(), Quantity(RUNTIME_OVERHEAD_CPU.to_string())),
        (
            "memory".to_string(),
            Quantity(RUNTIME_OVERHEAD_MEMORY.to_string()),
        ),
    ]);

    RuntimeClass {
        metadata: ObjectMeta {
            name: Some(RUNTIME_CLASS_NAME.to_string()),
            owner_references: Some(vec![owner_reference(kc)]),
            ..Default::default()
        },
        handler: RUNTIME_CLASS_NAME.to_string(),
        overhead: Some(Overhead {
            pod_fixed: Some(pod_fixed),
        }),
        scheduling: kc.spec.pool_match_labels().map(|labels| Scheduling {
            node_selector: Some(labels.clone()),
            tolerations: None,
        }),
    }
}
