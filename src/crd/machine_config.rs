//! OpenShift machine-config types
//!
//! Minimal typed views of the Machine Config Operator resources this operator
//! creates and watches. Only the fields the operator reads or writes are
//! modelled; unknown fields are ignored on deserialization.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Node configuration rendered onto every machine of the targeted pool
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machineconfiguration.openshift.io",
    version = "v1",
    kind = "MachineConfig"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigSpec {
    /// Raw Ignition config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// Group of machines converged to the MachineConfigs selected by the pool
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machineconfiguration.openshift.io",
    version = "v1",
    kind = "MachineConfigPool",
    status = "MachineConfigPoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigPoolSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub machine_config_selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub node_selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigPoolStatus {
    #[serde(default)]
    pub machine_count: i32,

    #[serde(default)]
    pub ready_machine_count: i32,

    #[serde(default)]
    pub updated_machine_count: i32,

    #[serde(default)]
    pub degraded_machine_count: i32,
}

impl MachineConfigPool {
    /// `(ready, total)` machine counts reported by the rollout subsystem
    pub fn machine_counts(&self) -> (i32, i32) {
        self.status
            .as_ref()
            .map(|s| (s.ready_machine_count, s.machine_count))
            .unwrap_or((0, 0))
    }

    /// A pool is settled when every machine it owns reports ready
    pub fn is_settled(&self) -> bool {
        let (ready, total) = self.machine_counts();
        ready == total
    }
}
