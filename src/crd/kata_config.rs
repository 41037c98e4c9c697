//! KataConfig Custom Resource Definition
//!
//! A KataConfig declares that the Kata Containers runtime should be installed
//! on a pool of nodes. Only one KataConfig may be active in a cluster at a
//! time; the oldest one wins.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Value written to `failed.failedNodesCount` on a KataConfig that lost
/// arbitration to an older instance.
pub const REJECTED_FAILED_NODES_COUNT: i32 = -1;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kataconfiguration.openshift.io",
    version = "v1",
    kind = "KataConfig",
    status = "KataConfigStatus",
    shortname = "kc",
    printcolumn = r#"{"name":"Total","type":"integer","jsonPath":".status.totalNodesCount"}"#,
    printcolumn = r#"{"name":"Installed","type":"integer","jsonPath":".status.installationStatus.completed.completedNodesCount"}"#,
    printcolumn = r#"{"name":"RuntimeClass","type":"string","jsonPath":".status.runtimeClass"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KataConfigSpec {
    /// Label selector choosing the nodes that receive the runtime.
    /// When unset, every node of the resolved role (worker, or master on a
    /// compact cluster) is targeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub kata_config_pool_selector: Option<LabelSelector>,
}

impl KataConfigSpec {
    /// Match labels of the pool selector, if a non-empty selector is set
    pub fn pool_match_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.kata_config_pool_selector
            .as_ref()
            .and_then(|s| s.match_labels.as_ref())
            .filter(|labels| !labels.is_empty())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KataConfigStatus {
    /// Number of nodes targeted by this installation cycle; 0 until sized.
    #[serde(default)]
    pub total_nodes_count: i32,

    /// Name of the published RuntimeClass; empty until published.
    #[serde(default)]
    pub runtime_class: String,

    /// Kata payload image the daemon installs from.
    #[serde(default)]
    pub kata_image: String,

    #[serde(default)]
    pub installation_status: KataInstallationStatus,

    #[serde(default, rename = "unInstallationStatus")]
    pub un_installation_status: KataUnInstallationStatus,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct KataInstallationStatus {
    #[serde(default, rename = "inprogress")]
    pub in_progress: KataInstallationInProgressStatus,

    #[serde(default)]
    pub completed: KataCompletedStatus,

    #[serde(default)]
    pub failed: KataFailedStatus,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KataInstallationInProgressStatus {
    #[serde(default)]
    pub in_progress_nodes_count: i32,

    #[serde(default, rename = "binariesInstallNodesList")]
    pub binaries_installed_nodes_list: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct KataUnInstallationStatus {
    #[serde(default, rename = "inprogress")]
    pub in_progress: KataUnInstallationInProgressStatus,

    #[serde(default)]
    pub completed: KataCompletedStatus,

    #[serde(default)]
    pub failed: KataFailedStatus,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KataUnInstallationInProgressStatus {
    #[serde(default)]
    pub in_progress_nodes_count: i32,

    #[serde(default, rename = "binariesUninstallNodesList")]
    pub binaries_uninstalled_nodes_list: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KataCompletedStatus {
    #[serde(default)]
    pub completed_nodes_count: i32,

    #[serde(default)]
    pub completed_nodes_list: Vec<String>,
}

impl KataCompletedStatus {
    pub fn contains(&self, node: &str) -> bool {
        self.completed_nodes_list.iter().any(|n| n == node)
    }

    /// Record a node as completed. Returns false if it was already listed.
    pub fn mark(&mut self, node: &str) -> bool {
        if self.contains(node) {
            return false;
        }
        self.completed_nodes_list.push(node.to_string());
        self.completed_nodes_count += 1;
        true
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KataFailedStatus {
    #[serde(default)]
    pub failed_nodes_count: i32,

    #[serde(default)]
    pub failed_nodes_list: Vec<FailedNodeStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct FailedNodeStatus {
    /// Node name; empty for failures not tied to a node
    #[serde(default)]
    pub name: String,
    pub error: String,
}

impl KataConfigStatus {
    pub fn install_completed(&self) -> bool {
        self.total_nodes_count > 0
            && self.installation_status.completed.completed_nodes_count == self.total_nodes_count
    }

    pub fn binaries_installed_everywhere(&self) -> bool {
        self.total_nodes_count > 0
            && self
                .installation_status
                .in_progress
                .binaries_installed_nodes_list
                .len()
                == self.total_nodes_count as usize
    }

    /// Every sized node finished uninstalling. Nodes that joined the pool
    /// after sizing also run the uninstall daemon, so the count may overshoot.
    pub fn uninstall_completed(&self) -> bool {
        self.un_installation_status.completed.completed_nodes_count >= self.total_nodes_count
    }

    /// Whether this KataConfig was rejected in favour of an older instance
    pub fn is_rejected(&self) -> bool {
        self.installation_status.failed.failed_nodes_count == REJECTED_FAILED_NODES_COUNT
    }

    /// Nodes that finished uninstalling binaries but are not yet marked completed
    pub fn pending_uninstalled_nodes(&self) -> Vec<String> {
        self.un_installation_status
            .in_progress
            .binaries_uninstalled_nodes_list
            .iter()
            .filter(|n| !self.un_installation_status.completed.contains(n))
            .cloned()
            .collect()
    }
}
