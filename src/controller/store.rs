//! Access to the cluster object store
//!
//! The reconciler only talks to the API server through [`ClusterStore`], so
//! every orchestration step can be driven against an in-memory store in
//! tests. [`KubeStore`] is the production implementation over `kube::Client`.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Event, Node, Pod};
use k8s_openapi::api::node::v1::RuntimeClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use super::resources::label_selector_string;
use crate::crd::{KataConfig, KataConfigStatus, MachineConfig, MachineConfigPool};
use crate::error::{Error, Result};

pub const FIELD_MANAGER: &str = "kata-operator";

/// Namespace events about cluster-scoped objects are recorded in
const EVENT_NAMESPACE: &str = "default";

/// A kind the controller reads or writes
pub trait ManagedObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Api handle for this kind; `namespace` is ignored for cluster-scoped kinds
    fn api(client: &Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! cluster_scoped {
    ($($kind:ty),* $(,)?) => {
        $(impl ManagedObject for $kind {
            fn api(client: &Client, _namespace: Option<&str>) -> Api<Self> {
                Api::all(client.clone())
            }
        })*
    };
}

macro_rules! namespace_scoped {
    ($($kind:ty),* $(,)?) => {
        $(impl ManagedObject for $kind {
            fn api(client: &Client, namespace: Option<&str>) -> Api<Self> {
                match namespace {
                    Some(ns) => Api::namespaced(client.clone(), ns),
                    None => Api::all(client.clone()),
                }
            }
        })*
    };
}

cluster_scoped!(KataConfig, MachineConfig, MachineConfigPool, RuntimeClass, Node);
namespace_scoped!(DaemonSet, Pod);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Event reported against a KataConfig
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KataEvent {
    pub type_: EventType,
    pub reason: String,
    pub message: String,
}

impl KataEvent {
    pub fn normal(reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Normal,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn warning(reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Warning,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

/// Object store operations used by the reconciler
///
/// Missing objects are reported as [`Error::NotFound`] and create conflicts as
/// [`Error::AlreadyExists`] so call sites can tell them apart from transient
/// failures.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get<K: ManagedObject>(&self, name: &str, namespace: Option<&str>) -> Result<K>;

    /// List objects across all namespaces whose labels include `labels`
    async fn list<K: ManagedObject>(&self, labels: &BTreeMap<String, String>) -> Result<Vec<K>>;

    async fn create<K: ManagedObject>(&self, obj: &K) -> Result<K>;

    async fn delete<K: ManagedObject>(&self, name: &str, namespace: Option<&str>) -> Result<()>;

    /// Replace the finalizer list of a KataConfig
    async fn patch_finalizers(&self, kc: &KataConfig, finalizers: Vec<String>)
        -> Result<KataConfig>;

    /// Persist the status sub-document of a KataConfig
    async fn patch_status(&self, kc: &KataConfig, status: &KataConfigStatus)
        -> Result<KataConfig>;

    /// Remove `keys` from a node's labels, leaving every other label alone
    async fn remove_node_labels(&self, node: &str, keys: &[String]) -> Result<()>;

    /// Record an event against `kc`. Failures are logged, never returned.
    async fn record_event(&self, kc: &KataConfig, event: KataEvent);
}

/// [`ClusterStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    nodes: Api<Node>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        let nodes = Api::all(client.clone());
        Self { client, nodes }
    }
}

/// Map API errors for `kind/name` onto the store's error vocabulary
fn classify(err: kube::Error, kind: &str, name: &str) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => Error::not_found(kind, name),
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            Error::already_exists(kind, name)
        }
        _ => Error::KubeError(err),
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get<K: ManagedObject>(&self, name: &str, namespace: Option<&str>) -> Result<K> {
        K::api(&self.client, namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, &K::kind(&()), name))
    }

    async fn list<K: ManagedObject>(&self, labels: &BTreeMap<String, String>) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(&label_selector_string(labels));
        }
        let list = K::api(&self.client, None)
            .list(&params)
            .await
            .map_err(Error::KubeError)?;
        Ok(list.items)
    }

    async fn create<K: ManagedObject>(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        K::api(&self.client, obj.meta().namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, &K::kind(&()), &name))
    }

    async fn delete<K: ManagedObject>(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        K::api(&self.client, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, &K::kind(&()), name))
    }

    async fn patch_finalizers(
        &self,
        kc: &KataConfig,
        finalizers: Vec<String>,
    ) -> Result<KataConfig> {
        let api: Api<KataConfig> = Api::all(self.client.clone());
        let patch = json!({
            "metadata": {
                "resourceVersion": kc.resource_version(),
                "finalizers": finalizers,
            }
        });
        api.patch(
            &kc.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| classify(e, "KataConfig", &kc.name_any()))
    }

    async fn patch_status(
        &self,
        kc: &KataConfig,
        status: &KataConfigStatus,
    ) -> Result<KataConfig> {
        let api: Api<KataConfig> = Api::all(self.client.clone());
        // resourceVersion turns the merge patch into a compare-and-swap so
        // progress written concurrently by the daemons is never overwritten
        let patch = json!({
            "metadata": { "resourceVersion": kc.resource_version() },
            "status": status,
        });
        api.patch_status(
            &kc.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| classify(e, "KataConfig", &kc.name_any()))
    }

    async fn remove_node_labels(&self, node: &str, keys: &[String]) -> Result<()> {
        // A null value deletes the key in a JSON merge patch
        let labels: serde_json::Map<String, serde_json::Value> = keys
            .iter()
            .map(|k| (k.clone(), serde_json::Value::Null))
            .collect();
        let patch = json!({ "metadata": { "labels": labels } });
        self.nodes
            .patch(node, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| classify(e, "Node", node))
    }

    async fn record_event(&self, kc: &KataConfig, event: KataEvent) {
        let events: Api<Event> = Api::namespaced(self.client.clone(), EVENT_NAMESPACE);
        let now = Time(chrono::Utc::now());
        let obj = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", kc.name_any())),
                ..Default::default()
            },
            type_: Some(event.type_.as_str().to_string()),
            reason: Some(event.reason.clone()),
            message: Some(event.message.clone()),
            involved_object: kc.object_ref(&()),
            reporting_component: Some(FIELD_MANAGER.to_string()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            ..Default::default()
        };

        match events.create(&PostParams::default(), &obj).await {
            Ok(_) => debug!(reason = %event.reason, "Recorded event"),
            Err(e) => warn!(reason = %event.reason, "Failed to record event: {:?}", e),
        }
    }
}
