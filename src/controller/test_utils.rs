//! In-memory object store and fixtures for controller tests

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::{Node, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, Time};
use kube::{Resource, ResourceExt};
use serde_json::Value;

use super::store::{ClusterStore, KataEvent, ManagedObject};
use crate::crd::{
    KataConfig, KataConfigSpec, KataConfigStatus, MachineConfigPool, MachineConfigPoolSpec,
    MachineConfigPoolStatus,
};
use crate::error::{Error, Result};

type Key = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    /// Last state of every object removed from the store
    removed: BTreeMap<Key, Value>,
    events: Vec<KataEvent>,
    failing_deletes: BTreeSet<(String, String)>,
    writes: usize,
    next_version: u64,
}

/// [`ClusterStore`] over a map of JSON documents.
///
/// Deleting a KataConfig that still carries finalizers only sets its deletion
/// timestamp, and clearing the last finalizer removes it, as the API server
/// does. KataConfig patches from a stale copy fail with a 409 conflict.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn key<K: ManagedObject>(name: &str, namespace: Option<&str>) -> Key {
    (
        K::kind(&()).to_string(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn conflict_error(name: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!(
            "Operation cannot be fulfilled on kataconfigs \"{name}\": \
             the object has been modified; please apply your changes to the latest version"
        ),
        reason: "Conflict".to_string(),
        code: 409,
    }))
}

fn transient_error() -> Error {
    Error::KubeError(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: "injected failure".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

impl State {
    fn stamp(&mut self, value: &mut Value) {
        self.next_version += 1;
        self.writes += 1;
        value["metadata"]["resourceVersion"] = Value::String(self.next_version.to_string());
    }

    fn load<K: ManagedObject>(&self, name: &str, namespace: Option<&str>) -> Result<K> {
        let value = self
            .objects
            .get(&key::<K>(name, namespace))
            .ok_or_else(|| Error::not_found(K::kind(&()), name))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    fn remove(&mut self, k: &Key) {
        if let Some(value) = self.objects.remove(k) {
            self.writes += 1;
            self.removed.insert(k.clone(), value);
        }
    }

    /// Load the stored KataConfig, failing like the API server when `kc`
    /// carries a resourceVersion that is no longer current
    fn load_current(&self, kc: &KataConfig) -> Result<KataConfig> {
        let name = kc.name_any();
        let current: KataConfig = self.load(&name, None)?;
        match kc.resource_version() {
            Some(seen) if Some(&seen) != current.metadata.resource_version.as_ref() => {
                Err(conflict_error(&name))
            }
            _ => Ok(current),
        }
    }

    /// Store a KataConfig edited from outside the controller
    fn replace_external(&mut self, mut kc: KataConfig) {
        self.next_version += 1;
        kc.metadata.resource_version = Some(self.next_version.to_string());
        let k = key::<KataConfig>(&kc.name_any(), None);
        self.objects.insert(k, serde_json::to_value(&kc).unwrap());
    }

    fn save<K: ManagedObject>(&mut self, obj: &K) -> Result<K> {
        let mut value = serde_json::to_value(obj)?;
        self.stamp(&mut value);
        let k = key::<K>(&obj.name_any(), obj.meta().namespace.as_deref());
        self.objects.insert(k, value.clone());
        Ok(serde_json::from_value(value)?)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting it as a controller write
    pub fn insert<K: ManagedObject>(&self, obj: K) {
        let mut state = self.state.lock().unwrap();
        let mut value = serde_json::to_value(&obj).unwrap();
        state.next_version += 1;
        value["metadata"]["resourceVersion"] = Value::String(state.next_version.to_string());
        let k = key::<K>(&obj.name_any(), obj.meta().namespace.as_deref());
        state.objects.insert(k, value);
    }

    pub fn object<K: ManagedObject>(&self, name: &str, namespace: Option<&str>) -> Option<K> {
        self.state.lock().unwrap().load(name, namespace).ok()
    }

    pub fn exists<K: ManagedObject>(&self, name: &str, namespace: Option<&str>) -> bool {
        self.object::<K>(name, namespace).is_some()
    }

    /// Final state of an object that has been removed
    pub fn removed<K: ManagedObject>(&self, name: &str, namespace: Option<&str>) -> Option<K> {
        let state = self.state.lock().unwrap();
        let value = state.removed.get(&key::<K>(name, namespace))?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn kata_config(&self, name: &str) -> KataConfig {
        self.object(name, None).expect("KataConfig present")
    }

    /// Every stored document, for before/after comparisons
    pub fn snapshot(&self) -> BTreeMap<Key, Value> {
        self.state.lock().unwrap().objects.clone()
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn events(&self) -> Vec<KataEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn event_reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }

    /// Make every delete of `kind/name` fail with a transient error
    pub fn fail_deletes_of<K: ManagedObject>(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert((K::kind(&()).to_string(), name.to_string()));
    }

    /// Apply `f` to a KataConfig status as the on-node daemon would
    pub fn update_status(&self, name: &str, f: impl FnOnce(&mut KataConfigStatus)) {
        let mut state = self.state.lock().unwrap();
        let mut kc: KataConfig = state.load(name, None).unwrap();
        let mut status = kc.status.take().unwrap_or_default();
        f(&mut status);
        kc.status = Some(status);
        state.replace_external(kc);
    }

    /// Report machine counts on a pool as the Machine Config Operator would
    pub fn set_pool_counts(&self, name: &str, machines: i32, ready: i32) {
        let mut pool = self
            .object::<MachineConfigPool>(name, None)
            .unwrap_or_else(|| MachineConfigPool::new(name, MachineConfigPoolSpec::default()));
        pool.status = Some(MachineConfigPoolStatus {
            machine_count: machines,
            ready_machine_count: ready,
            ..Default::default()
        });
        self.insert(pool);
    }

    /// Request deletion of a KataConfig
    pub fn request_deletion(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let mut kc: KataConfig = state.load(name, None).unwrap();
        kc.metadata.deletion_timestamp = Some(Time(Utc::now()));
        state.replace_external(kc);
    }

    /// Remove an object the way another client would
    pub fn remove<K: ManagedObject>(&self, name: &str, namespace: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.objects.remove(&key::<K>(name, namespace));
    }
}

fn labels_match(meta: &ObjectMeta, selector: &BTreeMap<String, String>) -> bool {
    let labels = meta.labels.clone().unwrap_or_default();
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get<K: ManagedObject>(&self, name: &str, namespace: Option<&str>) -> Result<K> {
        self.state.lock().unwrap().load(name, namespace)
    }

    async fn list<K: ManagedObject>(&self, labels: &BTreeMap<String, String>) -> Result<Vec<K>> {
        let state = self.state.lock().unwrap();
        let kind = K::kind(&()).to_string();
        let mut items = Vec::new();
        for ((k, _, _), value) in &state.objects {
            if *k != kind {
                continue;
            }
            let obj: K = serde_json::from_value(value.clone())?;
            if labels_match(obj.meta(), labels) {
                items.push(obj);
            }
        }
        Ok(items)
    }

    async fn create<K: ManagedObject>(&self, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        let name = obj.name_any();
        let namespace = obj.meta().namespace.clone();
        if state
            .objects
            .contains_key(&key::<K>(&name, namespace.as_deref()))
        {
            return Err(Error::already_exists(K::kind(&()), name));
        }

        let mut obj = obj.clone();
        let meta = obj.meta_mut();
        meta.uid.get_or_insert_with(|| format!("uid-{name}"));
        meta.creation_timestamp
            .get_or_insert_with(|| Time(Utc::now()));
        state.save(&obj)
    }

    async fn delete<K: ManagedObject>(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state
            .failing_deletes
            .contains(&(K::kind(&()).to_string(), name.to_string()))
        {
            return Err(transient_error());
        }

        let k = key::<K>(name, namespace);
        let value = state
            .objects
            .get(&k)
            .cloned()
            .ok_or_else(|| Error::not_found(K::kind(&()), name))?;
        let obj: K = serde_json::from_value(value)?;

        if obj.finalizers().is_empty() {
            state.remove(&k);
        } else {
            let mut obj = obj;
            obj.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
            state.save(&obj)?;
        }
        Ok(())
    }

    async fn patch_finalizers(
        &self,
        kc: &KataConfig,
        finalizers: Vec<String>,
    ) -> Result<KataConfig> {
        let mut state = self.state.lock().unwrap();
        let name = kc.name_any();
        let mut current = state.load_current(kc)?;

        let release = finalizers.is_empty() && current.metadata.deletion_timestamp.is_some();
        current.metadata.finalizers = Some(finalizers);
        let saved = state.save(&current)?;
        if release {
            state.remove(&key::<KataConfig>(&name, None));
        }
        Ok(saved)
    }

    async fn patch_status(
        &self,
        kc: &KataConfig,
        status: &KataConfigStatus,
    ) -> Result<KataConfig> {
        let mut state = self.state.lock().unwrap();
        let mut current = state.load_current(kc)?;
        current.status = Some(status.clone());
        state.save(&current)
    }

    async fn remove_node_labels(&self, node: &str, keys: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let mut current: Node = state.load(node, None)?;
        if let Some(labels) = current.metadata.labels.as_mut() {
            for k in keys {
                labels.remove(k);
            }
        }
        state.save(&current)?;
        Ok(())
    }

    async fn record_event(&self, _kc: &KataConfig, event: KataEvent) {
        self.state.lock().unwrap().events.push(event);
    }
}

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

/// A KataConfig created `seconds` after a fixed epoch
pub fn kata_config_created_at(name: &str, seconds: i64) -> KataConfig {
    let mut kc = KataConfig::new(name, KataConfigSpec::default());
    kc.metadata.uid = Some(format!("uid-{name}"));
    kc.metadata.creation_timestamp = Some(Time(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds),
    ));
    kc
}

pub fn kata_config(name: &str) -> KataConfig {
    kata_config_created_at(name, 0)
}

pub fn kata_config_with_selector(name: &str, labels: &[(&str, &str)]) -> KataConfig {
    let mut kc = kata_config(name);
    kc.spec.kata_config_pool_selector = Some(LabelSelector {
        match_labels: Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    });
    kc
}

pub fn node(name: &str, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn worker_node(name: &str) -> Node {
    node(name, &[("node-role.kubernetes.io/worker", "")])
}

pub fn pod_with_runtime_class(namespace: &str, name: &str, runtime_class: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            runtime_class_name: Some(runtime_class.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A store holding `kc` and a worker pool with `workers` ready nodes
pub fn cluster_with_workers(kc: KataConfig, workers: usize) -> MemoryStore {
    let store = MemoryStore::new();
    store.insert(kc);
    for i in 0..workers {
        store.insert(worker_node(&format!("worker-{i}")));
    }
    store.set_pool_counts("worker", workers as i32, workers as i32);
    store.set_pool_counts("master", 3, 3);
    store
}
