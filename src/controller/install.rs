//! Install orchestration
//!
//! Sizes the target pool once per installation cycle, launches the install
//! daemons until every node reports completion, and makes sure the finalizer
//! is in place so teardown stays reachable whatever happens later.

use k8s_openapi::api::core::v1::Node;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{info, instrument, warn};

use super::config::ControllerConfig;
use super::finalizers::add_finalizer;
use super::lifecycle::ensure_created;
use super::pool::resolve_role;
use super::resources::{
    build_daemon_set, effective_pool_labels, label_selector_string, DaemonOperation,
};
use super::store::{ClusterStore, KataEvent};
use crate::crd::KataConfig;
use crate::error::{Error, Result};

#[instrument(skip(store, config, kc), fields(name = %kc.name_any()))]
pub async fn install<S: ClusterStore>(
    store: &S,
    config: &ControllerConfig,
    kc: &KataConfig,
) -> Result<Action> {
    let mut status = kc.status.clone().unwrap_or_default();
    let original = status.clone();

    // The role only matters while there is still sizing or installing to do
    let role = if status.total_nodes_count == 0 || !status.install_completed() {
        Some(resolve_role(store).await?)
    } else {
        None
    };

    if status.total_nodes_count == 0 {
        let role = role.as_deref().unwrap_or_default();
        let labels = effective_pool_labels(kc, role);
        let nodes: Vec<Node> = store.list(&labels).await?;
        let selector = label_selector_string(&labels);

        if nodes.is_empty() {
            warn!(selector = %selector, "No nodes match the pool selector");
            let err = Error::EmptyNodePool { selector };
            store
                .record_event(kc, KataEvent::warning("EmptyNodePool", err.to_string()))
                .await;
            return Err(err);
        }

        info!(selector = %selector, nodes = nodes.len(), "Sized kata node pool");
        status.total_nodes_count = nodes.len() as i32;
    }

    if status.kata_image.is_empty() {
        status.kata_image = config.payload_image.clone();
    }

    let kc = if status != original {
        store.patch_status(kc, &status).await?
    } else {
        kc.clone()
    };

    if let Some(role) = role.filter(|_| !status.install_completed()) {
        let daemon_set = build_daemon_set(&kc, DaemonOperation::Install, &role, config);
        ensure_created(store, &daemon_set).await?;
    }

    add_finalizer(store, &kc).await?;

    Ok(Action::await_change())
}
