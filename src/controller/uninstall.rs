//! Uninstall orchestration
//!
//! Runs while a deleted KataConfig still carries the finalizer. Steps are
//! strictly ordered and each one tolerates being re-run after a crash:
//!
//! 1. refuse while any pod still requests the published RuntimeClass
//! 2. launch the uninstall daemons
//! 3. release uninstalled nodes from a custom selector by stripping its labels
//! 4. remove the machine configuration once the pool has settled
//! 5. record completed nodes, drop the daemons and release the finalizer

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::config::ControllerConfig;
use super::finalizers::{has_finalizer, remove_finalizer};
use super::lifecycle::{delete_best_effort, ensure_created, ensure_deleted, Cleanup};
use super::pool::{get_pool, resolve_role};
use super::resources::{
    build_daemon_set, daemon_set_name, effective_pool_labels, pool_placement, DaemonOperation,
    PoolPlacement, KATA_POOL_NAME, MACHINE_CONFIG_NAME,
};
use super::store::{ClusterStore, KataEvent};
use crate::crd::{KataConfig, KataConfigStatus, MachineConfig, MachineConfigPool};
use crate::error::{Error, Result};

#[instrument(skip(store, config, kc), fields(name = %kc.name_any()))]
pub async fn uninstall<S: ClusterStore>(
    store: &S,
    config: &ControllerConfig,
    kc: &KataConfig,
) -> Result<Action> {
    if !has_finalizer(kc) {
        debug!("Finalizer already removed, nothing to tear down");
        return Ok(Action::await_change());
    }

    let mut status = kc.status.clone().unwrap_or_default();

    ensure_runtime_unused(store, kc, &status).await?;

    let role = resolve_role(store).await?;
    let placement = pool_placement(kc, &role);

    let daemon_set = build_daemon_set(kc, DaemonOperation::Uninstall, &role, config);
    ensure_created(store, &daemon_set).await?;

    if !status.uninstall_completed() {
        release_uninstalled_nodes(store, kc, &status, &placement).await?;
    }

    if let Some(action) = remove_node_configuration(store, config, &status, &placement).await? {
        return Ok(action);
    }

    let kc = record_uninstalled_nodes(store, kc, &mut status).await?;
    if !status.uninstall_completed() {
        if !remaining_targets_uninstalled(store, &kc, &status, &role).await? {
            info!(
                completed = status.un_installation_status.completed.completed_nodes_count,
                total = status.total_nodes_count,
                "Waiting for the remaining nodes to uninstall"
            );
            return Ok(Action::requeue(config.wait_requeue));
        }

        let message = format!(
            "Pool shrank since install: {} of {} nodes uninstalled, none left pending",
            status.un_installation_status.completed.completed_nodes_count,
            status.total_nodes_count
        );
        warn!("{}", message);
        store
            .record_event(&kc, KataEvent::warning("NodePoolShrank", message))
            .await;
    }

    ensure_deleted::<S, DaemonSet>(
        store,
        &daemon_set_name(DaemonOperation::Uninstall),
        Some(&config.operator_namespace),
    )
    .await?;

    store
        .record_event(
            &kc,
            KataEvent::normal(
                "UninstallComplete",
                format!(
                    "Kata runtime removed from {} nodes",
                    status.un_installation_status.completed.completed_nodes_count
                ),
            ),
        )
        .await;
    remove_finalizer(store, &kc).await?;

    Ok(Action::await_change())
}

/// Fail while any pod in the cluster still runs with the published handle
async fn ensure_runtime_unused<S: ClusterStore>(
    store: &S,
    kc: &KataConfig,
    status: &KataConfigStatus,
) -> Result<()> {
    if status.runtime_class.is_empty() {
        return Ok(());
    }

    let pods: Vec<Pod> = store.list(&BTreeMap::new()).await?;
    let in_use: Vec<String> = pods
        .iter()
        .filter(|pod| {
            pod.spec
                .as_ref()
                .and_then(|spec| spec.runtime_class_name.as_deref())
                == Some(status.runtime_class.as_str())
        })
        .map(|pod| {
            format!(
                "{}/{}",
                pod.namespace().unwrap_or_default(),
                pod.name_any()
            )
        })
        .collect();

    if in_use.is_empty() {
        return Ok(());
    }

    let err = Error::RuntimeInUse {
        runtime_class: status.runtime_class.clone(),
        pods: in_use.join(", "),
    };
    warn!("{}", err);
    store
        .record_event(kc, KataEvent::warning("RuntimeInUse", err.to_string()))
        .await;
    Err(err)
}

/// Whether every node still targeted by the pool finished uninstalling.
///
/// Covers nodes removed from the cluster after sizing, which leave the
/// completed count short of the total forever. In dedicated placement the
/// finished nodes have already lost the selector labels, so only nodes that
/// still need the uninstall daemon match.
async fn remaining_targets_uninstalled<S: ClusterStore>(
    store: &S,
    kc: &KataConfig,
    status: &KataConfigStatus,
    role: &str,
) -> Result<bool> {
    let labels = effective_pool_labels(kc, role);
    let nodes: Vec<Node> = store.list(&labels).await?;
    let completed = &status.un_installation_status.completed;
    let pending: Vec<String> = nodes
        .iter()
        .map(|n| n.name_any())
        .filter(|n| !completed.contains(n))
        .collect();
    if !pending.is_empty() {
        debug!(pending = ?pending, "Nodes still to uninstall");
    }
    Ok(pending.is_empty())
}

/// Strip the pool selector's label keys from nodes that finished uninstalling
/// so they leave the dedicated pool
async fn release_uninstalled_nodes<S: ClusterStore>(
    store: &S,
    kc: &KataConfig,
    status: &KataConfigStatus,
    placement: &PoolPlacement,
) -> Result<()> {
    let Some(selector) = kc.spec.pool_match_labels() else {
        return Ok(());
    };
    if !placement.is_dedicated() {
        return Ok(());
    }

    let keys: Vec<String> = selector.keys().cloned().collect();
    for node in status.pending_uninstalled_nodes() {
        match store.remove_node_labels(&node, &keys).await {
            Ok(()) => info!(node = %node, "Removed pool selector labels"),
            Err(e) if e.is_not_found() => debug!(node = %node, "Node is gone, skipping"),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Remove the MachineConfig (and the dedicated pool) once the pool the nodes
/// return to has converged.
///
/// Returns the action to requeue with when the pool is still rolling.
async fn remove_node_configuration<S: ClusterStore>(
    store: &S,
    config: &ControllerConfig,
    status: &KataConfigStatus,
    placement: &PoolPlacement,
) -> Result<Option<Action>> {
    match placement {
        PoolPlacement::Role(role) => {
            let cleanup =
                delete_best_effort::<S, MachineConfig>(store, MACHINE_CONFIG_NAME, None).await;
            if needs_settle(&cleanup) {
                // The Machine Config Operator needs a moment to mark the
                // pool as updating before its counters mean anything
                tokio::time::sleep(config.pool_settle_delay).await;
            }

            let pool = get_pool(store, role).await?;
            if !pool.is_settled() {
                info!(pool = %role, "Waiting for pool to roll back the CRI-O configuration");
                return Ok(Some(Action::requeue(config.wait_requeue)));
            }
        }
        PoolPlacement::Dedicated { parent_role } => {
            let in_progress = &status
                .un_installation_status
                .in_progress
                .binaries_uninstalled_nodes_list;
            if in_progress.is_empty() && !status.uninstall_completed() {
                debug!("No node has uninstalled the binaries yet");
                return Ok(Some(Action::requeue(config.wait_requeue)));
            }

            tokio::time::sleep(config.pool_settle_delay).await;

            let pool = get_pool(store, parent_role).await?;
            if !pool.is_settled() {
                info!(pool = %parent_role, "Waiting for released nodes to rejoin their pool");
                return Ok(Some(Action::requeue(config.wait_requeue)));
            }

            delete_best_effort::<S, MachineConfigPool>(store, KATA_POOL_NAME, None).await;
            delete_best_effort::<S, MachineConfig>(store, MACHINE_CONFIG_NAME, None).await;
        }
    }
    Ok(None)
}

/// A MachineConfig that was present this pass may still be rolling back,
/// even when deleting it failed
fn needs_settle(cleanup: &Cleanup) -> bool {
    !matches!(cleanup, Cleanup::AlreadyAbsent)
}

/// Move nodes that finished uninstalling from in-progress to completed and
/// persist the result
async fn record_uninstalled_nodes<S: ClusterStore>(
    store: &S,
    kc: &KataConfig,
    status: &mut KataConfigStatus,
) -> Result<KataConfig> {
    let pending = status.pending_uninstalled_nodes();
    if pending.is_empty() {
        return Ok(kc.clone());
    }

    let uninstall = &mut status.un_installation_status;
    for node in &pending {
        uninstall.completed.mark(node);
        uninstall.in_progress.in_progress_nodes_count =
            (uninstall.in_progress.in_progress_nodes_count - 1).max(0);
    }
    uninstall
        .in_progress
        .binaries_uninstalled_nodes_list
        .retain(|n| !pending.contains(n));

    info!(nodes = pending.len(), "Recorded uninstalled nodes");
    store.patch_status(kc, status).await
}
