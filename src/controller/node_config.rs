//! CRI-O configuration rollout
//!
//! Once the binaries are on every node, the drop-in registering the runtime
//! with CRI-O is handed to the Machine Config Operator. Nodes picked by a
//! custom selector are first grouped into the dedicated `kata-oc` pool, which
//! has to report all of its machines ready before the MachineConfig lands.

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{info, instrument};

use super::config::ControllerConfig;
use super::lifecycle::ensure_created;
use super::pool::{kata_pool, resolve_role};
use super::resources::{
    build_machine_config, build_machine_config_pool, pool_placement, KATA_POOL_NAME,
    MACHINE_CONFIG_NAME, RUNTIME_CLASS_NAME,
};
use super::store::{ClusterStore, KataEvent};
use crate::crd::KataConfig;
use crate::error::Result;

#[instrument(skip(store, config, kc), fields(name = %kc.name_any()))]
pub async fn configure_nodes<S: ClusterStore>(
    store: &S,
    config: &ControllerConfig,
    kc: &KataConfig,
) -> Result<Action> {
    let role = resolve_role(store).await?;
    let placement = pool_placement(kc, &role);
    let existing_pool = kata_pool(store).await?;

    if placement.is_dedicated() {
        let Some(pool) = &existing_pool else {
            ensure_created(store, &build_machine_config_pool(kc)).await?;
            info!(
                "Created MachineConfigPool {}, waiting for it to pick up nodes",
                KATA_POOL_NAME
            );
            return Ok(Action::requeue(config.pool_created_requeue));
        };

        let (ready, machines) = pool.machine_counts();
        if machines == 0 || ready != machines {
            info!(
                ready,
                machines,
                "Waiting for MachineConfigPool {} to become ready",
                KATA_POOL_NAME
            );
            return Ok(Action::requeue(config.wait_requeue));
        }
    }

    let target_pool = if existing_pool.is_some() {
        KATA_POOL_NAME.to_string()
    } else {
        placement.role().to_string()
    };

    let machine_config = build_machine_config(kc, &target_pool, RUNTIME_CLASS_NAME)?;
    if ensure_created(store, &machine_config).await?.created() {
        store
            .record_event(
                kc,
                KataEvent::normal(
                    "MachineConfigCreated",
                    format!("MachineConfig {MACHINE_CONFIG_NAME} targets pool {target_pool}"),
                ),
            )
            .await;
    }

    Ok(Action::await_change())
}
