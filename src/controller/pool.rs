//! MachineConfigPool lookups
//!
//! Which pool the runtime lands in is resolved from live pool state on every
//! pass; nothing is cached between passes.

use super::lifecycle::get_optional;
use super::resources::KATA_POOL_NAME;
use super::store::ClusterStore;
use crate::crd::MachineConfigPool;
use crate::error::{Error, Result};

pub const WORKER_ROLE: &str = "worker";
pub const MASTER_ROLE: &str = "master";

/// Fetch a pool, reporting a missing one as a configuration error
pub async fn get_pool<S: ClusterStore>(store: &S, name: &str) -> Result<MachineConfigPool> {
    store
        .get::<MachineConfigPool>(name, None)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                Error::PoolNotFound(name.to_string())
            } else {
                e
            }
        })
}

/// Resolve the node role the runtime targets by default.
///
/// Compact clusters run workloads on the masters and report an empty worker
/// pool, so any worker pool without machines falls back to `master`.
pub async fn resolve_role<S: ClusterStore>(store: &S) -> Result<String> {
    let worker = get_pool(store, WORKER_ROLE).await?;
    let (_, machines) = worker.machine_counts();
    if machines > 0 {
        Ok(WORKER_ROLE.to_string())
    } else {
        Ok(MASTER_ROLE.to_string())
    }
}

/// The dedicated `kata-oc` pool, if it exists
pub async fn kata_pool<S: ClusterStore>(store: &S) -> Result<Option<MachineConfigPool>> {
    get_optional::<S, MachineConfigPool>(store, KATA_POOL_NAME, None).await
}
