//! Controller module for KataConfig reconciliation
//! This module contains the main controller loop, the orchestration steps
//! for installing and removing the Kata runtime, and resource management.

mod arbiter;
pub mod config;
mod finalizers;
mod install;
pub mod lifecycle;
#[cfg(feature = "metrics")]
pub mod metrics;
mod node_config;
pub mod phase;
mod pool;
mod reconciler;
pub mod resources;
mod runtime_class;
pub mod store;
pub mod templates;
#[cfg(test)]
pub(crate) mod test_utils;
mod uninstall;

pub use arbiter::{arbitrate, Arbitration};
pub use config::ControllerConfig;
pub use finalizers::KATA_CONFIG_FINALIZER;
pub use phase::{derive_phase, phase_of, Phase};
pub use reconciler::{reconcile_kata_config, run_controller, ControllerState};
pub use store::{ClusterStore, KubeStore};
