//! Reconciliation phase of a KataConfig
//!
//! The phase is never stored. It is derived on every pass from the deletion
//! timestamp and the status counters, which the on-node daemons advance
//! independently of this controller.

use std::fmt;

use super::finalizers::is_being_deleted;
use crate::crd::{KataConfig, KataConfigStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Size the pool, launch the install daemons and hold the finalizer
    Installing,
    /// Binaries are on every node; roll the CRI-O drop-in out to the pool
    ConfiguringNodes,
    /// Every node finished; publish the RuntimeClass
    PublishingRuntime,
    /// Deletion requested; run the uninstall protocol
    Uninstalling,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Installing,
        Phase::ConfiguringNodes,
        Phase::PublishingRuntime,
        Phase::Uninstalling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Installing => "Installing",
            Phase::ConfiguringNodes => "ConfiguringNodes",
            Phase::PublishingRuntime => "PublishingRuntime",
            Phase::Uninstalling => "Uninstalling",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the phase from persisted state alone.
///
/// Completion is checked before binaries-installed so the RuntimeClass is
/// published on the first pass that sees every node completed, and never
/// again once `runtimeClass` is recorded.
pub fn derive_phase(being_deleted: bool, status: &KataConfigStatus) -> Phase {
    if being_deleted {
        return Phase::Uninstalling;
    }
    if !status.runtime_class.is_empty() {
        return Phase::Installing;
    }
    if status.install_completed() {
        Phase::PublishingRuntime
    } else if status.binaries_installed_everywhere() {
        Phase::ConfiguringNodes
    } else {
        Phase::Installing
    }
}

pub fn phase_of(kc: &KataConfig) -> Phase {
    let status = kc.status.clone().unwrap_or_default();
    derive_phase(is_being_deleted(kc), &status)
}
