//! Custom Resource Definitions for the Kata operator
//!
//! `KataConfig` is the operator's own resource. The machine-config types are
//! owned by the OpenShift Machine Config Operator and only mirrored here.

mod kata_config;
mod machine_config;


pub use kata_config::{
    FailedNodeStatus, KataCompletedStatus, KataConfig, KataConfigSpec, KataConfigStatus,
    KataFailedStatus, KataInstallationInProgressStatus, KataInstallationStatus,
    KataUnInstallationInProgressStatus, KataUnInstallationStatus, REJECTED_FAILED_NODES_COUNT,
};
pub use machine_config::{
    MachineConfig, MachineConfigPool, MachineConfigPoolSpec, MachineConfigPoolStatus,
    MachineConfigSpec,
};
