//! Runtime settings for the KataConfig controller

use std::time::Duration;

/// Default namespace the install/uninstall daemons run in
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "kata-operator-system";

/// Image of the on-node daemon that installs and removes the Kata binaries
pub const DEFAULT_DAEMON_IMAGE: &str = "quay.io/isolatedcontainers/kata-operator-daemon@sha256:528c7f6b9495f4ac13c156f79f59023b46b1817250f51ac88c73fd4163d45f8f";

/// Payload the daemon installs, recorded in `status.kataImage`
pub const DEFAULT_KATA_PAYLOAD_IMAGE: &str = "quay.io/kata-operator/kata-artifacts:1.0";

/// Settings shared by every reconciliation pass
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Namespace for the install/uninstall DaemonSets
    pub operator_namespace: String,
    /// Image of the install/uninstall daemon
    pub daemon_image: String,
    /// Kata payload image recorded in status
    pub payload_image: String,
    /// Requeue delay after creating the dedicated MachineConfigPool
    pub pool_created_requeue: Duration,
    /// Requeue delay while waiting for a pool or for configuration fixes
    pub wait_requeue: Duration,
    /// Pause after deleting machine configuration so the Machine Config
    /// Operator starts rolling the change before pool counters are read
    pub pool_settle_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            daemon_image: DEFAULT_DAEMON_IMAGE.to_string(),
            payload_image: DEFAULT_KATA_PAYLOAD_IMAGE.to_string(),
            pool_created_requeue: Duration::from_secs(20),
            wait_requeue: Duration::from_secs(15),
            pool_settle_delay: Duration::from_secs(60),
        }
    }
}
