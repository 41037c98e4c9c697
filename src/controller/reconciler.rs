//! Main reconciler for KataConfig resources
//!
//! Implements the controller pattern using kube-rs runtime. Each pass runs
//! the singleton arbiter, derives the phase from the persisted status and
//! dispatches to exactly one orchestration step.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::node::v1::RuntimeClass;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::arbiter::check_singleton;
use super::config::ControllerConfig;
use super::install::install;
use super::node_config::configure_nodes;
use super::phase::{phase_of, Phase};
use super::runtime_class::publish_runtime_class;
use super::store::{ClusterStore, KubeStore};
use super::uninstall::uninstall;
use crate::crd::{KataConfig, MachineConfig, MachineConfigPool};
use crate::error::{Error, Result};

/// Controller name used in metrics labels
pub const CONTROLLER_NAME: &str = "kataconfig";

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub store: KubeStore,
    pub config: ControllerConfig,
}

impl ControllerState {
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self {
            store: KubeStore::new(client.clone()),
            client,
            config,
        }
    }
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let kata_configs: Api<KataConfig> = Api::all(client.clone());

    info!("Starting KataConfig controller");

    // Verify CRD exists
    match kata_configs.list(&Default::default()).await {
        Ok(_) => info!("KataConfig CRD is available"),
        Err(e) => {
            error!(
                "KataConfig CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "KataConfig CRD not installed".to_string(),
            ));
        }
    }

    let daemon_sets: Api<DaemonSet> =
        Api::namespaced(client.clone(), &state.config.operator_namespace);

    Controller::new(kata_configs, Config::default())
        // Watch owned resources for changes
        .owns::<DaemonSet>(daemon_sets, Config::default())
        .owns::<RuntimeClass>(Api::all(client.clone()), Config::default())
        .owns::<MachineConfig>(Api::all(client.clone()), Config::default())
        .owns::<MachineConfigPool>(Api::all(client.clone()), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

async fn reconcile(obj: Arc<KataConfig>, ctx: Arc<ControllerState>) -> Result<Action> {
    let started = Instant::now();
    let result = reconcile_kata_config(&ctx.store, &ctx.config, &obj).await;

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(
        CONTROLLER_NAME,
        started.elapsed().as_secs_f64(),
    );
    #[cfg(not(feature = "metrics"))]
    let _ = started;

    result
}

/// Run one reconciliation pass for `kc` against `store`
#[instrument(skip(store, config, kc), fields(name = %kc.name_any()))]
pub async fn reconcile_kata_config<S: ClusterStore>(
    store: &S,
    config: &ControllerConfig,
    kc: &KataConfig,
) -> Result<Action> {
    let (arbitration, kc) = check_singleton(store, kc).await?;
    if !arbitration.is_active() {
        debug!("KataConfig is not the active instance, ignoring");
        return Ok(Action::await_change());
    }
    let kc = &kc;

    let phase = phase_of(kc);
    info!(phase = %phase, "Reconciling KataConfig");

    #[cfg(feature = "metrics")]
    super::metrics::set_kata_config_state(
        &kc.name_any(),
        phase,
        &kc.status.clone().unwrap_or_default(),
    );

    match phase {
        Phase::Uninstalling => uninstall(store, config, kc).await,
        Phase::PublishingRuntime => publish_runtime_class(store, config, kc).await,
        Phase::ConfiguringNodes => configure_nodes(store, config, kc).await,
        Phase::Installing => install(store, config, kc).await,
    }
}

fn error_policy(kc: Arc<KataConfig>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", kc.name_any(), error);

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(CONTROLLER_NAME, error.kind());

    retry_action(error)
}

/// Requeue retriable errors after their backoff; wait for a spec or status
/// change on anything a retry cannot fix
pub(crate) fn retry_action(error: &Error) -> Action {
    match error.requeue_after() {
        Some(delay) => Action::requeue(delay),
        None => {
            warn!("Not retrying {} error until the KataConfig changes", error.kind());
            Action::await_change()
        }
    }
}
