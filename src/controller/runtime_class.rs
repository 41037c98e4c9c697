//! RuntimeClass publication once every node finished installing

use k8s_openapi::api::apps::v1::DaemonSet;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{info, instrument};

use super::config::ControllerConfig;
use super::lifecycle::{ensure_created, ensure_deleted};
use super::resources::{build_runtime_class, daemon_set_name, DaemonOperation, RUNTIME_CLASS_NAME};
use super::store::{ClusterStore, KataEvent};
use crate::crd::KataConfig;
use crate::error::Result;

/// Tear down the install daemons and publish the `kata` RuntimeClass.
///
/// The handle is recorded in status once; later passes leave both the
/// RuntimeClass and the status alone.
#[instrument(skip(store, config, kc), fields(name = %kc.name_any()))]
pub async fn publish_runtime_class<S: ClusterStore>(
    store: &S,
    config: &ControllerConfig,
    kc: &KataConfig,
) -> Result<Action> {
    ensure_deleted::<S, DaemonSet>(
        store,
        &daemon_set_name(DaemonOperation::Install),
        Some(&config.operator_namespace),
    )
    .await?;

    let mut status = kc.status.clone().unwrap_or_default();
    if !status.runtime_class.is_empty() {
        return Ok(Action::await_change());
    }

    if ensure_created(store, &build_runtime_class(kc)).await?.created() {
        store
            .record_event(
                kc,
                KataEvent::normal(
                    "RuntimeClassPublished",
                    format!("RuntimeClass {RUNTIME_CLASS_NAME} is available"),
                ),
            )
            .await;
    }

    status.runtime_class = RUNTIME_CLASS_NAME.to_string();
    store.patch_status(kc, &status).await?;
    info!("Published RuntimeClass {}", RUNTIME_CLASS_NAME);

    Ok(Action::await_change())
}
