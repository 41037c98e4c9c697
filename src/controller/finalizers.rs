//! Finalizer handling for KataConfig teardown
//!
//! The finalizer holds a deleted KataConfig in place until the uninstall
//! protocol has removed the runtime from every node. Only this controller
//! adds or removes it.

use kube::ResourceExt;
use tracing::info;

use super::store::ClusterStore;
use crate::crd::KataConfig;
use crate::error::Result;

/// Finalizer name used to protect KataConfig resources
pub const KATA_CONFIG_FINALIZER: &str = "kataconfiguration.openshift.io/finalizer";

/// Add the finalizer if absent. Returns the updated object when it changed.
pub async fn add_finalizer<S: ClusterStore>(
    store: &S,
    kc: &KataConfig,
) -> Result<Option<KataConfig>> {
    if has_finalizer(kc) {
        return Ok(None);
    }

    let mut finalizers = kc.finalizers().to_vec();
    finalizers.push(KATA_CONFIG_FINALIZER.to_string());
    let updated = store.patch_finalizers(kc, finalizers).await?;
    info!("Added finalizer to KataConfig: {}", kc.name_any());
    Ok(Some(updated))
}

/// Remove the finalizer, leaving any foreign finalizers in place
pub async fn remove_finalizer<S: ClusterStore>(store: &S, kc: &KataConfig) -> Result<()> {
    let finalizers: Vec<String> = kc
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != KATA_CONFIG_FINALIZER)
        .cloned()
        .collect();

    store.patch_finalizers(kc, finalizers).await?;
    info!("Removed finalizer from KataConfig: {}", kc.name_any());
    Ok(())
}

/// A deletion timestamp means deletion was requested but finalizers still
/// hold the object
pub fn is_being_deleted(kc: &KataConfig) -> bool {
    kc.metadata.deletion_timestamp.is_some()
}

pub fn has_finalizer(kc: &KataConfig) -> bool {
    kc.finalizers().iter().any(|f| f == KATA_CONFIG_FINALIZER)
}
