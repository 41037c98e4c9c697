//! Singleton arbitration between KataConfigs
//!
//! Only one KataConfig may drive the runtime at a time. The oldest one wins;
//! every other instance is marked failed and left alone.

use kube::ResourceExt;
use tracing::{info, warn};

use super::store::{ClusterStore, KataEvent};
use crate::crd::{FailedNodeStatus, KataConfig, REJECTED_FAILED_NODES_COUNT};
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arbitration {
    Active,
    /// Another KataConfig is older; `winner` names it
    Rejected { winner: String },
}

impl Arbitration {
    pub fn is_active(&self) -> bool {
        matches!(self, Arbitration::Active)
    }
}

/// Decide whether `current` is the active KataConfig among `all`.
///
/// Creation timestamps are compared; equal timestamps fall back to listing
/// order, so exactly one instance of any listing is active.
pub fn arbitrate(current: &KataConfig, all: &[KataConfig]) -> Arbitration {
    let oldest = all
        .iter()
        .min_by_key(|kc| kc.metadata.creation_timestamp.as_ref().map(|t| t.0));

    match oldest {
        Some(winner) if winner.name_any() != current.name_any() => Arbitration::Rejected {
            winner: winner.name_any(),
        },
        _ => Arbitration::Active,
    }
}

pub fn rejection_message(winner: &str) -> String {
    format!("Multiple KataConfig CRs are not supported, {winner} already exists")
}

/// List every KataConfig and arbitrate `kc` against them.
///
/// A rejected instance gets the failure sentinel and a synthetic failure
/// entry naming the winner; status is only written the first time. An
/// instance that becomes active after an earlier rejection has the sentinel
/// cleared. Returns the outcome with the latest copy of `kc`.
pub async fn check_singleton<S: ClusterStore>(
    store: &S,
    kc: &KataConfig,
) -> Result<(Arbitration, KataConfig)> {
    let all: Vec<KataConfig> = store.list(&Default::default()).await?;
    let outcome = arbitrate(kc, &all);
    let mut status = kc.status.clone().unwrap_or_default();

    let Arbitration::Rejected { winner } = outcome.clone() else {
        if !status.is_rejected() {
            return Ok((outcome, kc.clone()));
        }
        info!("KataConfig is now the active instance, clearing rejection");
        status.installation_status.failed = Default::default();
        let updated = store.patch_status(kc, &status).await?;
        return Ok((outcome, updated));
    };

    if status.is_rejected() {
        info!(winner = %winner, "KataConfig already rejected, skipping");
        return Ok((outcome, kc.clone()));
    }

    let message = rejection_message(&winner);
    warn!(winner = %winner, "Rejecting KataConfig {}", kc.name_any());

    let failed = &mut status.installation_status.failed;
    failed.failed_nodes_count = REJECTED_FAILED_NODES_COUNT;
    failed.failed_nodes_list = vec![FailedNodeStatus {
        name: String::new(),
        error: message.clone(),
    }];
    let updated = store.patch_status(kc, &status).await?;
    store
        .record_event(kc, KataEvent::warning("MultipleKataConfigs", message))
        .await;

    Ok((outcome, updated))
}
