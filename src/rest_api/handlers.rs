//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kube::ResourceExt;
use tracing::{error, instrument};

use crate::controller::{arbitrate, phase_of, ClusterStore, ControllerState};
use crate::crd::KataConfig;

use super::dto::{
    ErrorResponse, HealthResponse, KataConfigDetailResponse, KataConfigListResponse,
    KataConfigSummary,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub(crate) fn summarize(kc: &KataConfig, all: &[KataConfig]) -> KataConfigSummary {
    let status = kc.status.clone().unwrap_or_default();
    KataConfigSummary {
        name: kc.name_any(),
        phase: phase_of(kc).to_string(),
        total_nodes: status.total_nodes_count,
        installed_nodes: status.installation_status.completed.completed_nodes_count,
        uninstalled_nodes: status.un_installation_status.completed.completed_nodes_count,
        runtime_class: status.runtime_class,
        active: arbitrate(kc, all).is_active(),
    }
}

async fn list_all(state: &ControllerState) -> Result<Vec<KataConfig>, ApiError> {
    state
        .store
        .list::<KataConfig>(&Default::default())
        .await
        .map_err(|e| {
            error!("Failed to list KataConfigs: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("list_failed", &e.to_string())),
            )
        })
}

/// List all KataConfigs with their derived phase and progress
#[instrument(skip(state))]
pub async fn list_kata_configs(
    State(state): State<Arc<ControllerState>>,
) -> Result<Json<KataConfigListResponse>, ApiError> {
    let all = list_all(&state).await?;
    let items: Vec<KataConfigSummary> = all.iter().map(|kc| summarize(kc, &all)).collect();
    let total = items.len();
    Ok(Json(KataConfigListResponse { items, total }))
}

/// Get a specific KataConfig
#[instrument(skip(state), fields(name = %name))]
pub async fn get_kata_config(
    State(state): State<Arc<ControllerState>>,
    Path(name): Path<String>,
) -> Result<Json<KataConfigDetailResponse>, ApiError> {
    let all = list_all(&state).await?;
    let Some(kc) = all.iter().find(|kc| kc.name_any() == name) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                &format!("KataConfig {} not found", name),
            )),
        ));
    };

    let pool_selector = kc
        .spec
        .kata_config_pool_selector
        .as_ref()
        .and_then(|s| serde_json::to_value(s).ok());

    Ok(Json(KataConfigDetailResponse {
        summary: summarize(kc, &all),
        pool_selector,
        status: kc.status.clone().unwrap_or_default(),
        created_at: kc
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0.to_rfc3339()),
    }))
}
