//! Response bodies for the REST API

use serde::Serialize;

use crate::crd::KataConfigStatus;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KataConfigSummary {
    pub name: String,
    pub phase: String,
    pub total_nodes: i32,
    pub installed_nodes: i32,
    pub uninstalled_nodes: i32,
    pub runtime_class: String,
    /// False when an older KataConfig is active
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct KataConfigListResponse {
    pub items: Vec<KataConfigSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KataConfigDetailResponse {
    #[serde(flatten)]
    pub summary: KataConfigSummary,
    pub pool_selector: Option<serde_json::Value>,
    pub status: KataConfigStatus,
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}
