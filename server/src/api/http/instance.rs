//! Instance HTTP handlers

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::account::AccountType;
use crate::domain::instance::{InstanceParams, ProjectEntry, ProjectSource, ServerInstance};
use crate::service::instance::{InstanceView, QuotaReport};
use crate::service::supervisor::{StartedWorker, StopOutcome};
use crate::{AppState, Result};

// ==================== Request/Response Types ====================

/// Create or update instance request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRequest {
    pub name: String,
    #[serde(rename = "type", default)]
    pub account_type: AccountType,
    pub token_file: String,
    pub project_id: String,
    pub project_source: Option<ProjectSource>,
    pub project_history: Option<Vec<ProjectEntry>>,
    pub port: u16,
    #[serde(default)]
    pub password: String,
    pub is_pro: Option<bool>,
}

impl From<InstanceRequest> for InstanceParams {
    fn from(req: InstanceRequest) -> Self {
        Self {
            name: req.name,
            account_type: req.account_type,
            token_file: req.token_file,
            project_id: req.project_id,
            project_source: req.project_source,
            project_history: req.project_history,
            port: req.port,
            password: req.password,
            is_pro: req.is_pro,
        }
    }
}

/// List instances response
#[derive(Debug, Serialize)]
pub struct ListInstancesResponse {
    pub instances: Vec<InstanceView>,
    pub total: usize,
}

/// Reordered instances response
#[derive(Debug, Serialize)]
pub struct ReorderResponse {
    pub instances: Vec<ServerInstance>,
}

/// Stop response
#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub status: StopOutcome,
}

// ==================== Handlers ====================

/// List instances with their status
pub async fn list_instances(State(state): State<AppState>) -> Json<ListInstancesResponse> {
    let instances = state.instance_service.list().await;
    let total = instances.len();
    Json(ListInstancesResponse { instances, total })
}

/// Create an instance
pub async fn create_instance(
    State(state): State<AppState>,
    payload: std::result::Result<Json<InstanceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ServerInstance>)> {
    let Json(req) = payload?;
    let instance = state.instance_service.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// Update an instance
pub async fn update_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<InstanceRequest>, JsonRejection>,
) -> Result<Json<ServerInstance>> {
    let Json(req) = payload?;
    let instance = state.instance_service.update(&id, req.into()).await?;
    Ok(Json(instance))
}

/// Delete an instance
pub async fn delete_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.instance_service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reorder instances
pub async fn reorder_instances(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Vec<String>>, JsonRejection>,
) -> Result<Json<ReorderResponse>> {
    let Json(ids) = payload?;
    let instances = state.instance_service.reorder(&ids).await?;
    Ok(Json(ReorderResponse { instances }))
}

/// Start an instance's worker
pub async fn start_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StartedWorker>> {
    let started = state.instance_service.start(&id).await?;
    Ok(Json(started))
}

/// Stop an instance's worker
pub async fn stop_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StopResponse>> {
    let status = state.instance_service.stop(&id).await?;
    Ok(Json(StopResponse { status }))
}

/// Fetch a quota snapshot for an instance
pub async fn get_quota(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QuotaReport>> {
    let report = state.instance_service.quota(&id).await?;
    Ok(Json(report))
}
