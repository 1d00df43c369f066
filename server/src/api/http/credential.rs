//! Credential HTTP handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::domain::account::AccountType;
use crate::domain::instance::ProjectEntry;
use crate::{AppState, Error, Result};

/// List credential files response
#[derive(Debug, Serialize)]
pub struct ListCredentialsResponse {
    pub files: Vec<String>,
}

/// Candidate projects response
#[derive(Debug, Serialize)]
pub struct ProjectsResponse {
    pub projects: Vec<ProjectEntry>,
}

fn parse_account_type(raw: &str) -> Result<AccountType> {
    AccountType::from_str(raw)
        .ok_or_else(|| Error::InvalidParameter(format!("unknown account type: {}", raw)))
}

/// List credential files for an account type
pub async fn list_credentials(
    State(state): State<AppState>,
    Path(account_type): Path<String>,
) -> Result<Json<ListCredentialsResponse>> {
    let account_type = parse_account_type(&account_type)?;
    let files = state.instance_service.list_credentials(account_type).await?;
    Ok(Json(ListCredentialsResponse { files }))
}

/// Resolve candidate projects for a credential file
pub async fn resolve_projects(
    State(state): State<AppState>,
    Path((account_type, file)): Path<(String, String)>,
) -> Result<Json<ProjectsResponse>> {
    let account_type = parse_account_type(&account_type)?;
    let projects = state
        .instance_service
        .resolve_projects(account_type, &file)
        .await?;
    Ok(Json(ProjectsResponse { projects }))
}
